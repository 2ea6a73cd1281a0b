//! Unsigned LEB128 varints: little-endian groups of 7 bits, high bit set on
//! every byte but the last.

use bytes::BufMut;

use crate::error::{FrameError, Result};

/// Longest encoding of a `u64`.
pub const MAX_LEN: usize = 10;

/// Number of bytes needed to encode `value`.
pub fn encoding_length(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Append the encoding of `value` to `dst`.
pub fn encode(mut value: u64, dst: &mut impl BufMut) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Decode a varint from the start of `src`.
///
/// Returns the value and the number of bytes it occupied, or `None` when
/// `src` ends before the final byte.
///
/// # Errors
///
/// Returns [`FrameError::InvalidLength`] if the encoding runs past
/// [`MAX_LEN`] bytes or overflows a `u64`.
pub fn decode(src: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value = 0u64;
    for (i, &byte) in src.iter().take(MAX_LEN).enumerate() {
        if i == MAX_LEN - 1 && byte > 1 {
            return Err(FrameError::InvalidLength);
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }

    if src.len() >= MAX_LEN {
        return Err(FrameError::InvalidLength);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    fn encoded(value: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode(value, &mut buf);
        buf.to_vec()
    }

    #[test]
    fn known_encodings() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(1), vec![0x01]);
        assert_eq!(encoded(127), vec![0x7f]);
        assert_eq!(encoded(128), vec![0x80, 0x01]);
        assert_eq!(encoded(300), vec![0xac, 0x02]);
        assert_eq!(encoded(u64::MAX).len(), MAX_LEN);
    }

    #[test]
    fn encoding_length_matches_encode() {
        for value in [0, 1, 127, 128, 16_383, 16_384, 4 * 1024 * 1024, u64::MAX] {
            assert_eq!(encoding_length(value), encoded(value).len(), "value {value}");
        }
    }

    #[test]
    fn decode_reports_incomplete_input() {
        assert_eq!(decode(&[]).unwrap(), None);
        assert_eq!(decode(&[0x80]).unwrap(), None);
        assert_eq!(decode(&[0xac, 0x02, 0xff]).unwrap(), Some((300, 2)));
    }

    #[test]
    fn decode_rejects_overlong_encoding() {
        let overlong = [0xffu8; MAX_LEN];
        assert!(matches!(decode(&overlong), Err(FrameError::InvalidLength)));

        let mut overflow = vec![0xffu8; MAX_LEN - 1];
        overflow.push(0x02);
        assert!(matches!(decode(&overflow), Err(FrameError::InvalidLength)));
    }

    #[test]
    fn decode_max_value() {
        let bytes = encoded(u64::MAX);
        assert_eq!(decode(&bytes).unwrap(), Some((u64::MAX, MAX_LEN)));
    }
}
