use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::{FrameError, Result};
use crate::varint;

/// Default maximum payload size: 4 MiB.
pub const DEFAULT_MAX_DATA_LENGTH: usize = 4 * 1024 * 1024;

/// Configuration for length-prefixed framing.
#[derive(Debug, Clone)]
pub struct LengthPrefixedConfig {
    /// Maximum payload size in bytes. Default: 4 MiB.
    pub max_data_length: usize,
    /// Maximum number of bytes in the length prefix. `None` derives it from
    /// `max_data_length`.
    pub max_length_length: Option<usize>,
    /// Maximum number of undecoded bytes a [`LengthPrefixedDecoder`] holds.
    /// `None` allows exactly one maximum-size frame.
    pub max_buffer_size: Option<usize>,
    /// Drop zero-length frames instead of yielding them.
    pub skip_empty: bool,
}

impl Default for LengthPrefixedConfig {
    fn default() -> Self {
        Self {
            max_data_length: DEFAULT_MAX_DATA_LENGTH,
            max_length_length: None,
            max_buffer_size: None,
            skip_empty: true,
        }
    }
}

impl LengthPrefixedConfig {
    /// Effective prefix limit.
    pub fn max_length_length(&self) -> usize {
        self.max_length_length
            .unwrap_or_else(|| varint::encoding_length(self.max_data_length as u64))
    }

    /// Effective decoder buffer limit.
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
            .unwrap_or_else(|| self.max_data_length.saturating_add(self.max_length_length()))
    }
}

/// Size of `payload_len` bytes once framed.
pub fn encoded_len(payload_len: usize) -> usize {
    varint::encoding_length(payload_len as u64) + payload_len
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// +------------------------+--------------------+
/// | Length (LEB128 varint) | Payload (Length B) |
/// +------------------------+--------------------+
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(encoded_len(payload.len()));
    varint::encode(payload.len() as u64, dst);
    dst.extend_from_slice(payload);
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, config: &LengthPrefixedConfig) -> Result<Option<Bytes>> {
    let max_length_length = config.max_length_length();

    let Some((length, prefix_len)) = varint::decode(src)? else {
        if src.len() >= max_length_length {
            return Err(FrameError::LengthTooLong {
                length: src.len() + 1,
                max: max_length_length,
            });
        }
        return Ok(None);
    };

    if prefix_len > max_length_length {
        return Err(FrameError::LengthTooLong {
            length: prefix_len,
            max: max_length_length,
        });
    }

    if length > config.max_data_length as u64 {
        return Err(FrameError::DataTooLong {
            length,
            max: config.max_data_length,
        });
    }

    let length = length as usize;
    if src.len() < prefix_len + length {
        return Ok(None);
    }

    src.advance(prefix_len);
    Ok(Some(src.split_to(length).freeze()))
}

/// Incremental decoder turning an arbitrary byte feed into frames.
#[derive(Debug, Default)]
pub struct LengthPrefixedDecoder {
    buffer: BytesMut,
    config: LengthPrefixedConfig,
}

impl LengthPrefixedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LengthPrefixedConfig) -> Self {
        Self {
            buffer: BytesMut::new(),
            config,
        }
    }

    /// Bytes received but not yet part of a yielded frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append `chunk` and return an iterator over every frame that is now
    /// complete.
    ///
    /// Partial frames stay buffered for the next call. Fails immediately if
    /// the buffered input exceeds `max_buffer_size`.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Frames<'_>> {
        self.buffer.extend_from_slice(chunk);

        let max = self.config.max_buffer_size();
        if self.buffer.len() > max {
            let length = self.buffer.len();
            self.buffer.clear();
            return Err(FrameError::BufferOverflow { length, max });
        }

        Ok(Frames {
            decoder: self,
            failed: false,
        })
    }
}

/// Frames made available by one [`LengthPrefixedDecoder::decode`] call.
///
/// Decoding is lazy: each `next` extracts at most one frame. After an error
/// the iterator is fused.
#[derive(Debug)]
pub struct Frames<'a> {
    decoder: &'a mut LengthPrefixedDecoder,
    failed: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            match decode_frame(&mut self.decoder.buffer, &self.decoder.config) {
                Ok(Some(frame)) if frame.is_empty() && self.decoder.config.skip_empty => {
                    trace!("skipping empty frame");
                    continue;
                }
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => return None,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// A tokio codec for varint length-prefixed frames.
///
/// Use with `FramedRead`/`FramedWrite` to carry frames over any
/// `AsyncRead`/`AsyncWrite`.
#[derive(Debug, Clone, Default)]
pub struct LengthPrefixedCodec {
    config: LengthPrefixedConfig,
}

impl LengthPrefixedCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LengthPrefixedConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LengthPrefixedConfig {
        &self.config
    }
}

impl Decoder for LengthPrefixedCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match decode_frame(src, &self.config)? {
                Some(frame) if frame.is_empty() && self.config.skip_empty => continue,
                other => return Ok(other),
            }
        }
    }
}

impl Encoder<Bytes> for LengthPrefixedCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.config.max_data_length {
            return Err(FrameError::DataTooLong {
                length: item.len() as u64,
                max: self.config.max_data_length,
            });
        }
        encode_frame(&item, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;

    fn collect(decoder: &mut LengthPrefixedDecoder, chunk: &[u8]) -> Vec<Bytes> {
        decoder
            .decode(chunk)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = b"hello, streamprims!";

        encode_frame(payload, &mut buf);
        assert_eq!(buf.len(), 1 + payload.len());

        let frame = decode_frame(&mut buf, &LengthPrefixedConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(frame.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_prefix() {
        let mut buf = BytesMut::from(&[0x80][..]);
        let result = decode_frame(&mut buf, &LengthPrefixedConfig::default()).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"hello", &mut buf);
        buf.truncate(3);

        let result = decode_frame(&mut buf, &LengthPrefixedConfig::default()).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_data_too_long() {
        let mut buf = BytesMut::new();
        varint::encode(1024, &mut buf);

        let config = LengthPrefixedConfig {
            max_data_length: 100,
            ..LengthPrefixedConfig::default()
        };
        let result = decode_frame(&mut buf, &config);
        assert!(matches!(
            result,
            Err(FrameError::DataTooLong { length: 1024, max: 100 })
        ));
    }

    #[test]
    fn test_decode_length_too_long() {
        let config = LengthPrefixedConfig {
            max_data_length: 100,
            ..LengthPrefixedConfig::default()
        };
        assert_eq!(config.max_length_length(), 1);

        let mut buf = BytesMut::from(&[0x80, 0x01][..]);
        let result = decode_frame(&mut buf, &config);
        assert!(matches!(result, Err(FrameError::LengthTooLong { max: 1, .. })));

        let mut buf = BytesMut::from(&[0x80][..]);
        let result = decode_frame(&mut buf, &config);
        assert!(matches!(result, Err(FrameError::LengthTooLong { .. })));
    }

    #[test]
    fn test_multiple_frames() {
        let mut buf = BytesMut::new();
        encode_frame(b"first", &mut buf);
        encode_frame(b"second", &mut buf);

        let config = LengthPrefixedConfig::default();
        let f1 = decode_frame(&mut buf, &config).unwrap().unwrap();
        assert_eq!(f1.as_ref(), b"first");
        let f2 = decode_frame(&mut buf, &config).unwrap().unwrap();
        assert_eq!(f2.as_ref(), b"second");
        assert!(buf.is_empty());
    }

    #[test]
    fn decoder_yields_complete_frames_across_chunks() {
        let mut wire = BytesMut::new();
        encode_frame(b"abcde", &mut wire);
        encode_frame(b"xyz", &mut wire);

        let mut decoder = LengthPrefixedDecoder::new();
        let (head, tail) = wire.split_at(4);

        assert_eq!(collect(&mut decoder, head), Vec::<Bytes>::new());
        assert_eq!(decoder.buffered_len(), 4);
        assert_eq!(collect(&mut decoder, tail), vec!["abcde", "xyz"]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn decoder_skips_empty_frames_by_default() {
        let mut wire = BytesMut::new();
        encode_frame(b"", &mut wire);
        encode_frame(b"data", &mut wire);

        let mut decoder = LengthPrefixedDecoder::new();
        assert_eq!(collect(&mut decoder, &wire), vec!["data"]);

        let mut decoder = LengthPrefixedDecoder::with_config(LengthPrefixedConfig {
            skip_empty: false,
            ..LengthPrefixedConfig::default()
        });
        assert_eq!(collect(&mut decoder, &wire), vec!["", "data"]);
    }

    #[test]
    fn decoder_rejects_oversized_buffer() {
        let mut decoder = LengthPrefixedDecoder::with_config(LengthPrefixedConfig {
            max_buffer_size: Some(4),
            ..LengthPrefixedConfig::default()
        });
        let result = decoder.decode(b"\x10abcd");
        assert!(matches!(
            result,
            Err(FrameError::BufferOverflow { length: 5, max: 4 })
        ));
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn decoder_iterator_fuses_after_error() {
        let mut decoder = LengthPrefixedDecoder::with_config(LengthPrefixedConfig {
            max_data_length: 2,
            ..LengthPrefixedConfig::default()
        });
        let mut frames = decoder.decode(b"\x03abc").unwrap();
        assert!(matches!(frames.next(), Some(Err(FrameError::DataTooLong { .. }))));
        assert!(frames.next().is_none());
    }

    #[test]
    fn codec_roundtrip_and_limits() {
        let mut codec = LengthPrefixedCodec::with_config(LengthPrefixedConfig {
            max_data_length: 8,
            ..LengthPrefixedConfig::default()
        });
        let mut buf = BytesMut::new();

        codec.encode(Bytes::from_static(b"one"), &mut buf).unwrap();
        codec.encode(Bytes::new(), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"two"), &mut buf).unwrap();
        assert!(matches!(
            codec.encode(Bytes::from_static(b"too long!"), &mut buf),
            Err(FrameError::DataTooLong { .. })
        ));

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"one");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"two");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.put_u8(0x09);
        assert!(codec.decode(&mut buf).is_err());
    }
}
