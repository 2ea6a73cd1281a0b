//! Varint length-prefixed framing for message streams.
//!
//! Every frame is a LEB128 varint payload length followed by the payload.
//! [`LengthPrefixedDecoder`] turns an arbitrary byte feed into frames,
//! [`LengthPrefixedCodec`] does the same for tokio's `Framed` I/O, and the
//! stream helpers layer exact-count reads, frames and typed messages on top
//! of a [`MessageStream`](streamprims_stream::MessageStream):
//!
//! - [`ByteStream`]: read exactly N bytes, write with backpressure
//! - [`LengthPrefixedStream`]: read and write single frames
//! - [`StructuredStream`]: encode and decode typed messages via a [`MessageCodec`]

pub mod byte_stream;
pub mod codec;
pub mod error;
pub mod lp;
pub mod structured;
pub mod varint;

pub use byte_stream::{ByteStream, ByteStreamConfig, DEFAULT_MAX_BUFFER_SIZE};
pub use codec::{
    decode_frame, encode_frame, encoded_len, Frames, LengthPrefixedCodec, LengthPrefixedConfig,
    LengthPrefixedDecoder, DEFAULT_MAX_DATA_LENGTH,
};
pub use error::{FrameError, Result};
pub use lp::LengthPrefixedStream;
pub use structured::{BoundStream, JsonCodec, MessageCodec, StructuredStream};
