use bytes::{Bytes, BytesMut};
use streamprims_stream::MessageStream;
use tokio_util::sync::CancellationToken;

use crate::byte_stream::{ByteStream, ByteStreamConfig};
use crate::codec::{encode_frame, encoded_len, LengthPrefixedConfig};
use crate::error::{FrameError, Result};
use crate::varint;

/// Reads and writes varint length-prefixed frames on a [`MessageStream`].
#[derive(Debug)]
pub struct LengthPrefixedStream {
    bytes: ByteStream,
    config: LengthPrefixedConfig,
}

impl LengthPrefixedStream {
    pub fn new(stream: MessageStream) -> Self {
        Self::with_config(stream, LengthPrefixedConfig::default())
    }

    pub fn with_config(stream: MessageStream, config: LengthPrefixedConfig) -> Self {
        let bytes = ByteStream::with_config(
            stream,
            ByteStreamConfig {
                max_buffer_size: config.max_buffer_size(),
            },
        );
        Self { bytes, config }
    }

    pub fn stream(&self) -> &MessageStream {
        self.bytes.stream()
    }

    pub fn config(&self) -> &LengthPrefixedConfig {
        &self.config
    }

    /// Read the next frame's payload.
    ///
    /// The prefix is read one byte at a time so no payload bytes are pulled
    /// off the stream before the length is known. Empty frames are returned
    /// as empty payloads.
    pub async fn read(&mut self, cancel: Option<&CancellationToken>) -> Result<Bytes> {
        let max_length_length = self.config.max_length_length();
        let mut prefix = [0u8; varint::MAX_LEN];
        let mut read = 0;

        let length = loop {
            let byte = self.bytes.read_exact(1, cancel).await?;
            prefix[read] = byte[0];
            read += 1;

            if let Some((length, _)) = varint::decode(&prefix[..read])? {
                break length;
            }
            if read >= max_length_length || read >= varint::MAX_LEN {
                return Err(FrameError::LengthTooLong {
                    length: read + 1,
                    max: max_length_length,
                });
            }
        };

        if length > self.config.max_data_length as u64 {
            return Err(FrameError::DataTooLong {
                length,
                max: self.config.max_data_length,
            });
        }

        self.bytes.read_exact(length as usize, cancel).await
    }

    /// Write `data` as one frame.
    pub async fn write(&mut self, data: &[u8], cancel: Option<&CancellationToken>) -> Result<()> {
        let mut buf = BytesMut::with_capacity(encoded_len(data.len()));
        encode_frame(data, &mut buf);
        self.bytes.write(buf.freeze(), cancel).await
    }

    /// Write several frames with a single stream write.
    pub async fn write_v<I, B>(&mut self, frames: I, cancel: Option<&CancellationToken>) -> Result<()>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut buf = BytesMut::new();
        for frame in frames {
            encode_frame(frame.as_ref(), &mut buf);
        }
        self.bytes.write(buf.freeze(), cancel).await
    }

    /// Detach from the stream. See [`ByteStream::unwrap`].
    pub fn unwrap(&mut self) -> Result<MessageStream> {
        self.bytes.unwrap()
    }
}
