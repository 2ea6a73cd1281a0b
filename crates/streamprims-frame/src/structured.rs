use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use streamprims_stream::MessageStream;
use tokio_util::sync::CancellationToken;

use crate::codec::LengthPrefixedConfig;
use crate::error::{FrameError, Result};
use crate::lp::LengthPrefixedStream;

/// Converts typed messages to and from frame payloads.
pub trait MessageCodec {
    type Message;

    fn encode(&self, message: &Self::Message) -> Result<Bytes>;

    fn decode(&self, data: &[u8]) -> Result<Self::Message>;
}

/// A [`MessageCodec`] that stores messages as JSON documents.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T: Serialize + DeserializeOwned> MessageCodec for JsonCodec<T> {
    type Message = T;

    fn encode(&self, message: &T) -> Result<Bytes> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|err| FrameError::Codec(err.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<T> {
        serde_json::from_slice(data).map_err(|err| FrameError::Codec(err.to_string()))
    }
}

/// Typed messages over length-prefixed frames.
///
/// Each call names the codec to use, so one stream can carry several
/// message types in sequence. [`bind`](Self::bind) fixes a single codec.
#[derive(Debug)]
pub struct StructuredStream {
    lp: LengthPrefixedStream,
}

impl StructuredStream {
    pub fn new(stream: MessageStream) -> Self {
        Self::with_config(stream, LengthPrefixedConfig::default())
    }

    pub fn with_config(stream: MessageStream, config: LengthPrefixedConfig) -> Self {
        Self {
            lp: LengthPrefixedStream::with_config(stream, config),
        }
    }

    pub fn stream(&self) -> &MessageStream {
        self.lp.stream()
    }

    /// Read and decode the next frame.
    pub async fn read<C: MessageCodec>(
        &mut self,
        codec: &C,
        cancel: Option<&CancellationToken>,
    ) -> Result<C::Message> {
        let frame = self.lp.read(cancel).await?;
        codec.decode(&frame)
    }

    /// Encode `message` and write it as one frame.
    pub async fn write<C: MessageCodec>(
        &mut self,
        message: &C::Message,
        codec: &C,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let frame = codec.encode(message)?;
        self.lp.write(&frame, cancel).await
    }

    /// Encode every message and write them with a single stream write.
    pub async fn write_v<C: MessageCodec>(
        &mut self,
        messages: &[C::Message],
        codec: &C,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let frames = messages
            .iter()
            .map(|message| codec.encode(message))
            .collect::<Result<Vec<_>>>()?;
        self.lp.write_v(frames, cancel).await
    }

    /// Fix `codec` for every later call.
    pub fn bind<C: MessageCodec>(&mut self, codec: C) -> BoundStream<'_, C> {
        BoundStream { inner: self, codec }
    }

    /// Detach from the stream. See [`ByteStream::unwrap`](crate::ByteStream::unwrap).
    pub fn unwrap(&mut self) -> Result<MessageStream> {
        self.lp.unwrap()
    }
}

/// A [`StructuredStream`] bound to one codec.
#[derive(Debug)]
pub struct BoundStream<'a, C> {
    inner: &'a mut StructuredStream,
    codec: C,
}

impl<'a, C: MessageCodec> BoundStream<'a, C> {
    pub async fn read(&mut self, cancel: Option<&CancellationToken>) -> Result<C::Message> {
        self.inner.read(&self.codec, cancel).await
    }

    pub async fn write(&mut self, message: &C::Message, cancel: Option<&CancellationToken>) -> Result<()> {
        self.inner.write(message, &self.codec, cancel).await
    }

    pub async fn write_v(
        &mut self,
        messages: &[C::Message],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.inner.write_v(messages, &self.codec, cancel).await
    }

    /// Release the binding and return the untyped structured stream.
    pub fn unwrap(self) -> &'a mut StructuredStream {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use streamprims_stream::{stream_pair, StreamConfig};
    use streamprims_transport::QueueConfig;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Hello {
        name: String,
        protocols: Vec<String>,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ack {
        ok: bool,
    }

    fn hello(name: &str) -> Hello {
        Hello {
            name: name.to_string(),
            protocols: vec!["/echo/1.0.0".to_string()],
        }
    }

    #[tokio::test]
    async fn mixed_message_types_on_one_stream() {
        let (a, b) = stream_pair(StreamConfig::default(), QueueConfig::default());
        let mut writer = StructuredStream::new(a);
        let mut reader = StructuredStream::new(b);

        writer
            .write(&hello("alice"), &JsonCodec::new(), None)
            .await
            .unwrap();
        writer.write(&Ack { ok: true }, &JsonCodec::new(), None).await.unwrap();

        let got: Hello = reader.read(&JsonCodec::new(), None).await.unwrap();
        assert_eq!(got, hello("alice"));
        let ack: Ack = reader.read(&JsonCodec::new(), None).await.unwrap();
        assert!(ack.ok);
    }

    #[tokio::test]
    async fn bound_stream_reads_and_writes_batches() {
        let (a, b) = stream_pair(StreamConfig::default(), QueueConfig::default());
        let mut writer = StructuredStream::new(a);
        let mut reader = StructuredStream::new(b);

        let mut out = writer.bind(JsonCodec::<Hello>::new());
        out.write_v(&[hello("one"), hello("two")], None).await.unwrap();

        let mut input = reader.bind(JsonCodec::<Hello>::new());
        assert_eq!(input.read(None).await.unwrap(), hello("one"));
        assert_eq!(input.read(None).await.unwrap(), hello("two"));
    }

    #[tokio::test]
    async fn undecodable_frame_is_a_codec_error() {
        let (a, b) = stream_pair(StreamConfig::default(), QueueConfig::default());
        let mut raw = LengthPrefixedStream::new(a);
        let mut reader = StructuredStream::new(b);

        raw.write(b"not json", None).await.unwrap();
        let err = reader.read(&JsonCodec::<Ack>::new(), None).await.unwrap_err();
        assert!(matches!(err, FrameError::Codec(_)));
    }
}
