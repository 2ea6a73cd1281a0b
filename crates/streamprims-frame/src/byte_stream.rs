use bytes::{Bytes, BytesMut};
use streamprims_stream::{MessageStream, ReadStatus, StreamError, StreamEvent, Subscription};
use streamprims_transport::race_cancel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::codec::DEFAULT_MAX_DATA_LENGTH;
use crate::error::{FrameError, Result};

/// Default byte-stream buffer limit: 4 MiB.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = DEFAULT_MAX_DATA_LENGTH;

/// Configuration for a [`ByteStream`].
#[derive(Debug, Clone)]
pub struct ByteStreamConfig {
    /// Reads fail with a buffer overflow once more than this many received
    /// bytes are waiting to be read.
    pub max_buffer_size: usize,
}

impl Default for ByteStreamConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

/// Pull-style byte access to a [`MessageStream`].
///
/// Received messages are concatenated into one buffer so callers can read
/// exact byte counts regardless of how the data was chunked on the wire.
#[derive(Debug)]
pub struct ByteStream {
    stream: MessageStream,
    events: Option<Subscription>,
    buffer: BytesMut,
    overflow: Option<FrameError>,
    config: ByteStreamConfig,
}

impl ByteStream {
    pub fn new(stream: MessageStream) -> Self {
        Self::with_config(stream, ByteStreamConfig::default())
    }

    pub fn with_config(stream: MessageStream, config: ByteStreamConfig) -> Self {
        let events = stream.subscribe();
        Self {
            stream,
            events: Some(events),
            buffer: BytesMut::new(),
            overflow: None,
            config,
        }
    }

    /// The wrapped stream.
    pub fn stream(&self) -> &MessageStream {
        &self.stream
    }

    /// Bytes received but not yet read.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Read from the stream.
    ///
    /// With `Some(n)`, waits until `n` bytes are available and returns
    /// exactly `n`; if the stream ends first this fails with
    /// [`StreamError::UnexpectedEof`], or with the stream's own error if it
    /// was aborted or reset. With `None`, waits for at least one byte and
    /// returns everything buffered, or `None` at end of input.
    pub async fn read(
        &mut self,
        bytes: Option<usize>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Bytes>> {
        if self.events.is_none() {
            return Err(FrameError::Unwrapped);
        }

        let wanted = bytes.unwrap_or(1);
        loop {
            self.pump();
            if let Some(err) = self.overflow.take() {
                return Err(err);
            }
            if self.buffer.len() >= wanted {
                break;
            }

            if let Some(ended) = self.ended() {
                if let Some(err) = ended {
                    return Err(err.into());
                }
                return match bytes {
                    None if self.buffer.is_empty() => Ok(None),
                    None => break,
                    Some(expected) => Err(StreamError::UnexpectedEof {
                        expected,
                        received: self.buffer.len(),
                    }
                    .into()),
                };
            }

            let Some(events) = self.events.as_mut() else {
                return Err(FrameError::Unwrapped);
            };
            let event = race_cancel(events.recv(), cancel)
                .await
                .map_err(StreamError::from)?;
            match event {
                Some(event) => self.handle(event),
                None => {
                    return Err(StreamError::UnexpectedEof {
                        expected: wanted,
                        received: self.buffer.len(),
                    }
                    .into())
                }
            }
        }

        let n = bytes.unwrap_or(self.buffer.len());
        Ok(Some(self.buffer.split_to(n).freeze()))
    }

    /// Read exactly `n` bytes.
    pub async fn read_exact(&mut self, n: usize, cancel: Option<&CancellationToken>) -> Result<Bytes> {
        if n == 0 {
            if self.events.is_none() {
                return Err(FrameError::Unwrapped);
            }
            return Ok(Bytes::new());
        }
        match self.read(Some(n), cancel).await? {
            Some(data) => Ok(data),
            None => Err(StreamError::UnexpectedEof {
                expected: n,
                received: 0,
            }
            .into()),
        }
    }

    /// Send `data`, waiting for a drain if the stream reports backpressure.
    pub async fn write(&mut self, data: impl Into<Bytes>, cancel: Option<&CancellationToken>) -> Result<()> {
        if self.events.is_none() {
            return Err(FrameError::Unwrapped);
        }
        if !self.stream.send(data)? {
            trace!(stream = %self.stream.id(), "waiting for drain");
            self.stream.wait_drain(cancel).await?;
        }
        Ok(())
    }

    /// Detach from the stream and hand it back.
    ///
    /// Unread bytes are put back at the head of the stream's read buffer so
    /// the next consumer sees them first. Every later call on this helper
    /// fails with [`FrameError::Unwrapped`].
    pub fn unwrap(&mut self) -> Result<MessageStream> {
        let Some(mut events) = self.events.take() else {
            return Err(FrameError::Unwrapped);
        };
        while let Some(event) = events.try_recv() {
            if let StreamEvent::Message(data) = event {
                self.buffer.extend_from_slice(&data);
            }
        }
        drop(events);

        if !self.buffer.is_empty() {
            let unread = self.buffer.split().freeze();
            if let Err(err) = self.stream.unshift(unread) {
                debug!(stream = %self.stream.id(), error = %err, "dropping unread bytes on unwrap");
            }
        }
        Ok(self.stream.clone())
    }

    fn pump(&mut self) {
        while let Some(event) = self.events.as_mut().and_then(Subscription::try_recv) {
            self.handle(event);
        }
    }

    fn handle(&mut self, event: StreamEvent) {
        if let StreamEvent::Message(data) = event {
            self.buffer.extend_from_slice(&data);
            if self.buffer.len() > self.config.max_buffer_size {
                let length = self.buffer.len();
                self.buffer.clear();
                self.overflow = Some(FrameError::BufferOverflow {
                    length,
                    max: self.config.max_buffer_size,
                });
            }
        }
    }

    /// `Some(error)` once no more data can arrive.
    ///
    /// Only meaningful after [`pump`](Self::pump): every message emitted
    /// before the read half closed is already in the subscription.
    fn ended(&self) -> Option<Option<StreamError>> {
        let finished = self.stream.read_status() == ReadStatus::Closed
            || (self.stream.status().is_terminal() && self.stream.read_buffer_len() == 0);
        finished.then(|| self.stream.close_error())
    }
}

#[cfg(test)]
mod tests {
    use streamprims_stream::{stream_pair, StreamConfig};
    use streamprims_transport::QueueConfig;

    use super::*;

    fn pair() -> (MessageStream, MessageStream) {
        stream_pair(StreamConfig::default(), QueueConfig::default())
    }

    #[tokio::test]
    async fn exact_reads_span_message_boundaries() {
        let (a, b) = pair();
        let mut reader = ByteStream::new(b);

        a.send(Bytes::from_static(b"he")).unwrap();
        a.send(Bytes::from_static(b"llo wor")).unwrap();
        a.send(Bytes::from_static(b"ld")).unwrap();

        assert_eq!(reader.read(Some(5), None).await.unwrap().unwrap().as_ref(), b"hello");
        assert_eq!(reader.read(Some(1), None).await.unwrap().unwrap().as_ref(), b" ");
        assert_eq!(reader.read(Some(5), None).await.unwrap().unwrap().as_ref(), b"world");
    }

    #[tokio::test]
    async fn short_stream_is_unexpected_eof() {
        let (a, b) = pair();
        let mut reader = ByteStream::new(b);

        a.send(Bytes::from_static(b"abc")).unwrap();
        a.close_write(None).await.unwrap();

        let err = reader.read(Some(10), None).await.unwrap_err();
        assert!(err.is_unexpected_eof());
    }

    #[tokio::test]
    async fn open_ended_read_returns_buffer_then_none() {
        let (a, b) = pair();
        let mut reader = ByteStream::new(b);

        a.send(Bytes::from_static(b"chunk")).unwrap();
        a.close_write(None).await.unwrap();

        let first = reader.read(None, None).await.unwrap().unwrap();
        assert_eq!(first.as_ref(), b"chunk");
        assert!(reader.read(None, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_surfaces_as_error() {
        let (a, b) = pair();
        let mut reader = ByteStream::new(b);

        a.abort(StreamError::Protocol("going away".into()));

        let err = reader.read(Some(1), None).await.unwrap_err();
        assert!(matches!(err, FrameError::Stream(StreamError::Reset)));
    }

    #[tokio::test]
    async fn overflow_fails_the_read() {
        let (a, b) = pair();
        let mut reader = ByteStream::with_config(b, ByteStreamConfig { max_buffer_size: 4 });

        a.send(Bytes::from_static(b"12345")).unwrap();

        let err = reader.read(Some(10), None).await.unwrap_err();
        assert!(matches!(err, FrameError::BufferOverflow { length: 5, max: 4 }));
    }

    #[tokio::test]
    async fn cancelled_read_is_aborted() {
        let (_a, b) = pair();
        let mut reader = ByteStream::new(b);
        let token = CancellationToken::new();
        token.cancel();

        let err = reader.read(Some(1), Some(&token)).await.unwrap_err();
        assert!(matches!(err, FrameError::Stream(StreamError::Aborted)));
    }

    #[tokio::test]
    async fn unwrap_returns_unread_bytes_to_the_stream() {
        let (a, b) = pair();
        let mut bytes = ByteStream::new(b);

        a.send(Bytes::from_static(b"headbody")).unwrap();
        assert_eq!(bytes.read(Some(4), None).await.unwrap().unwrap().as_ref(), b"head");

        let stream = bytes.unwrap().unwrap();
        assert!(matches!(bytes.read(None, None).await, Err(FrameError::Unwrapped)));
        assert!(matches!(bytes.write(Bytes::new(), None).await, Err(FrameError::Unwrapped)));

        let mut next = ByteStream::new(stream);
        assert_eq!(next.read(Some(4), None).await.unwrap().unwrap().as_ref(), b"body");
    }
}
