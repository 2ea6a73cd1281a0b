//! In-memory reference muxing protocol.
//!
//! Every muxer message is one length-prefixed JSON document naming the
//! child stream it belongs to. Useful for tests and demos; it is not meant
//! to interoperate with anything else.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use streamprims_frame::{encode_frame, LengthPrefixedConfig, LengthPrefixedDecoder};
use streamprims_stream::{Direction, MessageStream, StreamConfig, StreamError};
use streamprims_transport::{SendResult, Transport, TransportError};
use tracing::{trace, warn};

use crate::error::{MuxError, Result};
use crate::muxer::{CreateStreamOptions, MuxerProtocol, StreamMuxer};

/// Protocol identifier announced by [`MockMuxer`].
pub const MOCK_MUXER_PROTOCOL: &str = "/mock-muxer/1.0.0";

/// Largest data chunk carried by one message: 4 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Undecoded input allowed to pile up before the muxer aborts: 10 MiB.
pub const DEFAULT_MAX_INPUT_BUFFER: usize = 10 * 1024 * 1024;

// JSON fields around a data chunk.
const MESSAGE_OVERHEAD: usize = 128;

/// A message exchanged between two [`MockMuxer`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MuxMessage {
    Create {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
    },
    Data {
        id: String,
        #[serde(with = "hex::serde")]
        chunk: Vec<u8>,
    },
    Reset {
        id: String,
    },
    CloseWrite {
        id: String,
    },
    CloseRead {
        id: String,
    },
    Pause {
        id: String,
    },
    Resume {
        id: String,
    },
}

impl MuxMessage {
    /// The child stream this message is addressed to.
    pub fn id(&self) -> &str {
        match self {
            Self::Create { id, .. }
            | Self::Data { id, .. }
            | Self::Reset { id }
            | Self::CloseWrite { id }
            | Self::CloseRead { id }
            | Self::Pause { id }
            | Self::Resume { id } => id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Data { .. } => "data",
            Self::Reset { .. } => "reset",
            Self::CloseWrite { .. } => "closeWrite",
            Self::CloseRead { .. } => "closeRead",
            Self::Pause { .. } => "pause",
            Self::Resume { .. } => "resume",
        }
    }

    /// Serialize and length-prefix this message.
    pub fn encode(&self) -> Result<Bytes> {
        let json = serde_json::to_vec(self)?;
        let mut buf = BytesMut::new();
        encode_frame(&json, &mut buf);
        Ok(buf.freeze())
    }
}

/// Configuration for a [`MockMuxer`].
#[derive(Debug, Clone)]
pub struct MockMuxerConfig {
    /// Child streams split writes into chunks no larger than this.
    pub max_message_size: usize,
    /// Abort once more than this much undecoded input is buffered.
    pub max_input_buffer: usize,
    /// Base configuration for child streams.
    pub stream: StreamConfig,
}

impl Default for MockMuxerConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_input_buffer: DEFAULT_MAX_INPUT_BUFFER,
            stream: StreamConfig::default(),
        }
    }
}

/// Child stream transport: wraps every call in a [`MuxMessage`] sent on the
/// shared connection.
struct MockStreamTransport {
    id: String,
    connection: MessageStream,
}

impl MockStreamTransport {
    fn send_message(&self, message: MuxMessage) -> streamprims_transport::Result<bool> {
        trace!(stream = %self.id, kind = message.kind(), "send message");
        let encoded = message
            .encode()
            .map_err(|err| TransportError::Rejected(err.to_string()))?;
        self.connection.send(encoded).map_err(|err| match err {
            StreamError::State { .. } => TransportError::Closed,
            other => TransportError::Rejected(other.to_string()),
        })
    }
}

impl Transport for MockStreamTransport {
    fn send_data(&self, data: Bytes) -> streamprims_transport::Result<SendResult> {
        let len = data.len();
        let can_send_more = self.send_message(MuxMessage::Data {
            id: self.id.clone(),
            chunk: data.to_vec(),
        })?;
        Ok(SendResult {
            sent_bytes: len,
            can_send_more,
        })
    }

    fn send_reset(
        &self,
        _reason: &(dyn std::error::Error + Send + Sync),
    ) -> streamprims_transport::Result<()> {
        self.send_message(MuxMessage::Reset { id: self.id.clone() })
            .map(drop)
    }

    fn send_pause(&self) -> streamprims_transport::Result<()> {
        self.send_message(MuxMessage::Pause { id: self.id.clone() })
            .map(drop)
    }

    fn send_resume(&self) -> streamprims_transport::Result<()> {
        self.send_message(MuxMessage::Resume { id: self.id.clone() })
            .map(drop)
    }

    fn send_close_write(&self) -> streamprims_transport::Result<()> {
        self.send_message(MuxMessage::CloseWrite { id: self.id.clone() })
            .map(drop)
    }

    fn send_close_read(&self) -> streamprims_transport::Result<()> {
        self.send_message(MuxMessage::CloseRead { id: self.id.clone() })
            .map(drop)
    }
}

/// Reference [`MuxerProtocol`] speaking [`MuxMessage`]s.
///
/// Outbound stream ids are even on the outbound end of a connection and odd
/// on the inbound end, so the two sides never collide.
pub struct MockMuxer {
    config: MockMuxerConfig,
    connection: MessageStream,
    decoder: Mutex<LengthPrefixedDecoder>,
    next_stream_id: AtomicU64,
}

impl std::fmt::Debug for MockMuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockMuxer")
            .field("connection", &self.connection.id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MockMuxer {
    /// Start a muxer over `connection` with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start(connection: MessageStream) -> StreamMuxer<Self> {
        Self::start_with_config(connection, MockMuxerConfig::default())
    }

    pub fn start_with_config(connection: MessageStream, config: MockMuxerConfig) -> StreamMuxer<Self> {
        let first_id = match connection.direction() {
            Direction::Outbound => 0,
            Direction::Inbound => 1,
        };
        let decoder = LengthPrefixedDecoder::with_config(LengthPrefixedConfig {
            // Hex doubles the chunk size.
            max_data_length: config.max_message_size.saturating_mul(2) + MESSAGE_OVERHEAD,
            max_buffer_size: Some(config.max_input_buffer),
            ..LengthPrefixedConfig::default()
        });
        let protocol = Self {
            config,
            connection: connection.clone(),
            decoder: Mutex::new(decoder),
            next_stream_id: AtomicU64::new(first_id),
        };
        StreamMuxer::new(connection, protocol)
    }

    pub fn config(&self) -> &MockMuxerConfig {
        &self.config
    }

    fn decoder(&self) -> MutexGuard<'_, LengthPrefixedDecoder> {
        self.decoder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn child(&self, id: String, direction: Direction) -> MessageStream {
        trace!(stream = %id, direction = ?direction, "create stream");
        let config = StreamConfig {
            max_message_size: Some(self.config.max_message_size),
            ..self.config.stream.with_direction(direction)
        };
        let transport = MockStreamTransport {
            id: id.clone(),
            connection: self.connection.clone(),
        };
        MessageStream::new(id, transport, config)
    }

    fn on_message(&self, muxer: &StreamMuxer<Self>, message: MuxMessage) -> Result<()> {
        trace!(stream = %message.id(), kind = message.kind(), "incoming message");

        let mut stream = muxer.stream(message.id());
        if let MuxMessage::Create { id, .. } = &message {
            if stream.is_some() {
                return Err(MuxError::DuplicateStream(id.clone()));
            }
            let child = self.child(id.clone(), Direction::Inbound);
            muxer.on_remote_stream(child.clone())?;
            stream = Some(child);
        }

        let Some(stream) = stream else {
            warn!(stream = %message.id(), kind = message.kind(), "no stream found, dropping message");
            return Ok(());
        };

        match message {
            MuxMessage::Create { .. } => {}
            MuxMessage::Data { chunk, .. } => stream.on_data(chunk),
            MuxMessage::Reset { .. } => stream.on_remote_reset(),
            MuxMessage::CloseWrite { .. } => stream.on_remote_close_write(),
            MuxMessage::CloseRead { .. } => stream.on_remote_close_read(),
            // Flow control is enforced by the connection's own backpressure.
            MuxMessage::Pause { .. } | MuxMessage::Resume { .. } => {}
        }
        Ok(())
    }
}

impl MuxerProtocol for MockMuxer {
    fn protocol(&self) -> &str {
        MOCK_MUXER_PROTOCOL
    }

    async fn on_create_stream(
        &self,
        _muxer: &StreamMuxer<Self>,
        options: CreateStreamOptions,
    ) -> Result<MessageStream> {
        let id = self.next_stream_id.fetch_add(2, Ordering::Relaxed) + 2;
        let id = id.to_string();
        let stream = self.child(id.clone(), Direction::Outbound);

        let create = MuxMessage::Create {
            id,
            protocol: options.protocol,
        };
        if let Err(err) = self.connection.send(create.encode()?) {
            stream.abort(err.clone());
            return Err(err.into());
        }
        Ok(stream)
    }

    fn on_data(&self, muxer: &StreamMuxer<Self>, data: Bytes) -> Result<()> {
        let messages = {
            let mut decoder = self.decoder();
            let messages = decoder
                .decode(&data)?
                .map(|frame| Ok(serde_json::from_slice::<MuxMessage>(&frame?)?))
                .collect::<Result<Vec<_>>>()?;
            messages
        };

        for message in messages {
            self.on_message(muxer, message)?;
        }
        Ok(())
    }
}
