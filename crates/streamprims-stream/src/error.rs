use std::sync::Arc;
use std::time::Duration;

use streamprims_transport::{Cancelled, TransportError};

/// Errors produced by a [`MessageStream`](crate::MessageStream).
///
/// The type is `Clone` so the same failure can be handed to every event
/// subscriber and to every pending waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// The operation is not permitted in the current half-stream status.
    #[error("cannot {operation}: local {side} status is {status}")]
    State {
        operation: &'static str,
        side: &'static str,
        status: &'static str,
    },

    /// A read or write buffer grew past its configured limit.
    #[error("{buffer} buffer length {length} exceeded limit {limit}")]
    BufferOverflow {
        buffer: &'static str,
        length: usize,
        limit: usize,
    },

    /// The remote end reset the stream.
    #[error("stream reset by remote end")]
    Reset,

    /// The stream ended before the requested number of bytes arrived.
    #[error("unexpected end of stream: expected {expected} bytes, received {received}")]
    UnexpectedEof { expected: usize, received: usize },

    /// The operation was cancelled by its caller.
    #[error("operation aborted")]
    Aborted,

    /// No data was sent or received within the configured window.
    #[error("no activity for {0:?}")]
    InactivityTimeout(Duration),

    /// The transport claimed it could send more after a partial write.
    #[error("transport accepted {sent} of {requested} bytes but reported it can send more")]
    InvalidSendResult { sent: usize, requested: usize },

    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(Arc<TransportError>),

    /// An upper layer aborted the stream for a protocol-level reason.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StreamError {
    /// Whether the error describes a stream that can no longer carry data.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::State { .. } | Self::Aborted)
    }

    /// Whether retrying the operation later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Whether this is a remote reset.
    pub fn is_reset(&self) -> bool {
        matches!(self, Self::Reset)
    }
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        Self::Transport(Arc::new(err))
    }
}

impl From<Cancelled> for StreamError {
    fn from(_: Cancelled) -> Self {
        Self::Aborted
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
