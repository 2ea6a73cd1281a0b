/// Errors reported by a transport capability.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The underlying resource is closed and accepts no more messages.
    #[error("transport closed")]
    Closed,

    /// The underlying resource refused the message.
    #[error("transport rejected message: {0}")]
    Rejected(String),

    /// An I/O error occurred on the underlying resource.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
