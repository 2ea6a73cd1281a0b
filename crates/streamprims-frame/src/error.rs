use streamprims_stream::StreamError;

/// Errors that can occur while framing, reading or writing messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The length prefix is not a valid varint.
    #[error("invalid message length")]
    InvalidLength,

    /// The length prefix uses more bytes than allowed.
    #[error("message length prefix too long ({length} bytes, max {max})")]
    LengthTooLong { length: usize, max: usize },

    /// The declared payload length exceeds the configured maximum.
    #[error("message length too long ({length} bytes, max {max})")]
    DataTooLong { length: u64, max: usize },

    /// Buffered, undecoded input grew past the configured maximum.
    #[error("read buffer overflow ({length} bytes, max {max})")]
    BufferOverflow { length: usize, max: usize },

    /// The helper was detached from its stream.
    #[error("stream was unwrapped")]
    Unwrapped,

    /// A structured message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The underlying message stream failed.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl FrameError {
    /// Whether the stream ended before a complete message was read.
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, Self::Stream(StreamError::UnexpectedEof { .. }))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
