use streamprims_frame::FrameError;
use streamprims_stream::StreamError;

/// Errors that can occur in muxer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The muxer is closing or closed.
    #[error("muxer closed")]
    Closed,

    /// A child stream with this id is already active.
    #[error("stream {0} already exists")]
    DuplicateStream(String),

    /// No active child stream has this id.
    #[error("no stream found for {0}")]
    UnknownStream(String),

    /// The remote end broke the muxing protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Stream-level error.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MuxError {
    /// The error to abort streams with when this error tears the muxer down.
    pub fn into_stream_error(self) -> StreamError {
        match self {
            Self::Stream(err) => err,
            Self::Frame(FrameError::Stream(err)) => err,
            other => StreamError::Protocol(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_errors_pass_through() {
        let err = MuxError::from(StreamError::Reset).into_stream_error();
        assert!(matches!(err, StreamError::Reset));
    }

    #[test]
    fn other_errors_become_protocol_errors() {
        let err = MuxError::DuplicateStream("2".into()).into_stream_error();
        match err {
            StreamError::Protocol(message) => assert_eq!(message, "stream 2 already exists"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
