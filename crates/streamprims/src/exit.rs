use std::fmt;
use std::io;

use streamprims_frame::FrameError;
use streamprims_mux::MuxError;
use streamprims_stream::StreamError;
use streamprims_transport::TransportError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: &io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: &TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn stream_error(context: &str, err: StreamError) -> CliError {
    match err {
        StreamError::Transport(source) => transport_error(context, &source),
        StreamError::BufferOverflow { .. }
        | StreamError::UnexpectedEof { .. }
        | StreamError::Protocol(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        StreamError::InactivityTimeout(_) | StreamError::Aborted => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        StreamError::Reset | StreamError::State { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, &source),
        FrameError::Stream(source) => stream_error(context, source),
        FrameError::InvalidLength
        | FrameError::LengthTooLong { .. }
        | FrameError::DataTooLong { .. }
        | FrameError::BufferOverflow { .. }
        | FrameError::Codec(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Stream(source) => stream_error(context, source),
        MuxError::Frame(source) => frame_error(context, source),
        MuxError::DuplicateStream(_)
        | MuxError::UnknownStream(_)
        | MuxError::Protocol(_)
        | MuxError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        MuxError::Closed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}
