use std::time::Duration;

/// Default read buffer limit: 4 MiB.
pub const DEFAULT_MAX_READ_BUFFER_LENGTH: usize = 4 * 1024 * 1024;

/// Default inactivity window before a watched stream is aborted.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);

/// Which end opened the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Opened by the remote end.
    Inbound,
    /// Opened locally.
    #[default]
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits and defaults for a [`MessageStream`](crate::MessageStream).
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Abort with a buffer error once unread data exceeds this many bytes.
    pub max_read_buffer_length: usize,
    /// Abort with a buffer error once unsent data exceeds this many bytes
    /// while the transport is applying backpressure. `None` means unlimited.
    pub max_write_buffer_length: Option<usize>,
    /// Largest chunk handed to the transport in one `send_data` call.
    /// `None` hands over the whole write buffer at once.
    pub max_message_size: Option<usize>,
    /// Window used by [`enforce_inactivity_timeout`](crate::enforce_inactivity_timeout).
    pub inactivity_timeout: Duration,
    /// Which end opened the stream.
    pub direction: Direction,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_read_buffer_length: DEFAULT_MAX_READ_BUFFER_LENGTH,
            max_write_buffer_length: None,
            max_message_size: None,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            direction: Direction::Outbound,
        }
    }
}

impl StreamConfig {
    /// Copy of this config with a different direction.
    pub fn with_direction(&self, direction: Direction) -> Self {
        Self {
            direction,
            ..self.clone()
        }
    }
}
