//! Stream statuses, lifecycle timestamps, and the event channel.

use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::StreamError;

/// Overall stream status. `Closed`, `Aborted` and `Reset` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Open,
    Closing,
    Closed,
    Aborted,
    Reset,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Aborted => "aborted",
            Self::Reset => "reset",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Aborted | Self::Reset)
    }
}

/// Status of the local read half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Readable,
    Paused,
    Closing,
    Closed,
}

impl ReadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Readable => "readable",
            Self::Paused => "paused",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// `Closing` or `Closed`.
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// Status of the local write half, or of either remote half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Writable,
    Closing,
    Closed,
}

impl WriteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Writable => "writable",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// `Closing` or `Closed`.
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// Lifecycle timestamps. Each optional field is set at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    pub open: Instant,
    pub close: Option<Instant>,
    pub abort: Option<Instant>,
    pub reset: Option<Instant>,
    pub close_read: Option<Instant>,
    pub close_write: Option<Instant>,
    pub remote_close_read: Option<Instant>,
    pub remote_close_write: Option<Instant>,
    /// Last time data was sent or received.
    pub last_activity: Instant,
}

impl Timeline {
    pub(crate) fn new() -> Self {
        let now = Instant::now();
        Self {
            open: now,
            close: None,
            abort: None,
            reset: None,
            close_read: None,
            close_write: None,
            remote_close_read: None,
            remote_close_write: None,
            last_activity: now,
        }
    }

    /// Duration the stream has been, or was, open.
    pub fn lifetime(&self) -> std::time::Duration {
        self.close.unwrap_or_else(Instant::now) - self.open
    }
}

pub(crate) fn mark(slot: &mut Option<Instant>) {
    if slot.is_none() {
        *slot = Some(Instant::now());
    }
}

/// A notification emitted by a [`MessageStream`](crate::MessageStream).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Received bytes, in arrival order.
    Message(Bytes),
    /// The stream reached a terminal status. `local` is `true` when the
    /// close was initiated on this end.
    Close {
        error: Option<StreamError>,
        local: bool,
    },
    /// The stream was aborted. Always followed by `Close`.
    Abort(StreamError),
    /// The transport can accept data again.
    Drain,
    /// The remote end will send no more data.
    RemoteCloseWrite,
    /// The local read half closed.
    CloseRead,
    /// The local write half closed.
    CloseWrite,
    /// The write buffer was fully handed to the transport.
    Idle,
}

/// Receiving end of a stream event subscription.
///
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<StreamEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. `None` once the stream itself is gone.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        self.rx.poll_recv(cx)
    }
}

pub(crate) struct Subscriber {
    pub(crate) tx: mpsc::UnboundedSender<StreamEvent>,
    pub(crate) messages: bool,
}
