//! Many logical streams over one connection.
//!
//! [`StreamMuxer`] owns the connection and the set of active child streams.
//! The wire format is supplied by a [`MuxerProtocol`]: it creates outbound
//! children and interprets every chunk the connection receives.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use futures_util::future::join_all;
use streamprims_stream::{MessageStream, StreamError, StreamEvent, Subscription};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{MuxError, Result};

/// Lifecycle of a [`StreamMuxer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerStatus {
    Open,
    Closing,
    Closed,
}

impl MuxerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// Options for [`StreamMuxer::create_stream`].
#[derive(Debug, Clone, Default)]
pub struct CreateStreamOptions {
    /// Application protocol the stream will speak, announced to the remote
    /// end when the muxing protocol supports it.
    pub protocol: Option<String>,
}

/// A notification emitted by a [`StreamMuxer`].
#[derive(Debug, Clone)]
pub enum MuxerEvent {
    /// The remote end opened a new stream.
    Stream(MessageStream),
    /// The connection can accept data again.
    Drain,
    /// The muxer closed.
    Close,
}

/// The hooks a concrete muxing protocol supplies.
pub trait MuxerProtocol: Sized + Send + Sync + 'static {
    /// Protocol identifier, e.g. `/mock-muxer/1.0.0`.
    fn protocol(&self) -> &str;

    /// Produce a new outbound child stream.
    ///
    /// The muxer registers the returned stream; implementations must not.
    fn on_create_stream(
        &self,
        muxer: &StreamMuxer<Self>,
        options: CreateStreamOptions,
    ) -> impl Future<Output = Result<MessageStream>> + Send;

    /// Interpret bytes received on the connection.
    ///
    /// Route payloads to children with [`MessageStream::on_data`] and announce
    /// new inbound children with [`StreamMuxer::on_remote_stream`]. An error
    /// aborts both the muxer and the connection.
    fn on_data(&self, muxer: &StreamMuxer<Self>, data: Bytes) -> Result<()>;
}

struct MuxState {
    status: MuxerStatus,
    streams: Vec<MessageStream>,
    subscribers: Vec<mpsc::UnboundedSender<MuxerEvent>>,
}

impl MuxState {
    fn emit(&mut self, event: MuxerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Move to `closed`, emitting `Close` the first time.
    fn set_closed(&mut self) {
        if self.status != MuxerStatus::Closed {
            self.status = MuxerStatus::Closed;
            self.emit(MuxerEvent::Close);
        }
    }
}

struct Shared<P> {
    protocol: P,
    connection: MessageStream,
    state: Mutex<MuxState>,
}

/// Multiplexes child [`MessageStream`]s over one connection stream.
///
/// Cloning yields another handle to the same muxer.
pub struct StreamMuxer<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for StreamMuxer<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P> std::fmt::Debug for StreamMuxer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("StreamMuxer")
            .field("connection", &self.shared.connection.id())
            .field("status", &state.status)
            .field("streams", &state.streams.len())
            .finish()
    }
}

/// Events for one muxer subscriber. Dropping it unsubscribes.
#[derive(Debug)]
pub struct MuxerSubscription {
    rx: mpsc::UnboundedReceiver<MuxerEvent>,
}

impl MuxerSubscription {
    /// Wait for the next event. `None` once the muxer is gone.
    pub async fn recv(&mut self) -> Option<MuxerEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MuxerEvent> {
        self.rx.try_recv().ok()
    }
}

impl<P> StreamMuxer<P> {
    fn state(&self) -> MutexGuard<'_, MuxState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The muxing protocol driving this muxer.
    pub fn protocol(&self) -> &P {
        &self.shared.protocol
    }

    /// The underlying connection.
    pub fn connection(&self) -> &MessageStream {
        &self.shared.connection
    }

    pub fn status(&self) -> MuxerStatus {
        self.state().status
    }

    /// Active child streams, oldest first.
    pub fn streams(&self) -> Vec<MessageStream> {
        self.state().streams.clone()
    }

    /// The active child stream with this id.
    pub fn stream(&self, id: &str) -> Option<MessageStream> {
        self.state().streams.iter().find(|s| s.id() == id).cloned()
    }

    pub fn subscribe(&self) -> MuxerSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().subscribers.push(tx);
        MuxerSubscription { rx }
    }

    /// Send raw bytes on the connection.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<bool> {
        Ok(self.shared.connection.send(data)?)
    }

    /// Register a stream opened by the remote end and announce it to
    /// subscribers.
    pub fn on_remote_stream(&self, stream: MessageStream) -> Result<()>
    where
        P: Send + Sync + 'static,
    {
        self.register(stream.clone())?;
        debug!(stream = %stream.id(), "inbound stream opened");
        self.state().emit(MuxerEvent::Stream(stream));
        Ok(())
    }

    /// Gracefully close every child, then mark the muxer closed.
    ///
    /// Children that fail to close, including when `cancel` fires, are
    /// aborted. The muxer ends `closed` either way.
    pub async fn close(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        let streams = {
            let mut state = self.state();
            if state.status != MuxerStatus::Open {
                return Ok(());
            }
            state.status = MuxerStatus::Closing;
            state.streams.clone()
        };
        debug!(connection = %self.shared.connection.id(), streams = streams.len(), "closing muxer");

        let results = join_all(streams.iter().map(|stream| stream.close(cancel))).await;
        let mut first_error = None;
        for (stream, result) in streams.iter().zip(results) {
            if let Err(err) = result {
                debug!(stream = %stream.id(), error = %err, "child failed to close, aborting");
                stream.abort(err.clone());
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        {
            let mut state = self.state();
            state.streams.retain(|s| !s.status().is_terminal());
            state.set_closed();
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Abort every child immediately and mark the muxer closed. Idempotent.
    pub fn abort(&self, err: StreamError) {
        let streams = {
            let mut state = self.state();
            if state.status == MuxerStatus::Closed {
                return;
            }
            state.status = MuxerStatus::Closing;
            state.streams.clone()
        };
        warn!(connection = %self.shared.connection.id(), error = %err, "muxer aborted");

        for stream in &streams {
            stream.abort(err.clone());
        }

        let mut state = self.state();
        state.streams.retain(|s| !s.status().is_terminal());
        state.set_closed();
    }

    /// The connection closed without error: close every child.
    pub fn on_transport_closed(&self) {
        let streams = self.state().streams.clone();
        debug!(connection = %self.shared.connection.id(), streams = streams.len(), "connection closed");

        for stream in &streams {
            stream.on_transport_closed(None);
        }

        let mut state = self.state();
        state.streams.retain(|s| !s.status().is_terminal());
        state.set_closed();
    }

    fn register(&self, stream: MessageStream) -> Result<()>
    where
        P: Send + Sync + 'static,
    {
        // Subscribe before the terminal check so a close racing registration
        // still reaches the cleanup task.
        let mut events = stream.subscribe_lifecycle();
        {
            let mut state = self.state();
            if state.status != MuxerStatus::Open {
                return Err(MuxError::Closed);
            }
            if state.streams.iter().any(|s| s.id() == stream.id()) {
                return Err(MuxError::DuplicateStream(stream.id().to_string()));
            }
            if stream.status().is_terminal() {
                return Ok(());
            }
            state.streams.push(stream.clone());
        }
        trace!(stream = %stream.id(), direction = ?stream.direction(), "stream registered");

        let weak = Arc::downgrade(&self.shared);
        let child = stream.downgrade();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !matches!(event, StreamEvent::Close { .. }) {
                    continue;
                }
                if let (Some(shared), Some(child)) = (weak.upgrade(), child.upgrade()) {
                    let mut state = shared
                        .state
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    state.streams.retain(|s| !s.ptr_eq(&child));
                    trace!(stream = %child.id(), "stream removed");
                }
                break;
            }
        });
        Ok(())
    }
}

impl<P: MuxerProtocol> StreamMuxer<P> {
    /// Wrap `connection` and start dispatching its events to `protocol`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(connection: MessageStream, protocol: P) -> Self {
        let events = connection.subscribe();
        let muxer = Self {
            shared: Arc::new(Shared {
                protocol,
                connection,
                state: Mutex::new(MuxState {
                    status: MuxerStatus::Open,
                    streams: Vec::new(),
                    subscribers: Vec::new(),
                }),
            }),
        };
        debug!(
            connection = %muxer.shared.connection.id(),
            protocol = muxer.shared.protocol.protocol(),
            "muxer started"
        );

        tokio::spawn(dispatch_connection(Arc::downgrade(&muxer.shared), events));
        muxer
    }

    /// Open a new outbound child stream.
    pub async fn create_stream(&self, options: CreateStreamOptions) -> Result<MessageStream> {
        if self.status() != MuxerStatus::Open {
            return Err(MuxError::Closed);
        }
        let stream = self.shared.protocol.on_create_stream(self, options).await?;
        if let Err(err) = self.register(stream.clone()) {
            stream.abort(StreamError::Protocol(err.to_string()));
            return Err(err);
        }
        Ok(stream)
    }
}

async fn dispatch_connection<P: MuxerProtocol>(
    shared: Weak<Shared<P>>,
    mut events: Subscription,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let muxer = StreamMuxer { shared };

        match event {
            StreamEvent::Message(data) => {
                if muxer.status() == MuxerStatus::Closed {
                    trace!(bytes = data.len(), "muxer closed, dropping data");
                    continue;
                }
                if let Err(err) = muxer.shared.protocol.on_data(&muxer, data) {
                    let err = err.into_stream_error();
                    muxer.abort(err.clone());
                    muxer.shared.connection.abort(err);
                    break;
                }
            }
            StreamEvent::Close { .. } => {
                if muxer.status() == MuxerStatus::Open {
                    muxer.on_transport_closed();
                }
                break;
            }
            StreamEvent::Drain => {
                let streams = {
                    let mut state = muxer.state();
                    state.emit(MuxerEvent::Drain);
                    state.streams.clone()
                };
                for stream in streams {
                    stream.on_transport_drain();
                }
            }
            _ => {}
        }
    }
}
