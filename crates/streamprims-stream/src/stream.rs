//! The half-closable, flow-controlled message stream.
//!
//! All bookkeeping lives behind one mutex. The lock is never held across a
//! transport call or an await point, so a transport may call back into the
//! same stream from inside `send_data`. Events are pushed to per-subscriber
//! unbounded channels while the lock is held, which keeps delivery order equal
//! to state-change order without ever running subscriber code inline.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use streamprims_transport::{race_cancel, Transport};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::buffer::ByteList;
use crate::config::{Direction, StreamConfig};
use crate::error::{Result, StreamError};
use crate::event::{
    mark, ReadStatus, StreamEvent, StreamStatus, Subscriber, Subscription, Timeline, WriteStatus,
};
use crate::reader::MessageStreamReader;

struct State {
    status: StreamStatus,
    read_status: ReadStatus,
    write_status: WriteStatus,
    remote_read_status: WriteStatus,
    remote_write_status: WriteStatus,
    timeline: Timeline,
    read_buffer: ByteList,
    write_buffer: ByteList,
    writable_needs_drain: bool,
    sending: bool,
    close_error: Option<StreamError>,
    subscribers: Vec<Subscriber>,
}

impl State {
    fn new() -> Self {
        Self {
            status: StreamStatus::Open,
            read_status: ReadStatus::Readable,
            write_status: WriteStatus::Writable,
            remote_read_status: WriteStatus::Writable,
            remote_write_status: WriteStatus::Writable,
            timeline: Timeline::new(),
            read_buffer: ByteList::new(),
            write_buffer: ByteList::new(),
            writable_needs_drain: false,
            sending: false,
            close_error: None,
            subscribers: Vec::new(),
        }
    }

    fn emit(&mut self, event: StreamEvent) {
        self.subscribers.retain(|sub| !sub.tx.is_closed());
        let is_message = matches!(event, StreamEvent::Message(_));
        for sub in &self.subscribers {
            if is_message && !sub.messages {
                continue;
            }
            let _ = sub.tx.send(event.clone());
        }
    }

    fn has_message_listeners(&self) -> bool {
        self.subscribers
            .iter()
            .any(|sub| sub.messages && !sub.tx.is_closed())
    }

    fn touch(&mut self) {
        self.timeline.last_activity = Instant::now();
    }

    /// Mark the read half closed without emitting an event. Used on the
    /// terminal paths, where the `Close` event speaks for both halves.
    fn shut_read(&mut self) -> bool {
        if self.read_status == ReadStatus::Closed {
            return false;
        }
        self.read_status = ReadStatus::Closed;
        mark(&mut self.timeline.close_read);
        true
    }

    fn shut_write(&mut self) -> bool {
        if self.write_status == WriteStatus::Closed {
            return false;
        }
        self.write_status = WriteStatus::Closed;
        mark(&mut self.timeline.close_write);
        true
    }

    fn close_read_half(&mut self) {
        if self.shut_read() {
            self.emit(StreamEvent::CloseRead);
        }
    }

    fn close_write_half(&mut self) {
        if self.shut_write() {
            self.emit(StreamEvent::CloseWrite);
        }
    }

    /// Close the read half once the remote end stopped writing and nothing
    /// is left to hand out.
    fn maybe_close_read(&mut self) {
        if self.read_buffer.is_empty()
            && self.remote_write_status == WriteStatus::Closed
            && self.read_status == ReadStatus::Readable
        {
            self.close_read_half();
        }
    }

    /// Emit buffered read data to message listeners.
    ///
    /// Returns the overflow error when the read buffer exceeds `limit`; the
    /// caller aborts after releasing the lock.
    fn dispatch_read_buffer(&mut self, limit: usize) -> Result<()> {
        if self.has_message_listeners()
            && !self.read_buffer.is_empty()
            && self.read_status != ReadStatus::Paused
        {
            if self.read_status.is_closing() {
                self.read_buffer.clear();
            } else {
                let data = self.read_buffer.take_all();
                self.emit(StreamEvent::Message(data));
            }
        }

        self.maybe_close_read();

        let length = self.read_buffer.len();
        if length > limit {
            return Err(StreamError::BufferOverflow {
                buffer: "read",
                length,
                limit,
            });
        }
        Ok(())
    }

    fn check_write_buffer(&self, limit: Option<usize>) -> Result<()> {
        match limit {
            Some(limit) if self.write_buffer.len() > limit => Err(StreamError::BufferOverflow {
                buffer: "write",
                length: self.write_buffer.len(),
                limit,
            }),
            _ => Ok(()),
        }
    }

    fn read_state_error(&self, operation: &'static str) -> StreamError {
        StreamError::State {
            operation,
            side: "read",
            status: self.read_status.as_str(),
        }
    }

    fn write_state_error(&self, operation: &'static str) -> StreamError {
        StreamError::State {
            operation,
            side: "write",
            status: self.write_status.as_str(),
        }
    }
}

struct Shared {
    id: String,
    config: StreamConfig,
    transport: Box<dyn Transport>,
    state: Mutex<State>,
    changed: Notify,
}

/// A bidirectional, half-closable byte-message stream over an abstract
/// [`Transport`].
///
/// Cloning yields another handle to the same stream.
#[derive(Clone)]
pub struct MessageStream {
    shared: Arc<Shared>,
}

/// A non-owning handle to a [`MessageStream`].
#[derive(Clone)]
pub struct WeakMessageStream {
    shared: Weak<Shared>,
}

impl WeakMessageStream {
    pub fn upgrade(&self) -> Option<MessageStream> {
        self.shared.upgrade().map(|shared| MessageStream { shared })
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MessageStream")
            .field("id", &self.shared.id)
            .field("direction", &self.shared.config.direction)
            .field("status", &state.status)
            .field("read_status", &state.read_status)
            .field("write_status", &state.write_status)
            .finish_non_exhaustive()
    }
}

impl MessageStream {
    /// Create an open stream that sends through `transport`.
    pub fn new(id: impl Into<String>, transport: impl Transport + 'static, config: StreamConfig) -> Self {
        let id = id.into();
        debug!(stream = %id, direction = %config.direction, "stream opened");
        Self {
            shared: Arc::new(Shared {
                id,
                config,
                transport: Box::new(transport),
                state: Mutex::new(State::new()),
                changed: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        self.shared.changed.notify_waiters();
    }

    pub fn downgrade(&self) -> WeakMessageStream {
        WeakMessageStream {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Whether both handles refer to the same stream.
    pub fn ptr_eq(&self, other: &MessageStream) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn direction(&self) -> Direction {
        self.shared.config.direction
    }

    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    pub fn status(&self) -> StreamStatus {
        self.state().status
    }

    pub fn read_status(&self) -> ReadStatus {
        self.state().read_status
    }

    pub fn write_status(&self) -> WriteStatus {
        self.state().write_status
    }

    pub fn remote_read_status(&self) -> WriteStatus {
        self.state().remote_read_status
    }

    pub fn remote_write_status(&self) -> WriteStatus {
        self.state().remote_write_status
    }

    pub fn timeline(&self) -> Timeline {
        self.state().timeline
    }

    pub fn read_buffer_len(&self) -> usize {
        self.state().read_buffer.len()
    }

    pub fn write_buffer_len(&self) -> usize {
        self.state().write_buffer.len()
    }

    /// Whether the transport asked the stream to wait for a drain.
    pub fn writable_needs_drain(&self) -> bool {
        self.state().writable_needs_drain
    }

    /// The error the stream terminated with, if any.
    pub fn close_error(&self) -> Option<StreamError> {
        self.state().close_error.clone()
    }

    /// Whether anyone is currently subscribed to data messages.
    pub fn has_message_listeners(&self) -> bool {
        self.state().has_message_listeners()
    }

    /// Subscribe to every event, including data messages.
    ///
    /// Data buffered while nobody was listening is flushed to the new
    /// subscriber immediately, unless the read half is paused.
    pub fn subscribe(&self) -> Subscription {
        self.add_subscriber(true).0
    }

    /// Subscribe to every event except data messages.
    ///
    /// Lifecycle subscribers do not count as message listeners, so incoming
    /// data keeps accumulating in the read buffer.
    pub fn subscribe_lifecycle(&self) -> Subscription {
        self.add_subscriber(false).0
    }

    /// Async sequence of received chunks. See [`MessageStreamReader`].
    pub fn reader(&self) -> MessageStreamReader {
        let (subscription, ended) = self.add_subscriber(true);
        MessageStreamReader::new(subscription, ended)
    }

    /// Returns the subscription plus, when the read side had already ended
    /// before subscribing, the error it ended with.
    fn add_subscriber(&self, messages: bool) -> (Subscription, Option<Option<StreamError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (overflow, ended) = {
            let mut state = self.state();
            state.subscribers.push(Subscriber { tx, messages });
            let overflow = if messages {
                state
                    .dispatch_read_buffer(self.shared.config.max_read_buffer_length)
                    .err()
            } else {
                None
            };
            let finished = state.read_status == ReadStatus::Closed
                || state.remote_write_status == WriteStatus::Closed
                || state.status.is_terminal();
            let ended = (finished && state.read_buffer.is_empty())
                .then(|| state.close_error.clone());
            (overflow, ended)
        };
        if let Some(err) = overflow {
            self.abort(err);
        }
        (Subscription::new(rx), ended)
    }

    /// Queue `data` for sending.
    ///
    /// Returns `Ok(false)` when the transport is applying backpressure; the
    /// data is still buffered and will be sent after the next drain.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<bool> {
        let data = data.into();
        {
            let mut state = self.state();
            if state.write_status.is_closing() {
                return Err(state.write_state_error("send"));
            }
            state.write_buffer.push_back(data);
            state.touch();

            if state.writable_needs_drain {
                if let Err(err) = state.check_write_buffer(self.shared.config.max_write_buffer_length) {
                    drop(state);
                    self.abort(err.clone());
                    return Err(err);
                }
                return Ok(false);
            }
        }
        self.process_send_queue()
    }

    fn process_send_queue(&self) -> Result<bool> {
        {
            let mut state = self.state();
            if state.writable_needs_drain {
                return Ok(false);
            }
            if state.sending || state.write_buffer.is_empty() {
                return Ok(true);
            }
            state.sending = true;
        }

        loop {
            let chunk = {
                let mut state = self.state();
                let len = match self.shared.config.max_message_size {
                    Some(max) => state.write_buffer.len().min(max.max(1)),
                    None => state.write_buffer.len(),
                };
                if len == 0 {
                    state.sending = false;
                    return Ok(true);
                }
                state.write_buffer.peek(len)
            };

            let requested = chunk.len();
            let result = self.shared.transport.send_data(chunk);

            let mut state = self.state();
            if matches!(state.status, StreamStatus::Aborted | StreamStatus::Reset) {
                state.sending = false;
                return Ok(false);
            }

            let result = match result {
                Ok(result) => result,
                Err(err) => {
                    state.sending = false;
                    drop(state);
                    let err = StreamError::from(err);
                    self.abort(err.clone());
                    return Err(err);
                }
            };

            let sent = result.sent_bytes.min(requested);
            state.write_buffer.consume(sent);
            state.touch();
            trace!(stream = %self.shared.id, sent, requested, "sent data");

            if result.can_send_more && sent < requested {
                state.sending = false;
                drop(state);
                let err = StreamError::InvalidSendResult { sent, requested };
                self.abort(err.clone());
                return Err(err);
            }

            if !result.can_send_more {
                state.writable_needs_drain = true;
                state.sending = false;
                trace!(stream = %self.shared.id, buffered = state.write_buffer.len(), "transport applied backpressure");
                if let Err(err) = state.check_write_buffer(self.shared.config.max_write_buffer_length) {
                    drop(state);
                    self.abort(err.clone());
                    return Err(err);
                }
                return Ok(false);
            }

            if state.write_buffer.is_empty() {
                state.sending = false;
                state.emit(StreamEvent::Idle);
                drop(state);
                self.notify();
                return Ok(true);
            }
        }
    }

    /// Stop delivering received data; it accumulates in the read buffer.
    pub fn pause(&self) -> Result<()> {
        {
            let mut state = self.state();
            match state.read_status {
                ReadStatus::Paused => return Ok(()),
                ReadStatus::Closing | ReadStatus::Closed => {
                    return Err(state.read_state_error("pause"))
                }
                ReadStatus::Readable => state.read_status = ReadStatus::Paused,
            }
        }
        trace!(stream = %self.shared.id, "read paused");
        if let Err(err) = self.shared.transport.send_pause() {
            debug!(stream = %self.shared.id, error = %err, "failed to send pause");
        }
        Ok(())
    }

    /// Resume delivering received data, flushing anything buffered.
    pub fn resume(&self) -> Result<()> {
        let (notify_remote, overflow) = {
            let mut state = self.state();
            match state.read_status {
                ReadStatus::Readable => return Ok(()),
                ReadStatus::Closing | ReadStatus::Closed => {
                    return Err(state.read_state_error("resume"))
                }
                ReadStatus::Paused => state.read_status = ReadStatus::Readable,
            }
            let notify_remote =
                !state.write_status.is_closing() && !state.remote_read_status.is_closing();
            let overflow = state
                .dispatch_read_buffer(self.shared.config.max_read_buffer_length)
                .err();
            (notify_remote, overflow)
        };
        trace!(stream = %self.shared.id, "read resumed");
        if notify_remote {
            if let Err(err) = self.shared.transport.send_resume() {
                debug!(stream = %self.shared.id, error = %err, "failed to send resume");
            }
        }
        if let Some(err) = overflow {
            self.abort(err);
        }
        Ok(())
    }

    /// Append data to the read buffer as if it had been received.
    pub fn push(&self, data: impl Into<Bytes>) -> Result<()> {
        self.inject("push", data.into(), false)
    }

    /// Put data back at the head of the read buffer.
    pub fn unshift(&self, data: impl Into<Bytes>) -> Result<()> {
        self.inject("unshift", data.into(), true)
    }

    fn inject(&self, operation: &'static str, data: Bytes, front: bool) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let overflow = {
            let mut state = self.state();
            if state.read_status.is_closing() {
                return Err(state.read_state_error(operation));
            }
            if front {
                state.read_buffer.push_front(data);
            } else {
                state.read_buffer.push_back(data);
            }
            state
                .dispatch_read_buffer(self.shared.config.max_read_buffer_length)
                .err()
        };
        match overflow {
            Some(err) => {
                self.abort(err.clone());
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Transport hook: data arrived from the remote end.
    ///
    /// Ignored once the read half is closing or closed.
    pub fn on_data(&self, data: impl Into<Bytes>) {
        let data = data.into();
        let overflow = {
            let mut state = self.state();
            if state.read_status.is_closing() {
                trace!(stream = %self.shared.id, len = data.len(), "dropping data after read close");
                return;
            }
            state.touch();
            state.read_buffer.push_back(data);
            state
                .dispatch_read_buffer(self.shared.config.max_read_buffer_length)
                .err()
        };
        if let Some(err) = overflow {
            self.abort(err);
        }
    }

    /// Terminate the stream immediately.
    ///
    /// Discards both buffers, closes every half, emits `Abort` followed by
    /// `Close`, then asks the transport to send a reset. Idempotent.
    pub fn abort(&self, err: StreamError) {
        {
            let mut state = self.state();
            if state.status.is_terminal() {
                return;
            }
            state.status = StreamStatus::Aborted;
            state.read_buffer.clear();
            state.write_buffer.clear();
            state.writable_needs_drain = false;
            state.shut_read();
            state.shut_write();
            state.remote_read_status = WriteStatus::Closed;
            state.remote_write_status = WriteStatus::Closed;
            mark(&mut state.timeline.abort);
            mark(&mut state.timeline.close);
            state.close_error = Some(err.clone());
            state.emit(StreamEvent::Abort(err.clone()));
            state.emit(StreamEvent::Close {
                error: Some(err.clone()),
                local: true,
            });
        }
        self.notify();

        warn!(stream = %self.shared.id, error = %err, "stream aborted");
        if let Err(reset_err) = self.shared.transport.send_reset(&err) {
            debug!(stream = %self.shared.id, error = %reset_err, "failed to send reset");
        }
    }

    /// Transport hook: the remote end reset the stream.
    ///
    /// Buffered read data stays readable; once it has been consumed the read
    /// half closes.
    pub fn on_remote_reset(&self) {
        {
            let mut state = self.state();
            if state.status.is_terminal() {
                return;
            }
            debug!(stream = %self.shared.id, "stream reset by remote");
            state.status = StreamStatus::Reset;
            state.write_buffer.clear();
            state.writable_needs_drain = false;
            state.shut_write();
            state.remote_write_status = WriteStatus::Closed;
            state.remote_read_status = WriteStatus::Closed;
            if state.read_buffer.is_empty() {
                state.shut_read();
            }
            mark(&mut state.timeline.reset);
            mark(&mut state.timeline.close);
            state.close_error = Some(StreamError::Reset);
            state.emit(StreamEvent::Close {
                error: Some(StreamError::Reset),
                local: false,
            });
        }
        self.notify();
    }

    /// Transport hook: the underlying transport closed.
    ///
    /// With an error this aborts. Without one every half closes except a
    /// read half that still holds unread data.
    pub fn on_transport_closed(&self, err: Option<StreamError>) {
        if let Some(err) = err {
            self.abort(err);
            return;
        }
        {
            let mut state = self.state();
            if state.read_status == ReadStatus::Readable && state.read_buffer.is_empty() {
                state.close_read_half();
            }
            state.remote_read_status = WriteStatus::Closed;
            state.remote_write_status = WriteStatus::Closed;
            state.write_buffer.clear();
            state.close_write_half();
            self.finish_close(&mut state, false);
        }
        self.notify();
    }

    fn finish_close(&self, state: &mut State, local: bool) {
        if !matches!(state.status, StreamStatus::Open | StreamStatus::Closing) {
            return;
        }
        state.status = StreamStatus::Closed;
        mark(&mut state.timeline.close);
        state.maybe_close_read();
        debug!(stream = %self.shared.id, local, "stream closed");
        state.emit(StreamEvent::Close { error: None, local });
    }

    /// Transport hook: the remote end will send no more data.
    pub fn on_remote_close_write(&self) {
        let escalate = {
            let mut state = self.state();
            if state.remote_write_status == WriteStatus::Closed {
                return;
            }
            state.remote_write_status = WriteStatus::Closed;
            mark(&mut state.timeline.remote_close_write);
            state.emit(StreamEvent::RemoteCloseWrite);
            state.maybe_close_read();
            state.write_status == WriteStatus::Closed
        };
        self.notify();
        if escalate {
            self.on_transport_closed(None);
        }
    }

    /// Transport hook: the remote end will read no more data.
    ///
    /// Anything still waiting in the write buffer is discarded.
    pub fn on_remote_close_read(&self) {
        {
            let mut state = self.state();
            if state.remote_read_status == WriteStatus::Closed {
                return;
            }
            state.remote_read_status = WriteStatus::Closed;
            mark(&mut state.timeline.remote_close_read);
            state.write_buffer.clear();
            state.emit(StreamEvent::Idle);
        }
        self.notify();
    }

    /// Transport hook: the transport can accept data again.
    pub fn on_transport_drain(&self) {
        {
            let mut state = self.state();
            state.writable_needs_drain = false;
            state.emit(StreamEvent::Drain);
        }
        self.notify();
        if let Err(err) = self.process_send_queue() {
            debug!(stream = %self.shared.id, error = %err, "send after drain failed");
        }
    }

    async fn wait_until<F>(&self, cancel: Option<&CancellationToken>, ready: F) -> Result<()>
    where
        F: Fn(&State) -> bool,
    {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let done = ready(&self.state());
            if done {
                return Ok(());
            }

            race_cancel(notified, cancel).await?;
        }
    }

    /// Resolve once the stream may be written to without backpressure.
    ///
    /// Fails with the stream's error if it terminates first, or with
    /// [`StreamError::Aborted`] if `cancel` fires.
    pub async fn wait_drain(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        self.wait_until(cancel, |state| {
            !state.writable_needs_drain || state.status.is_terminal()
        })
        .await?;

        let state = self.state();
        if state.status.is_terminal() {
            if let Some(err) = &state.close_error {
                return Err(err.clone());
            }
        }
        if state.writable_needs_drain {
            return Err(state.write_state_error("wait for drain"));
        }
        Ok(())
    }

    /// Gracefully close the write half once buffered data has been sent.
    pub async fn close_write(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        {
            let mut state = self.state();
            if state.write_status.is_closing() {
                return Ok(());
            }
            state.write_status = WriteStatus::Closing;
        }

        self.wait_until(cancel, |state| {
            (state.write_buffer.is_empty() && !state.writable_needs_drain)
                || state.status.is_terminal()
        })
        .await?;

        if let Some(err) = self.terminal_error() {
            return Err(err);
        }

        if let Err(err) = self.shared.transport.send_close_write() {
            let err = StreamError::from(err);
            self.abort(err.clone());
            return Err(err);
        }

        let escalate = {
            let mut state = self.state();
            state.close_write_half();
            debug!(stream = %self.shared.id, "write half closed");
            state.remote_write_status == WriteStatus::Closed
        };
        if escalate {
            let mut state = self.state();
            self.finish_close(&mut state, true);
        }
        self.notify();
        Ok(())
    }

    /// Gracefully close the read half, discarding unread data.
    pub async fn close_read(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(StreamError::Aborted);
        }
        {
            let mut state = self.state();
            if state.read_status.is_closing() {
                return Ok(());
            }
            state.read_status = ReadStatus::Closing;
        }

        if let Err(err) = self.shared.transport.send_close_read() {
            let err = StreamError::from(err);
            self.abort(err.clone());
            return Err(err);
        }

        {
            let mut state = self.state();
            state.read_buffer.clear();
            state.close_read_half();
            debug!(stream = %self.shared.id, "read half closed");
        }
        self.notify();
        Ok(())
    }

    /// Gracefully close both halves, then mark the stream closed.
    pub async fn close(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        {
            let mut state = self.state();
            if state.status != StreamStatus::Open {
                return Ok(());
            }
            state.status = StreamStatus::Closing;
        }
        debug!(stream = %self.shared.id, "closing stream");

        self.close_write(cancel).await?;
        self.close_read(cancel).await?;

        {
            let mut state = self.state();
            self.finish_close(&mut state, true);
        }
        self.notify();
        Ok(())
    }

    fn terminal_error(&self) -> Option<StreamError> {
        let state = self.state();
        match state.status {
            StreamStatus::Aborted | StreamStatus::Reset => Some(
                state
                    .close_error
                    .clone()
                    .unwrap_or(StreamError::Aborted),
            ),
            _ => None,
        }
    }
}
