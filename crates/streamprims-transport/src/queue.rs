//! Single-concurrency delivery queue with artificial latency and backpressure.
//!
//! Stands in for a real network path: every accepted event is delivered in
//! order by one worker task, optionally after a fixed delay. Byte payloads are
//! split into `chunk_size` pieces. Once the number of pending deliveries has
//! reached `capacity`, [`MessageQueue::send`] returns `false` and a drain
//! notification fires the next time the queue goes idle.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::cancel::{race_cancel, Cancelled};

/// Default outbound chunk size: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// An event that may carry a byte payload the queue is allowed to split.
pub trait QueueEvent: Send + 'static {
    /// The byte payload carried by this event, if any.
    fn payload(&self) -> Option<&Bytes> {
        None
    }

    /// Build a copy of this event carrying `chunk` in place of its payload.
    fn with_payload(&self, chunk: Bytes) -> Self
    where
        Self: Sized;
}

impl QueueEvent for Bytes {
    fn payload(&self) -> Option<&Bytes> {
        Some(self)
    }

    fn with_payload(&self, chunk: Bytes) -> Self {
        chunk
    }
}

/// Configuration for a [`MessageQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Wait this long before dispatching each task.
    pub delay: Option<Duration>,
    /// Pending task count at which `send` starts reporting backpressure.
    pub capacity: usize,
    /// Payloads larger than this are split into several tasks.
    pub chunk_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            delay: None,
            capacity: usize::MAX,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

type DrainListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct QueueState {
    pending: usize,
    needs_drain: bool,
}

struct Shared<E> {
    config: QueueConfig,
    tasks: mpsc::UnboundedSender<E>,
    state: Mutex<QueueState>,
    paused: watch::Sender<bool>,
    idle: Notify,
    drain_listeners: Mutex<Vec<DrainListener>>,
}

impl<E> Shared<E> {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn complete_one(&self) {
        let emit_drain = {
            let mut state = self.state();
            state.pending = state.pending.saturating_sub(1);
            if state.pending > 0 {
                return;
            }
            std::mem::take(&mut state.needs_drain)
        };

        self.idle.notify_waiters();

        if emit_drain {
            trace!("queue idle, emitting drain");
            let listeners = self
                .drain_listeners
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone();
            for listener in listeners {
                listener();
            }
        }
    }
}

/// A backpressure-aware, single-concurrency delivery queue.
///
/// Cloning yields another handle to the same queue. The worker task stops
/// once every handle has been dropped and the remaining tasks ran.
pub struct MessageQueue<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for MessageQueue<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: QueueEvent> MessageQueue<E> {
    /// Create a queue delivering every event to `deliver`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, since the delivery worker
    /// is spawned immediately.
    pub fn new<F>(config: QueueConfig, deliver: F) -> Self
    where
        F: Fn(E) + Send + Sync + 'static,
    {
        let (tasks, rx) = mpsc::unbounded_channel();
        let (paused, paused_rx) = watch::channel(false);
        let delay = config.delay;

        let shared = Arc::new(Shared {
            config,
            tasks,
            state: Mutex::new(QueueState::default()),
            paused,
            idle: Notify::new(),
            drain_listeners: Mutex::new(Vec::new()),
        });

        tokio::spawn(run_worker(
            rx,
            paused_rx,
            Arc::downgrade(&shared),
            deliver,
            delay,
        ));

        Self { shared }
    }

    /// Enqueue an event, splitting its payload into `chunk_size` tasks.
    ///
    /// Returns `false` when the queue had already reached capacity; the
    /// event is still accepted and a drain notification will follow once the
    /// queue is idle.
    pub fn send(&self, event: E) -> bool {
        let chunk_size = self.shared.config.chunk_size.max(1);
        let tasks = match event.payload() {
            Some(payload) if payload.len() > chunk_size => {
                let mut rest = payload.clone();
                let mut tasks = Vec::with_capacity(rest.len().div_ceil(chunk_size));
                while !rest.is_empty() {
                    let chunk = rest.split_to(chunk_size.min(rest.len()));
                    tasks.push(event.with_payload(chunk));
                }
                tasks
            }
            _ => vec![event],
        };

        let mut state = self.shared.state();
        let full = state.pending >= self.shared.config.capacity;

        for task in tasks {
            if self.shared.tasks.send(task).is_err() {
                break;
            }
            state.pending += 1;
        }

        if full {
            trace!(pending = state.pending, "queue at capacity");
            state.needs_drain = true;
            return false;
        }

        true
    }

    /// Register a callback invoked each time the queue drains.
    pub fn add_drain_listener<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared
            .drain_listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(listener));
    }

    /// Stop dispatching tasks until [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        self.shared.paused.send_replace(true);
    }

    /// Resume dispatching tasks.
    pub fn resume(&self) {
        self.shared.paused.send_replace(false);
    }

    /// Whether task dispatch is currently paused.
    pub fn is_paused(&self) -> bool {
        *self.shared.paused.borrow()
    }

    /// Number of tasks queued or running.
    pub fn size(&self) -> usize {
        self.shared.state().pending
    }

    /// Whether a drain notification is owed.
    pub fn needs_drain(&self) -> bool {
        self.shared.state().needs_drain
    }

    /// Resolves once the queue is empty.
    pub async fn on_idle(&self, cancel: Option<&CancellationToken>) -> Result<(), Cancelled> {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.size() == 0 {
                return Ok(());
            }

            race_cancel(notified, cancel).await?;
        }
    }
}

async fn run_worker<E, F>(
    mut rx: mpsc::UnboundedReceiver<E>,
    mut paused: watch::Receiver<bool>,
    shared: Weak<Shared<E>>,
    deliver: F,
    delay: Option<Duration>,
) where
    F: Fn(E),
{
    while let Some(event) = rx.recv().await {
        if paused.wait_for(|paused| !*paused).await.is_err() {
            break;
        }

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        deliver(event);

        match shared.upgrade() {
            Some(shared) => shared.complete_one(),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn recording_queue(config: QueueConfig) -> (MessageQueue<Bytes>, Arc<Mutex<Vec<Bytes>>>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let queue = MessageQueue::new(config, move |event: Bytes| {
            sink.lock().unwrap().push(event);
        });
        (queue, delivered)
    }

    #[tokio::test]
    async fn capacity_reports_backpressure_and_drains_once() {
        let (queue, delivered) = recording_queue(QueueConfig {
            capacity: 4,
            ..QueueConfig::default()
        });
        let drains = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&drains);
        queue.add_drain_listener(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let results: Vec<bool> = (0..5u8)
            .map(|i| queue.send(Bytes::from(vec![i])))
            .collect();

        assert_eq!(results, vec![true, true, true, true, false]);
        assert!(queue.needs_drain());

        queue.on_idle(None).await.unwrap();

        assert_eq!(drains.load(Ordering::SeqCst), 1);
        assert!(!queue.needs_drain());
        let delivered = delivered.lock().unwrap();
        let order: Vec<u8> = delivered.iter().map(|b| b[0]).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn splits_large_payloads_into_chunks() {
        let (queue, delivered) = recording_queue(QueueConfig {
            chunk_size: 4,
            ..QueueConfig::default()
        });

        assert!(queue.send(Bytes::from_static(b"0123456789")));
        queue.on_idle(None).await.unwrap();

        let delivered = delivered.lock().unwrap();
        let chunks: Vec<&[u8]> = delivered.iter().map(|b| b.as_ref()).collect();
        assert_eq!(chunks, vec![&b"0123"[..], &b"4567"[..], &b"89"[..]]);
    }

    #[tokio::test]
    async fn pause_holds_tasks_until_resume() {
        let (queue, delivered) = recording_queue(QueueConfig::default());
        queue.pause();
        assert!(queue.is_paused());

        queue.send(Bytes::from_static(b"held"));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(delivered.lock().unwrap().is_empty());
        assert_eq!(queue.size(), 1);

        queue.resume();
        queue.on_idle(None).await.unwrap();
        assert_eq!(delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_postpones_delivery() {
        let (queue, delivered) = recording_queue(QueueConfig {
            delay: Some(Duration::from_millis(50)),
            ..QueueConfig::default()
        });

        queue.send(Bytes::from_static(b"late"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(delivered.lock().unwrap().is_empty());

        queue.on_idle(None).await.unwrap();
        assert_eq!(delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn on_idle_honours_cancellation() {
        let (queue, _delivered) = recording_queue(QueueConfig::default());
        queue.pause();
        queue.send(Bytes::from_static(b"stuck"));

        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(queue.on_idle(Some(&token)).await, Err(Cancelled));
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let (queue, _delivered) = recording_queue(QueueConfig::default());
        assert_eq!(queue.size(), 0);
        queue.on_idle(None).await.unwrap();
    }
}
