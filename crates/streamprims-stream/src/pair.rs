//! Two message streams joined back to back through delivery queues.
//!
//! Each direction runs through its own [`MessageQueue`], so latency, chunking
//! and backpressure behave like a real network path. Pausing one side's read
//! half pauses the queue that feeds it.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use streamprims_transport::{MessageQueue, QueueConfig, QueueEvent, SendResult, Transport};
use tracing::trace;

use crate::config::{Direction, StreamConfig};
use crate::stream::{MessageStream, WeakMessageStream};

#[derive(Debug, Clone)]
enum PairMessage {
    Data(Bytes),
    Reset,
    CloseWrite,
    CloseRead,
}

impl QueueEvent for PairMessage {
    fn payload(&self) -> Option<&Bytes> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    fn with_payload(&self, chunk: Bytes) -> Self {
        Self::Data(chunk)
    }
}

struct QueueTransport {
    outbound: MessageQueue<PairMessage>,
    inbound: MessageQueue<PairMessage>,
}

impl Transport for QueueTransport {
    fn send_data(&self, data: Bytes) -> streamprims_transport::Result<SendResult> {
        let len = data.len();
        let can_send_more = self.outbound.send(PairMessage::Data(data));
        Ok(SendResult {
            sent_bytes: len,
            can_send_more,
        })
    }

    fn send_reset(
        &self,
        _reason: &(dyn std::error::Error + Send + Sync),
    ) -> streamprims_transport::Result<()> {
        self.outbound.send(PairMessage::Reset);
        Ok(())
    }

    fn send_pause(&self) -> streamprims_transport::Result<()> {
        self.inbound.pause();
        Ok(())
    }

    fn send_resume(&self) -> streamprims_transport::Result<()> {
        self.inbound.resume();
        Ok(())
    }

    fn send_close_write(&self) -> streamprims_transport::Result<()> {
        self.outbound.send(PairMessage::CloseWrite);
        Ok(())
    }

    fn send_close_read(&self) -> streamprims_transport::Result<()> {
        self.outbound.send(PairMessage::CloseRead);
        Ok(())
    }
}

type Slot = Arc<OnceLock<WeakMessageStream>>;

fn deliver_to(slot: Slot) -> impl Fn(PairMessage) + Send + Sync + 'static {
    move |message| {
        let Some(stream) = slot.get().and_then(WeakMessageStream::upgrade) else {
            trace!("pair peer dropped, discarding message");
            return;
        };
        match message {
            PairMessage::Data(data) => stream.on_data(data),
            PairMessage::Reset => stream.on_remote_reset(),
            PairMessage::CloseWrite => stream.on_remote_close_write(),
            PairMessage::CloseRead => stream.on_remote_close_read(),
        }
    }
}

fn drain_to(slot: Slot) -> impl Fn() + Send + Sync + 'static {
    move || {
        if let Some(stream) = slot.get().and_then(WeakMessageStream::upgrade) {
            stream.on_transport_drain();
        }
    }
}

/// Create two connected streams, `(outbound, inbound)`.
///
/// Data sent on one arrives on the other after passing through a queue
/// configured by `queue`.
///
/// # Panics
///
/// Panics when called outside a tokio runtime.
pub fn stream_pair(config: StreamConfig, queue: QueueConfig) -> (MessageStream, MessageStream) {
    let a_slot: Slot = Arc::default();
    let b_slot: Slot = Arc::default();

    let a_to_b = MessageQueue::new(queue.clone(), deliver_to(Arc::clone(&b_slot)));
    let b_to_a = MessageQueue::new(queue, deliver_to(Arc::clone(&a_slot)));
    a_to_b.add_drain_listener(drain_to(Arc::clone(&a_slot)));
    b_to_a.add_drain_listener(drain_to(Arc::clone(&b_slot)));

    let a = MessageStream::new(
        "a",
        QueueTransport {
            outbound: a_to_b.clone(),
            inbound: b_to_a.clone(),
        },
        config.with_direction(Direction::Outbound),
    );
    let b = MessageStream::new(
        "b",
        QueueTransport {
            outbound: b_to_a,
            inbound: a_to_b,
        },
        config.with_direction(Direction::Inbound),
    );

    let _ = a_slot.set(a.downgrade());
    let _ = b_slot.set(b.downgrade());

    (a, b)
}
