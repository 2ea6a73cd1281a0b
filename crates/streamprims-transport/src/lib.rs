//! Transport capability and backpressure-aware delivery queue.
//!
//! This is the lowest layer of streamprims. A concrete transport (a socket,
//! a muxed sub-channel, an in-memory queue) implements [`Transport`] and a
//! message stream drives it. The [`MessageQueue`] doubles as an in-memory
//! transport and as the template for any rate-limited send path.

pub mod cancel;
pub mod error;
pub mod queue;
pub mod traits;

pub use cancel::{race_cancel, Cancelled};
pub use error::{Result, TransportError};
pub use queue::{MessageQueue, QueueConfig, QueueEvent, DEFAULT_CHUNK_SIZE};
pub use traits::{SendResult, Transport};
