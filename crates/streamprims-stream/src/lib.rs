//! Half-closable, flow-controlled byte-message streams.
//!
//! A [`MessageStream`] tracks the local and remote status of each half,
//! buffers reads while nobody is listening or while paused, buffers writes
//! while the [`Transport`](streamprims_transport::Transport) applies
//! backpressure, and delivers [`StreamEvent`]s to subscribers.
//!
//! ```no_run
//! # async fn demo() -> Result<(), streamprims_stream::StreamError> {
//! use futures_util::StreamExt;
//! use streamprims_stream::{stream_pair, StreamConfig};
//! use streamprims_transport::QueueConfig;
//!
//! let (a, b) = stream_pair(StreamConfig::default(), QueueConfig::default());
//! a.send("hello")?;
//! a.close_write(None).await?;
//!
//! let mut reader = b.reader();
//! while let Some(chunk) = reader.next().await {
//!     println!("{:?}", chunk?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
mod config;
mod error;
mod event;
mod pair;
mod pipe;
mod reader;
mod stream;
mod watchdog;

pub use buffer::ByteList;
pub use config::{Direction, StreamConfig, DEFAULT_INACTIVITY_TIMEOUT, DEFAULT_MAX_READ_BUFFER_LENGTH};
pub use error::{Result, StreamError};
pub use event::{ReadStatus, StreamEvent, StreamStatus, Subscription, Timeline, WriteStatus};
pub use pair::stream_pair;
pub use pipe::{echo, redirect};
pub use reader::MessageStreamReader;
pub use stream::{MessageStream, WeakMessageStream};
pub use watchdog::enforce_inactivity_timeout;
