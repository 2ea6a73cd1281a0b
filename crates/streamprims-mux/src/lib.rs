//! Stream multiplexing over a single message stream.
//!
//! A [`StreamMuxer`] carries many child
//! [`MessageStream`](streamprims_stream::MessageStream)s over one connection
//! and propagates the connection's lifecycle to every child. The wire format
//! comes from a [`MuxerProtocol`]; [`MockMuxer`] is a simple reference
//! protocol built on length-prefixed JSON messages.

pub mod error;
pub mod mock;
pub mod muxer;

pub use error::{MuxError, Result};
pub use mock::{
    MockMuxer, MockMuxerConfig, MuxMessage, DEFAULT_MAX_INPUT_BUFFER, DEFAULT_MAX_MESSAGE_SIZE,
    MOCK_MUXER_PROTOCOL,
};
pub use muxer::{
    CreateStreamOptions, MuxerEvent, MuxerProtocol, MuxerStatus, MuxerSubscription, StreamMuxer,
};
