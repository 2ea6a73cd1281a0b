//! Half-closable message streams, length-prefixed framing and stream
//! multiplexing.
//!
//! # Crate Structure
//!
//! - [`transport`]: the transport capability and the backpressure-aware delivery queue
//! - [`stream`]: the message stream state machine and its helpers
//! - [`frame`]: varint length-prefixed framing and byte/frame/structured stream views
//! - [`mux`]: many streams over one connection (behind the `mux` feature)

/// Re-export transport types.
pub mod transport {
    pub use streamprims_transport::*;
}

/// Re-export stream types.
pub mod stream {
    pub use streamprims_stream::*;
}

/// Re-export frame types.
pub mod frame {
    pub use streamprims_frame::*;
}

/// Re-export muxer types (requires `mux` feature).
#[cfg(feature = "mux")]
pub mod mux {
    pub use streamprims_mux::*;
}
