use bytes::Bytes;

use crate::error::Result;

/// Outcome of a single [`Transport::send_data`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendResult {
    /// Number of bytes from the passed chunk that were accepted.
    pub sent_bytes: usize,
    /// Whether the transport can accept more data immediately.
    ///
    /// When `true`, `sent_bytes` must equal the length of the chunk.
    pub can_send_more: bool,
}

impl SendResult {
    /// The whole chunk was accepted and more may follow.
    pub fn accepted(len: usize) -> Self {
        Self {
            sent_bytes: len,
            can_send_more: true,
        }
    }

    /// `sent_bytes` were accepted and the caller must wait for a drain
    /// notification before sending again.
    pub fn backpressure(sent_bytes: usize) -> Self {
        Self {
            sent_bytes,
            can_send_more: false,
        }
    }
}

/// The capability a concrete transport supplies to a message stream.
///
/// This is the only seam between the stream state machine and real I/O.
/// Implementations should attempt to send as much as possible and report
/// truthfully; everything except `send_data` is a best-effort signal.
pub trait Transport: Send + Sync {
    /// Send a data chunk to the remote end.
    fn send_data(&self, data: Bytes) -> Result<SendResult>;

    /// Tell the remote end the stream was aborted.
    fn send_reset(&self, reason: &(dyn std::error::Error + Send + Sync)) -> Result<()>;

    /// Ask the remote end to stop sending data for now.
    fn send_pause(&self) -> Result<()> {
        Ok(())
    }

    /// Tell the remote end it may resume sending data.
    fn send_resume(&self) -> Result<()> {
        Ok(())
    }

    /// Tell the remote end no more data will be sent.
    fn send_close_write(&self) -> Result<()>;

    /// Tell the remote end no more data will be read.
    fn send_close_read(&self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send_data(&self, data: Bytes) -> Result<SendResult> {
        (**self).send_data(data)
    }

    fn send_reset(&self, reason: &(dyn std::error::Error + Send + Sync)) -> Result<()> {
        (**self).send_reset(reason)
    }

    fn send_pause(&self) -> Result<()> {
        (**self).send_pause()
    }

    fn send_resume(&self) -> Result<()> {
        (**self).send_resume()
    }

    fn send_close_write(&self) -> Result<()> {
        (**self).send_close_write()
    }

    fn send_close_read(&self) -> Result<()> {
        (**self).send_close_read()
    }
}
