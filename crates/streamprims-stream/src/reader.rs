use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;

use crate::error::StreamError;
use crate::event::{StreamEvent, Subscription};

/// Lazy, pull-based view of a [`MessageStream`](crate::MessageStream)'s
/// received chunks.
///
/// Yields each chunk in order. Ends after the remote end finishes writing or
/// the local read half closes. If the stream terminates with an error, that
/// error is yielded once as the final item.
#[derive(Debug)]
pub struct MessageStreamReader {
    subscription: Subscription,
    ended_before_subscribe: Option<Option<StreamError>>,
    done: bool,
}

impl MessageStreamReader {
    pub(crate) fn new(
        subscription: Subscription,
        ended_before_subscribe: Option<Option<StreamError>>,
    ) -> Self {
        Self {
            subscription,
            ended_before_subscribe,
            done: false,
        }
    }

    fn finish(&mut self, error: Option<StreamError>) -> Poll<Option<Result<Bytes, StreamError>>> {
        self.done = true;
        Poll::Ready(error.map(Err))
    }
}

impl Stream for MessageStreamReader {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            match this.subscription.poll_recv(cx) {
                Poll::Ready(Some(StreamEvent::Message(data))) => {
                    return Poll::Ready(Some(Ok(data)))
                }
                Poll::Ready(Some(StreamEvent::Close { error, .. })) => return this.finish(error),
                Poll::Ready(Some(StreamEvent::RemoteCloseWrite | StreamEvent::CloseRead)) => {
                    // A late reader may see the read half close after the
                    // stream already failed; keep that failure.
                    let error = this.ended_before_subscribe.take().flatten();
                    return this.finish(error);
                }
                Poll::Ready(Some(_)) => continue,
                Poll::Ready(None) => return this.finish(None),
                Poll::Pending => {
                    // Everything buffered before subscribing is already queued,
                    // so an empty channel means the earlier end was reached.
                    if let Some(error) = this.ended_before_subscribe.take() {
                        return this.finish(error);
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
