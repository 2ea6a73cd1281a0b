use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::event::{StreamEvent, WriteStatus};
use crate::stream::MessageStream;

/// Send everything `stream` receives straight back to its remote end, and
/// close the write half once the remote end finishes writing.
pub fn echo(stream: &MessageStream) -> JoinHandle<()> {
    tokio::spawn(forward(stream.clone(), stream.clone()))
}

/// Forward data in both directions between `a` and `b`.
///
/// Backpressure on one side pauses reading on the other. A remote write
/// close on one side closes the write half of the other.
pub fn redirect(a: &MessageStream, b: &MessageStream) -> (JoinHandle<()>, JoinHandle<()>) {
    (
        tokio::spawn(forward(a.clone(), b.clone())),
        tokio::spawn(forward(b.clone(), a.clone())),
    )
}

async fn forward(source: MessageStream, sink: MessageStream) {
    let mut events = source.subscribe();
    // Data buffered before subscribing is already queued; a remote write
    // close from that time is not, so replay it once the queue runs dry.
    let mut closed_before_subscribe = source.remote_write_status() == WriteStatus::Closed;

    loop {
        let event = if closed_before_subscribe {
            events.try_recv().unwrap_or_else(|| {
                closed_before_subscribe = false;
                StreamEvent::RemoteCloseWrite
            })
        } else {
            match events.recv().await {
                Some(event) => event,
                None => return,
            }
        };

        match event {
            StreamEvent::Message(data) => {
                let len = data.len();
                match sink.send(data) {
                    Ok(true) => trace!(from = %source.id(), to = %sink.id(), len, "forwarded"),
                    Ok(false) => {
                        if let Err(err) = source.pause() {
                            trace!(stream = %source.id(), error = %err, "pause skipped");
                        }
                        if let Err(err) = sink.wait_drain(None).await {
                            debug!(stream = %sink.id(), error = %err, "forward target failed");
                            source.abort(err);
                            return;
                        }
                        if let Err(err) = source.resume() {
                            trace!(stream = %source.id(), error = %err, "resume skipped");
                        }
                    }
                    Err(err) => {
                        debug!(stream = %sink.id(), error = %err, "forward target rejected data");
                        return;
                    }
                }
            }
            StreamEvent::RemoteCloseWrite => {
                if let Err(err) = sink.close_write(None).await {
                    debug!(stream = %sink.id(), error = %err, "failed to propagate write close");
                    return;
                }
            }
            StreamEvent::Close { .. } => return,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::config::StreamConfig;
    use crate::stream::tests::recording_stream;

    #[tokio::test]
    async fn echo_returns_data_and_closes_write() {
        let (stream, transport) = recording_stream(StreamConfig::default());
        let task = echo(&stream);
        tokio::task::yield_now().await;

        stream.on_data(Bytes::from_static(b"ping"));
        stream.on_remote_close_write();
        task.await.unwrap();

        assert_eq!(transport.sent_bytes(), b"ping");
        assert_eq!(stream.write_status(), WriteStatus::Closed);
        assert_eq!(transport.with().close_writes, 1);
    }

    #[tokio::test]
    async fn redirect_pauses_source_under_backpressure() {
        let (a, _a_transport) = recording_stream(StreamConfig::default());
        let (b, b_transport) = recording_stream(StreamConfig::default());
        b_transport.with().script.push_back(Some(0));

        let (a_to_b, b_to_a) = redirect(&a, &b);
        tokio::task::yield_now().await;

        a.on_data(Bytes::from_static(b"first"));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(b.writable_needs_drain());
        assert_eq!(a.read_status(), crate::event::ReadStatus::Paused);

        b.on_transport_drain();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(a.read_status(), crate::event::ReadStatus::Readable);
        assert_eq!(b_transport.sent_bytes(), b"first");

        a.abort(crate::error::StreamError::Aborted);
        b.abort(crate::error::StreamError::Aborted);
        a_to_b.await.unwrap();
        b_to_a.await.unwrap();
    }

    #[tokio::test]
    async fn echo_started_after_remote_close_still_finishes() {
        let (stream, transport) = recording_stream(StreamConfig::default());
        stream.on_data(Bytes::from_static(b"early"));
        stream.on_remote_close_write();

        echo(&stream).await.unwrap();

        assert_eq!(transport.sent_bytes(), b"early");
        assert_eq!(stream.write_status(), WriteStatus::Closed);
        assert_eq!(stream.status(), crate::event::StreamStatus::Closed);
    }
}
