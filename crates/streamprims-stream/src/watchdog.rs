use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::stream::MessageStream;

/// Abort `stream` with [`StreamError::InactivityTimeout`] once no data has
/// been sent or received for `config().inactivity_timeout`.
///
/// The watchdog task exits on its own when the stream closes.
pub fn enforce_inactivity_timeout(stream: &MessageStream) -> JoinHandle<()> {
    let stream = stream.clone();
    let timeout = stream.config().inactivity_timeout;
    let mut lifecycle = stream.subscribe_lifecycle();

    tokio::spawn(async move {
        loop {
            if stream.status().is_terminal() {
                return;
            }

            let deadline = stream.timeline().last_activity + timeout;
            if Instant::now() >= deadline {
                debug!(stream = %stream.id(), ?timeout, "inactivity timeout");
                stream.abort(StreamError::InactivityTimeout(timeout));
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                event = lifecycle.recv() => {
                    if matches!(event, None | Some(StreamEvent::Close { .. })) {
                        return;
                    }
                }
            }
        }
    })
}
