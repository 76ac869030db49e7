use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::VIEWER_WRITE_TIMEOUT_MS;
use crate::error::{AppError, Result};
use crate::hub::StatsHub;
use crate::state::ViewerId;
use crate::types::{SessionEnd, Stats, ViewerState};
use crate::ws::messages::encode_stats;

/// Drives one viewer connection: replay, registration, live stream, teardown.
pub async fn serve_viewer(socket: WebSocket, hub: Arc<StatsHub>, shutdown: watch::Receiver<bool>) {
    let (mut sink, mut stream) = socket.split();
    let close_limit = Duration::from_millis(VIEWER_WRITE_TIMEOUT_MS);

    debug!(state = %ViewerState::Replaying, "Viewer connected, replaying history");
    let (id, mut live) = match hub.attach(&mut sink).await {
        Ok(attached) => attached,
        Err(e) => {
            warn!(state = %ViewerState::Closed, "Replay to new viewer failed: {e}");
            let _ = timeout(close_limit, sink.close()).await;
            return;
        }
    };
    info!(viewer = id, state = %ViewerState::Live, viewers = hub.registry().count(), "Viewer live");

    let end = live_loop(id, &mut sink, &mut stream, &mut live, &shutdown).await;

    hub.registry().unregister(id);
    let _ = timeout(close_limit, sink.close()).await;
    info!(viewer = id, reason = %end, state = %ViewerState::Closed, "Viewer left");
}

/// Forwards queued records to the socket while watching for inbound frames.
///
/// Returns when the viewer closes, a write fails or times out, or the
/// viewer's queue is dropped by the broadcaster or on shutdown.
pub async fn live_loop<S, R, E>(
    id: ViewerId,
    sink: &mut S,
    stream: &mut R,
    live: &mut mpsc::Receiver<Stats>,
    shutdown: &watch::Receiver<bool>,
) -> SessionEnd
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let write_timeout = Duration::from_millis(VIEWER_WRITE_TIMEOUT_MS);

    loop {
        tokio::select! {
            queued = live.recv() => {
                let Some(stats) = queued else {
                    return if *shutdown.borrow() {
                        SessionEnd::ShuttingDown
                    } else {
                        SessionEnd::Evicted
                    };
                };
                match write_record(sink, &stats, write_timeout).await {
                    Ok(()) => {}
                    Err(AppError::ViewerTimeout) => {
                        warn!(viewer = id, "Write to viewer timed out after {write_timeout:?}");
                        return SessionEnd::WriteTimeout;
                    }
                    Err(e) => {
                        warn!(viewer = id, "Write to viewer failed: {e}");
                        return SessionEnd::WriteFailed;
                    }
                }
            }

            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::ClientClosed,
                    Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {
                        warn!(viewer = id, "Ignoring inbound message, viewers are read-only");
                    }
                    // ping/pong are answered by the transport
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(viewer = id, "Viewer read error: {e}");
                        return SessionEnd::ProtocolError;
                    }
                }
            }
        }
    }
}

async fn write_record<S>(sink: &mut S, stats: &Stats, limit: Duration) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let frame = encode_stats(stats)?;
    match timeout(limit, sink.send(Message::Text(frame))).await {
        Ok(sent) => sent.map_err(AppError::viewer),
        Err(_) => Err(AppError::ViewerTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{frame_timestamps, stats, RecordingSink};
    use futures_util::stream;
    use std::pin::Pin;

    type Inbound = Pin<Box<dyn Stream<Item = std::result::Result<Message, String>> + Send>>;

    /// Inbound stream fed by a channel; stays pending while the sender lives.
    fn inbound() -> (mpsc::Sender<std::result::Result<Message, String>>, Inbound) {
        let (tx, rx) = mpsc::channel(8);
        let s = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|m| (m, rx)) });
        (tx, Box::pin(s))
    }

    #[tokio::test]
    async fn forwards_queued_records_until_evicted() {
        let (_in_tx, mut inbound) = inbound();
        let (live_tx, mut live) = mpsc::channel(8);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        live_tx.send(stats(1)).await.unwrap();
        live_tx.send(stats(2)).await.unwrap();
        drop(live_tx);

        let mut sink = RecordingSink::default();
        let end = live_loop(1, &mut sink, &mut inbound, &mut live, &shutdown).await;

        assert_eq!(end, SessionEnd::Evicted);
        assert_eq!(frame_timestamps(&sink.frames), vec![1, 2]);
    }

    #[tokio::test]
    async fn inbound_text_is_ignored_and_close_ends_session() {
        let (in_tx, mut inbound) = inbound();
        let (_live_tx, mut live) = mpsc::channel(8);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        in_tx.send(Ok(Message::Text("hello".to_string()))).await.unwrap();
        in_tx.send(Ok(Message::Close(None))).await.unwrap();

        let mut sink = RecordingSink::default();
        let end = live_loop(1, &mut sink, &mut inbound, &mut live, &shutdown).await;

        assert_eq!(end, SessionEnd::ClientClosed);
        assert!(sink.frames.is_empty());
    }

    #[tokio::test]
    async fn read_error_ends_session() {
        let (in_tx, mut inbound) = inbound();
        let (_live_tx, mut live) = mpsc::channel(8);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        in_tx.send(Err("reset".to_string())).await.unwrap();

        let mut sink = RecordingSink::default();
        let end = live_loop(1, &mut sink, &mut inbound, &mut live, &shutdown).await;
        assert_eq!(end, SessionEnd::ProtocolError);
    }

    #[tokio::test]
    async fn broken_socket_ends_session() {
        let (_in_tx, mut inbound) = inbound();
        let (live_tx, mut live) = mpsc::channel(8);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        live_tx.send(stats(1)).await.unwrap();

        let mut sink = RecordingSink::failing();
        let end = live_loop(1, &mut sink, &mut inbound, &mut live, &shutdown).await;
        assert_eq!(end, SessionEnd::WriteFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_socket_times_out() {
        let (_in_tx, mut inbound) = inbound();
        let (live_tx, mut live) = mpsc::channel(8);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        live_tx.send(stats(1)).await.unwrap();

        let mut sink = RecordingSink::stalled();
        let end = live_loop(1, &mut sink, &mut inbound, &mut live, &shutdown).await;
        assert_eq!(end, SessionEnd::WriteTimeout);
    }

    #[tokio::test]
    async fn closed_queue_during_shutdown_is_reported_as_such() {
        let (_in_tx, mut inbound) = inbound();
        let (live_tx, mut live) = mpsc::channel::<Stats>(8);
        let (shutdown_tx, shutdown) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        drop(live_tx);

        let mut sink = RecordingSink::default();
        let end = live_loop(1, &mut sink, &mut inbound, &mut live, &shutdown).await;
        assert_eq!(end, SessionEnd::ShuttingDown);
    }
}
