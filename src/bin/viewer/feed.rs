use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::app::{FeedEvent, StatsFrame};

const RECONNECT_BACKOFF_MS: [u64; 4] = [500, 1_000, 2_000, 5_000];

/// Keeps a WebSocket open to the server and forwards every decoded record to
/// the UI. Returns once the UI side of `tx` is gone.
pub async fn run_feed(url: String, tx: mpsc::Sender<FeedEvent>) {
    let mut backoff_idx = 0usize;

    loop {
        let reason = match connect_once(&url, &tx).await {
            Ok(Some(received)) => {
                if received > 0 {
                    backoff_idx = 0;
                }
                "server closed the connection".to_string()
            }
            Ok(None) => return,
            Err(e) => e,
        };
        if tx.send(FeedEvent::Disconnected(reason)).await.is_err() {
            return;
        }

        let delay_ms = RECONNECT_BACKOFF_MS[backoff_idx];
        backoff_idx = (backoff_idx + 1).min(RECONNECT_BACKOFF_MS.len() - 1);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

/// One connection. `Ok(Some(n))` after the server hangs up having sent `n`
/// records, `Ok(None)` when the UI has gone away.
async fn connect_once(url: &str, tx: &mpsc::Sender<FeedEvent>) -> Result<Option<u64>, String> {
    let (ws_stream, _) = connect_async(url).await.map_err(|e| e.to_string())?;
    let (mut write, mut read) = ws_stream.split();

    if tx.send(FeedEvent::Connected).await.is_err() {
        return Ok(None);
    }

    let mut received = 0u64;
    while let Some(msg) = read.next().await {
        match msg.map_err(|e| e.to_string())? {
            Message::Text(text) => {
                // Unparseable frames are skipped; the next record still lands.
                let Ok(frame) = serde_json::from_str::<StatsFrame>(&text) else {
                    continue;
                };
                if tx.send(FeedEvent::Record(frame)).await.is_err() {
                    return Ok(None);
                }
                received += 1;
            }
            Message::Ping(data) => {
                write.send(Message::Pong(data)).await.map_err(|e| e.to_string())?;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(Some(received))
}
