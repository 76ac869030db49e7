use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::ws::Message;
use futures_util::Sink;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::api::health::HealthState;
use crate::config::VIEWER_QUEUE_CAPACITY;
use crate::db::{LogReader, LogWriter};
use crate::error::Result;
use crate::state::{ClientRegistry, ViewerId};
use crate::types::Stats;
use crate::ws::broadcast::Broadcaster;
use crate::ws::replay;

/// Ties the persistence log to the live viewer set.
///
/// The writer lock serialises two things: a commit (append, then publish) and
/// the moment a replaying viewer is registered. A record is therefore either
/// in the log before the viewer's final catch-up read, or published after the
/// viewer is registered, never both and never neither.
pub struct StatsHub {
    writer: Mutex<LogWriter>,
    path: PathBuf,
    broadcaster: Broadcaster,
    health: Arc<HealthState>,
}

impl StatsHub {
    pub fn new(writer: LogWriter, broadcaster: Broadcaster, health: Arc<HealthState>) -> Arc<Self> {
        let path = writer.path().to_path_buf();
        health.set_records_written(writer.records());
        Arc::new(Self {
            writer: Mutex::new(writer),
            path,
            broadcaster,
            health,
        })
    }

    /// Persists `stats` and then hands it to every live viewer. An append
    /// error is returned before anything is published.
    pub async fn commit(&self, stats: &Stats) -> Result<usize> {
        let mut writer = self.writer.lock().await;
        writer.append(stats)?;
        self.health.set_records_written(writer.records());
        self.health.set_last_window_at(stats.timestamp);
        Ok(self.broadcaster.publish(stats))
    }

    /// Replays the full log into `sink`, then registers the viewer for live
    /// updates. Returns the new id and the viewer's live queue.
    pub async fn attach<S>(&self, sink: &mut S) -> Result<(ViewerId, mpsc::Receiver<Stats>)>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        let mut reader = self.read_all().await?;
        let mut replayed = replay::stream_history(&mut reader, sink).await?;

        let (id, rx, tail) = {
            let _writer = self.writer.lock().await;
            let tail = reader.read_to_end().await?;
            let (tx, rx) = mpsc::channel(VIEWER_QUEUE_CAPACITY);
            let id = self.registry().register(tx);
            (id, rx, tail)
        };

        let delivered = match replay::feed_records(sink, &tail).await {
            Ok(n) => replay::flush(sink).await.map(|()| n),
            Err(e) => Err(e),
        };
        match delivered {
            Ok(n) => replayed += n,
            Err(e) => {
                self.registry().unregister(id);
                return Err(e);
            }
        }

        if !tail.is_empty() {
            debug!(viewer = id, tail = tail.len(), "Caught up on records appended during replay");
        }
        info!(viewer = id, replayed, lines = reader.lines_read(), "Replay complete");
        Ok((id, rx))
    }

    /// Fresh sequential reader over everything persisted so far.
    pub async fn read_all(&self) -> Result<LogReader> {
        LogReader::open(&self.path).await
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        self.broadcaster.registry()
    }

    pub fn log_path(&self) -> &Path {
        &self.path
    }

    /// Ends every live session. Used on shutdown.
    pub fn close_viewers(&self) -> usize {
        self.registry().close_all()
    }
}
