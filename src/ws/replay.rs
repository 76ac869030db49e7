use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use tokio::time::timeout;

use crate::config::VIEWER_WRITE_TIMEOUT_MS;
use crate::db::LogReader;
use crate::error::{AppError, Result};
use crate::types::Stats;
use crate::ws::messages::encode_stats;

/// Upper bound on any single replay write. A viewer that stops reading
/// mid-replay fails with `ViewerTimeout` instead of parking its task.
pub fn write_timeout() -> Duration {
    Duration::from_millis(VIEWER_WRITE_TIMEOUT_MS)
}

/// Feeds every record the reader can currently see into `sink`, one text
/// frame per record, without flushing. Returns how many were fed.
pub async fn stream_history<S>(reader: &mut LogReader, sink: &mut S) -> Result<usize>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut sent = 0;
    while let Some(stats) = reader.next_record().await? {
        feed_record(sink, &stats).await?;
        sent += 1;
    }
    Ok(sent)
}

/// Feeds already-read records, in order, without flushing.
pub async fn feed_records<S>(sink: &mut S, records: &[Stats]) -> Result<usize>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    for stats in records {
        feed_record(sink, stats).await?;
    }
    Ok(records.len())
}

async fn feed_record<S>(sink: &mut S, stats: &Stats) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let frame = encode_stats(stats)?;
    match timeout(write_timeout(), sink.feed(Message::Text(frame))).await {
        Ok(fed) => fed.map_err(AppError::viewer),
        Err(_) => Err(AppError::ViewerTimeout),
    }
}

/// Flushes everything fed so far, bounded like a single write.
pub async fn flush<S>(sink: &mut S) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match timeout(write_timeout(), sink.flush()).await {
        Ok(flushed) => flushed.map_err(AppError::viewer),
        Err(_) => Err(AppError::ViewerTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LogWriter;
    use crate::test_support::{frame_timestamps, stats, RecordingSink};

    #[tokio::test]
    async fn streams_whole_log_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pings.jsonl");
        let mut writer = LogWriter::open(&path).unwrap();
        for ts in [10, 20, 30] {
            writer.append(&stats(ts)).unwrap();
        }

        let mut reader = LogReader::open(&path).await.unwrap();
        let mut sink = RecordingSink::default();
        let sent = stream_history(&mut reader, &mut sink).await.unwrap();

        assert_eq!(sent, 3);
        assert_eq!(frame_timestamps(&sink.frames), vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn empty_log_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pings.jsonl");
        let _writer = LogWriter::open(&path).unwrap();

        let mut reader = LogReader::open(&path).await.unwrap();
        let mut sink = RecordingSink::default();
        assert_eq!(stream_history(&mut reader, &mut sink).await.unwrap(), 0);
        assert!(sink.frames.is_empty());
    }

    #[tokio::test]
    async fn sink_failure_aborts_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pings.jsonl");
        let mut writer = LogWriter::open(&path).unwrap();
        writer.append(&stats(1)).unwrap();

        let mut reader = LogReader::open(&path).await.unwrap();
        let mut sink = RecordingSink::failing();
        let err = stream_history(&mut reader, &mut sink).await.unwrap_err();
        assert!(matches!(err, AppError::Viewer(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_sink_times_out_during_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pings.jsonl");
        let mut writer = LogWriter::open(&path).unwrap();
        writer.append(&stats(1)).unwrap();

        let mut reader = LogReader::open(&path).await.unwrap();
        let mut sink = RecordingSink::stalled();
        let err = stream_history(&mut reader, &mut sink).await.unwrap_err();
        assert!(matches!(err, AppError::ViewerTimeout));
        assert!(matches!(flush(&mut sink).await.unwrap_err(), AppError::ViewerTimeout));
    }
}
