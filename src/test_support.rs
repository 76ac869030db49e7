//! Shared fixtures for unit tests.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::ws::Message;
use futures_util::Sink;

use crate::types::Stats;
use crate::ws::messages::decode_stats;

pub fn stats(ts: i64) -> Stats {
    Stats { timestamp: ts, average: 20.0, min: 10.0, max: 30.0, above_threshold_pct: 0.0 }
}

/// Decodes the timestamps of every text frame, in order.
pub fn frame_timestamps(frames: &[Message]) -> Vec<i64> {
    frames
        .iter()
        .filter_map(|m| match m {
            Message::Text(t) => Some(decode_stats(t).unwrap().timestamp),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
enum Mode {
    #[default]
    Ok,
    Failing,
    Stalled,
}

/// In-memory stand-in for a viewer's outbound WebSocket half.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub frames: Vec<Message>,
    pub flushes: usize,
    mode: Mode,
}

impl RecordingSink {
    /// Every write fails as if the peer had reset the connection.
    pub fn failing() -> Self {
        Self { mode: Mode::Failing, ..Self::default() }
    }

    /// Never becomes ready to accept a write.
    pub fn stalled() -> Self {
        Self { mode: Mode::Stalled, ..Self::default() }
    }
}

impl Sink<Message> for RecordingSink {
    type Error = String;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
        match self.mode {
            Mode::Ok => Poll::Ready(Ok(())),
            Mode::Failing => Poll::Ready(Err("connection reset by peer".to_string())),
            Mode::Stalled => Poll::Pending,
        }
    }

    fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), String> {
        self.frames.push(item);
        Ok(())
    }

    fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
        self.flushes += 1;
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
        Poll::Ready(Ok(()))
    }
}
