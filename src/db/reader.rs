use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::Result;
use crate::types::Stats;
use crate::ws::messages::decode_stats_lossy;

/// Sequential scan over the persistence log from its first line.
///
/// Reaching the end is not terminal: once more lines are appended,
/// `next_record` picks them up. A trailing line without its newline is held
/// back until the rest of it arrives. Lines are decoded lossily, so a corrupt
/// byte costs only the record it sits in.
pub struct LogReader {
    inner: BufReader<File>,
    pending: Vec<u8>,
    line_no: u64,
}

impl LogReader {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            inner: BufReader::new(file),
            pending: Vec::new(),
            line_no: 0,
        })
    }

    /// Next complete record, or `None` at the current end of the log.
    pub async fn next_record(&mut self) -> Result<Option<Stats>> {
        loop {
            let n = self.inner.read_until(b'\n', &mut self.pending).await?;
            if n == 0 || self.pending.last() != Some(&b'\n') {
                return Ok(None);
            }
            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&raw);
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(stats) = decode_stats_lossy(&line, "log") {
                return Ok(Some(stats));
            }
        }
    }

    /// Reads every record up to the current end of the log.
    pub async fn read_to_end(&mut self) -> Result<Vec<Stats>> {
        let mut out = Vec::new();
        while let Some(stats) = self.next_record().await? {
            out.push(stats);
        }
        Ok(out)
    }

    /// Lines consumed so far, including skipped ones.
    pub fn lines_read(&self) -> u64 {
        self.line_no
    }
}
