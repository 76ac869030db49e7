use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;
use crate::types::Stats;
use crate::ws::messages::{decode_stats, encode_stats};

/// Append-only writer for the persistence log. One JSON record per line.
///
/// Appends are synchronous: a write is flushed and synced to the device
/// before `append` returns. This blocks once per window, never per sample.
pub struct LogWriter {
    file: File,
    path: PathBuf,
    records: u64,
}

impl LogWriter {
    /// Opens `path` for appending, creating it if needed. Existing content is
    /// never truncated.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let scan = scan_existing(&mut file)?;
        if scan.unreadable > 0 {
            warn!(
                path = %path.display(),
                unreadable = scan.unreadable,
                "Log contains lines that will be skipped on replay"
            );
        }
        if scan.torn {
            // Start the next record on a fresh line; the torn one is skipped on replay.
            warn!(path = %path.display(), "Log ends with a partial record, terminating it");
            file.write_all(b"\n")?;
            file.sync_data()?;
        }
        info!(path = %path.display(), records = scan.records, "Persistence log open");

        Ok(Self { file, path: path.to_path_buf(), records: scan.records })
    }

    /// A writer over a read-only handle: every append fails.
    #[cfg(test)]
    pub fn read_only(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file, path: path.to_path_buf(), records: 0 })
    }

    pub fn append(&mut self, stats: &Stats) -> Result<()> {
        let mut line = encode_stats(stats)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;
        self.records += 1;
        Ok(())
    }

    /// Readable records in the log, including those from prior runs.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct Scan {
    /// Complete lines that decode as a record.
    records: u64,
    /// Complete non-blank lines that do not.
    unreadable: u64,
    /// The file ends mid-line.
    torn: bool,
}

fn scan_existing(file: &mut File) -> Result<Scan> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&mut *file);
    let mut scan = Scan { records: 0, unreadable: 0, torn: false };
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.last() != Some(&b'\n') {
            scan.torn = true;
            break;
        }
        let text = String::from_utf8_lossy(&line);
        if text.trim().is_empty() {
            continue;
        }
        if decode_stats(&text).is_ok() {
            scan.records += 1;
        } else {
            scan.unreadable += 1;
        }
    }
    Ok(scan)
}
