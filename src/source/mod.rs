pub mod parse;

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::SOURCE_RESTART_BACKOFF_MS;
use crate::error::{AppError, Result};
use parse::{parse_ping_line, parse_sample_line};

/// Where latency samples come from. Either way the aggregator only sees a
/// stream of milliseconds on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleSource {
    /// One number per line on standard input.
    Stdin,
    /// Replies from the system `ping` command against `host`.
    Ping { host: String },
}

impl SampleSource {
    pub fn from_config(kind: &str, target_host: Option<&str>) -> Result<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "stdin" => Ok(SampleSource::Stdin),
            "ping" => {
                let host = target_host
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| {
                        AppError::Config("TARGET_HOST is required when SAMPLE_SOURCE=ping".to_string())
                    })?;
                Ok(SampleSource::Ping { host: host.to_string() })
            }
            other => Err(AppError::Config(format!(
                "SAMPLE_SOURCE must be 'stdin' or 'ping', got '{other}'"
            ))),
        }
    }

    /// Pushes samples into `tx` until the source is exhausted or the receiver
    /// is gone. Source failures are logged, never propagated.
    pub async fn run(self, tx: mpsc::Sender<f64>) {
        match self {
            SampleSource::Stdin => {
                match forward_lines(tokio::io::stdin(), &tx, parse_sample_line).await {
                    Ok(n) => info!(samples = n, "Standard input closed, no more samples"),
                    Err(e) => error!("Reading samples from standard input failed: {e}"),
                }
            }
            SampleSource::Ping { host } => run_ping(&host, &tx).await,
        }
    }
}

impl std::fmt::Display for SampleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleSource::Stdin => write!(f, "stdin"),
            SampleSource::Ping { host } => write!(f, "ping {host}"),
        }
    }
}

/// Parses each line with `parse` and forwards accepted values. Returns the
/// number forwarded, at EOF or once the receiver has gone away.
///
/// Lines are decoded lossily, so bytes that are not UTF-8 only spoil the line
/// they sit on.
async fn forward_lines<R>(reader: R, tx: &mpsc::Sender<f64>, parse: fn(&str) -> Option<f64>) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut forwarded = 0u64;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let Some(ms) = parse(&line) else { continue };
        if tx.send(ms).await.is_err() {
            break;
        }
        forwarded += 1;
    }
    Ok(forwarded)
}

fn ping_sample(line: &str) -> Option<f64> {
    let sample = parse_ping_line(line);
    if sample.is_none() {
        debug!("Ignoring ping output: {line}");
    }
    sample
}

async fn run_ping(host: &str, tx: &mpsc::Sender<f64>) {
    let mut backoff_idx = 0usize;

    loop {
        info!(host, "Starting ping");
        match ping_once(host, tx).await {
            Ok(n) => {
                if n > 0 {
                    backoff_idx = 0;
                }
                warn!(host, samples = n, "ping exited");
            }
            Err(e) => error!(host, "ping failed: {e}"),
        }
        if tx.is_closed() {
            return;
        }

        let delay_ms = SOURCE_RESTART_BACKOFF_MS
            .get(backoff_idx)
            .copied()
            .unwrap_or(1_000);
        backoff_idx = (backoff_idx + 1).min(SOURCE_RESTART_BACKOFF_MS.len() - 1);

        warn!("Restarting ping in {delay_ms}ms");
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

async fn ping_once(host: &str, tx: &mpsc::Sender<f64>) -> Result<u64> {
    let mut child = Command::new("ping")
        .arg(host)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Task("ping stdout was not captured".to_string()))?;

    let forwarded = forward_lines(stdout, tx, ping_sample).await?;
    let status = child.wait().await?;
    debug!(%status, "ping process finished");
    Ok(forwarded)
}
