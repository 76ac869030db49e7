use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

static REJECTED_LINES: AtomicU64 = AtomicU64::new(0);

/// Parses one line of standard input as a latency in milliseconds.
///
/// Returns `None` (and logs, rate limited) for anything that is not a finite,
/// non-negative number.
pub fn parse_sample_line(line: &str) -> Option<f64> {
    let trimmed = line.trim();
    match trimmed.parse::<f64>() {
        Ok(ms) if ms.is_finite() && ms >= 0.0 => Some(ms),
        Ok(ms) => {
            reject(trimmed, &format!("out of range value {ms}"));
            None
        }
        Err(e) => {
            reject(trimmed, &e.to_string());
            None
        }
    }
}

fn reject(line: &str, reason: &str) {
    let count = REJECTED_LINES.fetch_add(1, Ordering::Relaxed) + 1;
    if count <= 10 || count % 1000 == 0 {
        let sample: String = line.chars().take(80).collect();
        warn!(count, "Couldn't convert '{sample}': {reason}");
    }
}

/// Extracts the round-trip time from one line of `ping` output.
///
/// Understands the `time=12.3 ms` reply format of iputils/BSD ping and the
/// `time<1ms` form printed for sub-millisecond replies (read as the bound).
/// Banner, timeout and statistics lines yield `None`.
pub fn parse_ping_line(line: &str) -> Option<f64> {
    line.match_indices("time").find_map(|(idx, key)| {
        let rest = &line[idx + key.len()..];
        let rest = rest.strip_prefix('=').or_else(|| rest.strip_prefix('<'))?;
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let ms = rest[..end].parse::<f64>().ok()?;
        (ms.is_finite() && ms >= 0.0).then_some(ms)
    })
}
