use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::error::Result;
use crate::types::Stats;

static DECODE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Encodes one record as a self-contained JSON object.
///
/// The same encoding is used for WebSocket text frames and for lines of the
/// persistence log, so every frame and every line decodes on its own.
pub fn encode_stats(stats: &Stats) -> Result<String> {
    Ok(serde_json::to_string(stats)?)
}

pub fn decode_stats(raw: &str) -> Result<Stats> {
    Ok(serde_json::from_str(raw.trim())?)
}

/// Like [`decode_stats`] but logs (rate limited) and returns `None` on failure.
pub fn decode_stats_lossy(raw: &str, origin: &str) -> Option<Stats> {
    match decode_stats(raw) {
        Ok(stats) => Some(stats),
        Err(e) => {
            let count = DECODE_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
            if count <= 10 || count % 1000 == 0 {
                let sample: String = raw.chars().take(200).collect();
                warn!(count, origin, "Unreadable record ({e}): {sample}");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_fields() {
        let stats = Stats {
            timestamp: 1_700_000_123,
            average: 23.456789,
            min: 0.041,
            max: 1234.5,
            above_threshold_pct: 33.333333333333336,
        };
        let encoded = encode_stats(&stats).unwrap();
        assert_eq!(decode_stats(&encoded).unwrap(), stats);
    }

    #[test]
    fn wire_names_match_viewer_contract() {
        let stats = Stats { timestamp: 7, average: 1.5, min: 1.0, max: 2.0, above_threshold_pct: 50.0 };
        let value: serde_json::Value = serde_json::from_str(&encode_stats(&stats).unwrap()).unwrap();
        assert_eq!(value["timestamp"], 7);
        assert_eq!(value["average"], 1.5);
        assert_eq!(value["min"], 1.0);
        assert_eq!(value["max"], 2.0);
        assert_eq!(value["above"], 50.0);
        assert!(value.get("above_threshold_pct").is_none());
    }

    #[test]
    fn decodes_with_surrounding_whitespace() {
        let raw = "  {\"timestamp\":1,\"average\":2.0,\"min\":1.0,\"max\":3.0,\"above\":0.0}\n";
        assert_eq!(decode_stats(raw).unwrap().timestamp, 1);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_stats("12.5 13.0 14.2").is_err());
        assert!(decode_stats(r#"{"totally":"unrelated"}"#).is_err());
        assert!(decode_stats_lossy("not json", "test").is_none());
    }
}
