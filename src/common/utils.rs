//! Utility functions for segmentd

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::Duration;

/// Percent-encoding set for a single URL path component.
/// `/` is left alone so store keys keep their `host/segment` shape.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'&')
    .add(b'"');

/// Encode a store key or service name for use in a URL path
pub fn encode_path(key: &str) -> String {
    utf8_percent_encode(key, PATH_ENCODE_SET).to_string()
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Render a TTL the way the coordination store expects it ("30s")
pub fn format_ttl(ttl: Duration) -> String {
    format!("{}s", ttl.as_secs().max(1))
}

/// Random upper-case alphanumeric key, used for the startup canary
pub fn random_key(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("host-a/seg 1"), "host-a/seg%201");
        assert_eq!(encode_path("segmentd-read-nodes"), "segmentd-read-nodes");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_format_ttl() {
        assert_eq!(format_ttl(Duration::from_secs(30)), "30s");
        assert_eq!(format_ttl(Duration::from_millis(200)), "1s");
    }

    #[test]
    fn test_random_key() {
        let key = random_key(10);
        assert_eq!(key.len(), 10);
        assert!(key.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
