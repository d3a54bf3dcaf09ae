//! Segment and assignment records
//!
//! A segment has no record of its own. It exists as a file in the segment
//! source, and as one `<host>/<segment_id>` key per host that claims it. The
//! key's value is the segment's byte size; its creation index orders claims
//! by age.

use crate::common::Result;
use crate::consul::KvRecord;
use crate::hdfs::RemoteSegmentFile;
use serde::{Deserialize, Serialize};

/// Replica count every segment should have
pub const MINIMUM_ASSIGNMENTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    /// Unknown when the segment is only referenced by id
    pub size: Option<u64>,
}

impl Segment {
    pub fn new(id: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            id: id.into(),
            size,
        }
    }

    pub fn from_remote(file: &RemoteSegmentFile) -> Self {
        Self::new(file.segment_id(), Some(file.length))
    }

    /// Key recording that `host` stores this segment
    pub fn host_key(&self, host: &str) -> String {
        format!("{}/{}", host, self.id)
    }

    pub fn minimum_assignments(&self) -> usize {
        MINIMUM_ASSIGNMENTS
    }

    pub fn size_bytes(&self) -> u64 {
        self.size.unwrap_or(0)
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// A claim that `host` stores `segment_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub host: String,
    pub segment_id: String,
    pub size_bytes: u64,
    pub create_index: u64,
}

impl Assignment {
    /// Parse a `<host>/<segment_id>` record
    pub fn from_record(record: &KvRecord) -> Result<Self> {
        let (host, segment_id) = record
            .key
            .split_once('/')
            .filter(|(host, segment)| !host.is_empty() && !segment.is_empty())
            .ok_or_else(|| {
                crate::Error::Coordination(format!("not an assignment key: {}", record.key))
            })?;

        Ok(Self {
            host: host.to_string(),
            segment_id: segment_id.to_string(),
            size_bytes: parse_bytes(&record.value)?,
            create_index: record.create_index,
        })
    }

    pub fn segment(&self) -> Segment {
        Segment::new(self.segment_id.clone(), Some(self.size_bytes))
    }
}

/// Parse a byte count stored as text. Empty and `null` count as zero.
pub fn parse_bytes(value: &str) -> Result<u64> {
    let value = value.trim();
    if value.is_empty() || value == "null" {
        return Ok(0);
    }
    value
        .parse()
        .map_err(|_| crate::Error::Coordination(format!("not a byte count: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, value: &str, index: u64) -> KvRecord {
        KvRecord {
            key: key.to_string(),
            value: value.to_string(),
            create_index: index,
        }
    }

    #[test]
    fn test_from_remote() {
        let segment = Segment::from_remote(&RemoteSegmentFile {
            path: "/segments/abc.sqlite".to_string(),
            length: 4096,
        });
        assert_eq!(segment.id, "abc");
        assert_eq!(segment.size_bytes(), 4096);
        assert_eq!(segment.host_key("host-a"), "host-a/abc");
        assert_eq!(segment.minimum_assignments(), 2);
    }

    #[test]
    fn test_assignment_from_record() {
        let assignment = Assignment::from_record(&record("host-a/abc", "4096", 17)).unwrap();
        assert_eq!(assignment.host, "host-a");
        assert_eq!(assignment.segment_id, "abc");
        assert_eq!(assignment.size_bytes, 4096);
        assert_eq!(assignment.create_index, 17);

        assert!(Assignment::from_record(&record("host-a", "1000", 1)).is_err());
        assert!(Assignment::from_record(&record("host-a/abc", "lots", 1)).is_err());
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("null").unwrap(), 0);
        assert_eq!(parse_bytes("").unwrap(), 0);
        assert_eq!(parse_bytes(" 12 ").unwrap(), 12);
        assert!(parse_bytes("-5").is_err());
    }
}
