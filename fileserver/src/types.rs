use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

// -------------------------------------------
// Timestamps
// -------------------------------------------

/// Seconds from the Unix epoch back to 0001-01-01T00:00:00Z.
const ZERO_TIME_SECS: i64 = -62_135_596_800;

/// The "unset" timestamp reported for records without a known mtime.
pub fn zero_time() -> DateTime<Utc> {
    DateTime::from_timestamp(ZERO_TIME_SECS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Converts a filesystem timestamp, falling back to the zero time.
pub fn mtime_of(modified: std::io::Result<SystemTime>) -> DateTime<Utc> {
    modified.map(DateTime::<Utc>::from).unwrap_or_else(|_| zero_time())
}

// -------------------------------------------
// Records
// -------------------------------------------

/// One file, directory or archive member.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub directory: bool,
    pub filename: String,
    pub size: i64,
    pub mtime: DateTime<Utc>,
    /// Only set on a listed directory.
    pub files: Option<Vec<FileRecord>>,
}

impl Default for FileRecord {
    fn default() -> Self {
        FileRecord {
            directory: false,
            filename: String::new(),
            size: 0,
            mtime: zero_time(),
            files: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub error: String,
}

/// Raw classifier output, trailing newline included.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InspectEnvelope {
    pub file: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ContentsEnvelope {
    pub files: Vec<FileRecord>,
    pub lines: Vec<String>,
}

impl ContentsEnvelope {
    pub fn new(files: Vec<FileRecord>) -> Self {
        ContentsEnvelope {
            files,
            lines: Vec::new(),
        }
    }
}
