//! Boundary to the storage layer.
//!
//! The planner never reads table data. It asks a [`ScanRangeProvider`] for
//! the byte ranges or key ranges a scan must read, grouped by the host that
//! should read them.

pub mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_error::Result;

use crate::analysis::table::TableDescriptor;
use crate::plan::value_range::ValueRange;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        HostPort {
            host: host.into(),
            port,
        }
    }

    /// Host used for instances of fragments that have nothing to scan.
    pub fn placeholder() -> Self {
        HostPort::new("127.0.0.1", 0)
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where a fragment instance runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExecHost {
    Coordinator,
    Worker(HostPort),
}

impl fmt::Display for ExecHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordinator => write!(f, "coordinator"),
            Self::Worker(host) => write!(f, "{host}"),
        }
    }
}

/// Byte range of a single file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileSplit {
    pub path: String,
    pub offset: u64,
    pub length: u64,
    pub file_length: u64,
}

/// Range of row keys, start inclusive, stop exclusive. `None` is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyRange {
    pub start_key: Option<String>,
    pub stop_key: Option<String>,
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.start_key {
            Some(key) => write!(f, "{key}")?,
            None => write!(f, "<unbounded>")?,
        }
        write!(f, ":")?;
        match &self.stop_key {
            Some(key) => write!(f, "{key}"),
            None => write!(f, "<unbounded>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScanRange {
    File(FileSplit),
    Key(KeyRange),
}

/// Scan ranges assigned to a single host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostScanRange {
    pub host: HostPort,
    pub ranges: Vec<ScanRange>,
}

pub trait ScanRangeProvider: fmt::Debug + Send + Sync {
    /// Compute the scan ranges of a table, pruned using the per clustering
    /// column `key_ranges`.
    ///
    /// File splits longer than `max_scan_range_length` are split further, 0
    /// disables splitting. At most `num_partitions` host assignments are
    /// returned, 0 means no limit. Returning no assignments is valid.
    fn scan_ranges(
        &self,
        table: &TableDescriptor,
        key_ranges: &[Option<ValueRange>],
        max_scan_range_length: u64,
        num_partitions: usize,
    ) -> Result<Vec<HostScanRange>>;

    /// Total size of the table's data in bytes, if known.
    fn total_bytes(&self, table: &TableDescriptor) -> Option<u64>;
}
