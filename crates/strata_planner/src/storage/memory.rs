use hashbrown::HashMap;
use indexmap::IndexMap;
use strata_error::{DbError, Result};
use tracing::debug;

use super::{FileSplit, HostPort, HostScanRange, KeyRange, ScanRange, ScanRangeProvider};
use crate::analysis::table::{TableDescriptor, TableFormat};
use crate::expr::Expression;
use crate::expr::literal_expr::ScalarValue;
use crate::plan::value_range::ValueRange;

/// A block of a file stored on a single host.
#[derive(Debug, Clone, PartialEq)]
pub struct FileBlock {
    pub path: String,
    pub offset: u64,
    pub length: u64,
    pub file_length: u64,
    pub host: HostPort,
    /// Values of the table's clustering columns for the partition holding
    /// this file. May be shorter than the number of clustering columns.
    pub partition_values: Vec<ScalarValue>,
}

/// A region of a key-value table, start inclusive, stop exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub start_key: Option<String>,
    pub stop_key: Option<String>,
    pub host: HostPort,
}

#[derive(Debug, Clone)]
enum TableData {
    Files(Vec<FileBlock>),
    Regions(Vec<Region>),
}

/// Storage layout held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: HashMap<String, TableData>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table with no data.
    pub fn add_empty_table(&mut self, table: &TableDescriptor) {
        let data = match table.format {
            TableFormat::File => TableData::Files(Vec::new()),
            TableFormat::KeyValue => TableData::Regions(Vec::new()),
        };
        self.tables.insert(table.name.clone(), data);
    }

    pub fn add_file_block(&mut self, table: &str, block: FileBlock) -> Result<()> {
        match self
            .tables
            .entry(table.to_string())
            .or_insert_with(|| TableData::Files(Vec::new()))
        {
            TableData::Files(blocks) => {
                blocks.push(block);
                Ok(())
            }
            TableData::Regions(_) => Err(DbError::new(format!(
                "Cannot add file block to key-value table '{table}'"
            ))),
        }
    }

    pub fn add_region(&mut self, table: &str, region: Region) -> Result<()> {
        match self
            .tables
            .entry(table.to_string())
            .or_insert_with(|| TableData::Regions(Vec::new()))
        {
            TableData::Regions(regions) => {
                regions.push(region);
                Ok(())
            }
            TableData::Files(_) => Err(DbError::new(format!(
                "Cannot add region to file table '{table}'"
            ))),
        }
    }

    fn table_data(&self, table: &TableDescriptor) -> Result<&TableData> {
        self.tables
            .get(&table.name)
            .ok_or_else(|| DbError::new(format!("Missing storage for table '{}'", table.name)))
    }
}

impl ScanRangeProvider for MemoryStorage {
    fn scan_ranges(
        &self,
        table: &TableDescriptor,
        key_ranges: &[Option<ValueRange>],
        max_scan_range_length: u64,
        num_partitions: usize,
    ) -> Result<Vec<HostScanRange>> {
        let mut by_host: IndexMap<HostPort, Vec<ScanRange>> = IndexMap::new();

        match self.table_data(table)? {
            TableData::Files(blocks) => {
                for block in blocks.iter().filter(|b| !is_pruned(b, key_ranges)) {
                    let ranges = by_host.entry(block.host.clone()).or_default();
                    for (offset, length) in split_block(block.offset, block.length, max_scan_range_length) {
                        ranges.push(ScanRange::File(FileSplit {
                            path: block.path.clone(),
                            offset,
                            length,
                            file_length: block.file_length,
                        }));
                    }
                }
            }
            TableData::Regions(regions) => {
                let (start, stop) = match key_ranges.first() {
                    Some(Some(range)) => row_key_bounds(range),
                    _ => (None, None),
                };
                for region in regions {
                    if let Some(range) = clip_region(region, start.as_deref(), stop.as_deref()) {
                        by_host
                            .entry(region.host.clone())
                            .or_default()
                            .push(ScanRange::Key(range));
                    }
                }
            }
        }

        let mut assignments: Vec<HostScanRange> = by_host
            .into_iter()
            .map(|(host, ranges)| HostScanRange { host, ranges })
            .collect();

        // Fold extra hosts onto the first `num_partitions` assignments.
        if num_partitions > 0 && assignments.len() > num_partitions {
            let extra = assignments.split_off(num_partitions);
            for (idx, assignment) in extra.into_iter().enumerate() {
                assignments[idx % num_partitions]
                    .ranges
                    .extend(assignment.ranges);
            }
        }

        debug!(
            table = %table.name,
            num_assignments = assignments.len(),
            "computed scan ranges"
        );

        Ok(assignments)
    }

    fn total_bytes(&self, table: &TableDescriptor) -> Option<u64> {
        match self.tables.get(&table.name)? {
            TableData::Files(blocks) => Some(blocks.iter().map(|b| b.length).sum()),
            TableData::Regions(_) => None,
        }
    }
}

/// If the block's partition values exclude it from every row matching the
/// key ranges.
fn is_pruned(block: &FileBlock, key_ranges: &[Option<ValueRange>]) -> bool {
    key_ranges
        .iter()
        .zip(&block.partition_values)
        .any(|(range, value)| match range {
            Some(range) => range.contains(value) == Some(false),
            None => false,
        })
}

fn split_block(offset: u64, length: u64, max_len: u64) -> Vec<(u64, u64)> {
    if max_len == 0 || length <= max_len {
        return vec![(offset, length)];
    }
    let mut splits = Vec::new();
    let mut pos = offset;
    let end = offset + length;
    while pos < end {
        let len = max_len.min(end - pos);
        splits.push((pos, len));
        pos += len;
    }
    splits
}

/// Convert a row key range into start (inclusive) and stop (exclusive)
/// keys.
///
/// Bounds that aren't string literals are treated as unbounded.
fn row_key_bounds(range: &ValueRange) -> (Option<String>, Option<String>) {
    fn successor(key: &str) -> String {
        format!("{key}\0")
    }

    match range {
        ValueRange::Eq(expr) => match literal_str(expr) {
            Some(key) => (Some(key.to_string()), Some(successor(key))),
            None => (None, None),
        },
        ValueRange::Bounded { lower, upper } => {
            let start = lower.as_ref().and_then(|b| {
                let key = b.literal()?.try_as_str()?;
                Some(if b.inclusive {
                    key.to_string()
                } else {
                    successor(key)
                })
            });
            let stop = upper.as_ref().and_then(|b| {
                let key = b.literal()?.try_as_str()?;
                Some(if b.inclusive {
                    successor(key)
                } else {
                    key.to_string()
                })
            });
            (start, stop)
        }
    }
}

fn literal_str(expr: &Expression) -> Option<&str> {
    match expr {
        Expression::Literal(lit) => lit.literal.try_as_str(),
        _ => None,
    }
}

/// Intersect a region with the `[start, stop)` key range.
fn clip_region(region: &Region, start: Option<&str>, stop: Option<&str>) -> Option<KeyRange> {
    let start_key = match (region.start_key.as_deref(), start) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    let stop_key = match (region.stop_key.as_deref(), stop) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };

    if let (Some(start), Some(stop)) = (start_key, stop_key) {
        if start >= stop {
            return None;
        }
    }

    Some(KeyRange {
        start_key: start_key.map(str::to_string),
        stop_key: stop_key.map(str::to_string),
    })
}
