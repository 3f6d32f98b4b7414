use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::PlanNodeInfo;
use super::value_range::ValueRange;
use crate::analysis::table::TableDescriptor;
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};
use crate::expr::Expression;
use crate::ids::TupleId;

/// Reads a single base table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanNode {
    pub tuple_id: TupleId,
    pub table: Arc<TableDescriptor>,
    /// One entry per clustering column, in declared order.
    pub key_ranges: Vec<Option<ValueRange>>,
}

impl ScanNode {
    /// Clustering column names paired with their derived range.
    pub fn named_ranges(&self) -> impl Iterator<Item = (&str, &ValueRange)> {
        self.table
            .clustering_columns()
            .iter()
            .zip(&self.key_ranges)
            .filter_map(|(col, range)| range.as_ref().map(|r| (col.name.as_str(), r)))
    }
}

impl PlanNodeInfo for ScanNode {
    fn name(&self) -> &'static str {
        "Scan"
    }

    fn for_each_expr<'a, F>(&'a self, func: &mut F)
    where
        F: FnMut(&'a Expression),
    {
        for range in self.key_ranges.iter().flatten() {
            match range {
                ValueRange::Eq(expr) => func(expr),
                ValueRange::Bounded { lower, upper } => {
                    if let Some(bound) = lower {
                        func(&bound.expr);
                    }
                    if let Some(bound) = upper {
                        func(&bound.expr);
                    }
                }
            }
        }
    }
}

impl Explainable for ScanNode {
    fn explain_entry(&self, conf: ExplainConfig) -> ExplainEntry {
        let mut ent = ExplainEntry::new(format!("SCAN {}", self.table.format))
            .with_value("table", &self.table.name)
            .with_values_if_not_empty(
                "key_ranges",
                self.named_ranges().map(|(name, range)| format!("{name} {range}")),
            );
        if conf.verbose {
            ent = ent.with_value("tuple_id", self.tuple_id);
        }
        ent
    }
}
