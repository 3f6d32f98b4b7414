use serde::{Deserialize, Serialize};

use super::PlanNodeInfo;
use crate::analysis::aggregate_info::AggregateInfo;
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};
use crate::expr::Expression;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateNode {
    pub agg_info: AggregateInfo,
    /// Produce final values rather than intermediate partial results.
    pub needs_finalize: bool,
    /// Combines partial results produced by another aggregation.
    pub is_merge: bool,
}

impl PlanNodeInfo for AggregateNode {
    fn name(&self) -> &'static str {
        "Aggregate"
    }

    fn for_each_expr<'a, F>(&'a self, func: &mut F)
    where
        F: FnMut(&'a Expression),
    {
        self.agg_info.grouping_exprs.iter().for_each(&mut *func);
        for agg in &self.agg_info.aggregate_exprs {
            agg.inputs.iter().for_each(&mut *func);
        }
    }
}

impl Explainable for AggregateNode {
    fn explain_entry(&self, conf: ExplainConfig) -> ExplainEntry {
        let name = if self.is_merge {
            "MERGE AGGREGATE"
        } else {
            "AGGREGATE"
        };
        let mut ent = ExplainEntry::new(name)
            .with_values_if_not_empty("output", &self.agg_info.aggregate_exprs)
            .with_values_if_not_empty("group_by", &self.agg_info.grouping_exprs);
        if conf.verbose {
            ent = ent
                .with_value("output_tuple", self.agg_info.output_tuple)
                .with_value("finalize", self.needs_finalize);
        }
        ent
    }
}
