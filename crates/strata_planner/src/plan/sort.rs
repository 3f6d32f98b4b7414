use serde::{Deserialize, Serialize};

use super::PlanNodeInfo;
use crate::analysis::statement::SortInfo;
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};
use crate::expr::Expression;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortNode {
    pub sort_info: SortInfo,
    /// Only keep the top rows, requires a limit on the node.
    pub use_top_n: bool,
}

impl PlanNodeInfo for SortNode {
    fn name(&self) -> &'static str {
        "Sort"
    }

    fn for_each_expr<'a, F>(&'a self, func: &mut F)
    where
        F: FnMut(&'a Expression),
    {
        for order_by in &self.sort_info.exprs {
            func(&order_by.expr);
        }
    }
}

impl Explainable for SortNode {
    fn explain_entry(&self, _conf: ExplainConfig) -> ExplainEntry {
        let name = if self.use_top_n { "TOP-N" } else { "SORT" };
        ExplainEntry::new(name).with_values("order_by", &self.sort_info.exprs)
    }
}
