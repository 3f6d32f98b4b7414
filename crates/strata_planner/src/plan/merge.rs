use serde::{Deserialize, Serialize};

use super::PlanNodeInfo;
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};
use crate::expr::{DisplayExprs, Expression};
use crate::ids::TupleId;

/// N-ary concatenation of its children into a single tuple.
///
/// Child `i` produces the rows described by `result_expr_lists[i]`. Constant
/// rows (union operands without a FROM clause) are listed separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeNode {
    pub tuple_id: TupleId,
    pub result_expr_lists: Vec<Vec<Expression>>,
    pub const_expr_lists: Vec<Vec<Expression>>,
}

impl MergeNode {
    pub fn new(tuple_id: TupleId) -> Self {
        MergeNode {
            tuple_id,
            result_expr_lists: Vec::new(),
            const_expr_lists: Vec::new(),
        }
    }
}

impl PlanNodeInfo for MergeNode {
    fn name(&self) -> &'static str {
        "Merge"
    }

    fn for_each_expr<'a, F>(&'a self, func: &mut F)
    where
        F: FnMut(&'a Expression),
    {
        for list in self.result_expr_lists.iter().chain(&self.const_expr_lists) {
            list.iter().for_each(&mut *func);
        }
    }
}

impl Explainable for MergeNode {
    fn explain_entry(&self, conf: ExplainConfig) -> ExplainEntry {
        let mut ent = ExplainEntry::new("MERGE").with_values_if_not_empty(
            "constant_rows",
            self.const_expr_lists
                .iter()
                .map(|list| format!("({})", DisplayExprs(list))),
        );
        if conf.verbose {
            ent = ent.with_values(
                "result_exprs",
                self.result_expr_lists
                    .iter()
                    .map(|list| format!("({})", DisplayExprs(list))),
            );
        }
        ent
    }
}
