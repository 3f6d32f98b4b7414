use std::fmt;

use serde::{Deserialize, Serialize};

use super::PlanNodeInfo;
use crate::analysis::statement::{JoinHint, JoinOp};
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};
use crate::expr::{DisplayExprs, Expression};

/// How a hash join is executed across nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinDistribution {
    /// Right side is sent in full to every instance of the left side.
    Broadcast,
    /// Both sides are hash partitioned on the join keys.
    Partitioned,
}

impl fmt::Display for JoinDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast => write!(f, "BROADCAST"),
            Self::Partitioned => write!(f, "PARTITIONED"),
        }
    }
}

/// Hash join, right child is the build side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashJoinNode {
    pub join_op: JoinOp,
    /// Equality pairs, left element bound by the left child, right element
    /// bound by the right child.
    pub eq_join_conjuncts: Vec<(Expression, Expression)>,
    /// Non-equality ON clause conjuncts of outer joins, evaluated while
    /// joining.
    pub other_join_conjuncts: Vec<Expression>,
    pub hint: Option<JoinHint>,
    /// Set by the fragmenter.
    pub distribution: Option<JoinDistribution>,
}

impl HashJoinNode {
    pub fn lhs_exprs(&self) -> Vec<Expression> {
        self.eq_join_conjuncts.iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn rhs_exprs(&self) -> Vec<Expression> {
        self.eq_join_conjuncts.iter().map(|(_, r)| r.clone()).collect()
    }
}

impl PlanNodeInfo for HashJoinNode {
    fn name(&self) -> &'static str {
        "HashJoin"
    }

    fn for_each_expr<'a, F>(&'a self, func: &mut F)
    where
        F: FnMut(&'a Expression),
    {
        for (left, right) in &self.eq_join_conjuncts {
            func(left);
            func(right);
        }
        self.other_join_conjuncts.iter().for_each(func);
    }
}

impl Explainable for HashJoinNode {
    fn explain_entry(&self, _conf: ExplainConfig) -> ExplainEntry {
        let mut ent = ExplainEntry::new("HASH JOIN")
            .with_value("join_op", self.join_op)
            .with_values(
                "hash_predicates",
                self.eq_join_conjuncts.iter().map(|(l, r)| format!("{l} = {r}")),
            )
            .with_value_opt("hint", self.hint)
            .with_value_opt("distribution", self.distribution);
        if !self.other_join_conjuncts.is_empty() {
            ent = ent.with_value("other_join_predicates", DisplayExprs(&self.other_join_conjuncts));
        }
        ent
    }
}
