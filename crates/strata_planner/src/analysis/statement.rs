use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::aggregate_info::AggregateInfo;
use super::registry::PredicateRegistry;
use super::table::TableDescriptor;
use crate::expr::Expression;
use crate::ids::TupleId;

/// An analyzed query statement.
#[derive(Debug, Clone)]
pub enum QueryStatement {
    Select(SelectStatement),
    Union(UnionStatement),
}

impl QueryStatement {
    pub fn result_exprs(&self) -> &[Expression] {
        match self {
            Self::Select(s) => &s.result_exprs,
            Self::Union(u) => &u.result_exprs,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            Self::Select(s) => s.limit,
            Self::Union(u) => u.limit,
        }
    }

    pub fn sort_info(&self) -> Option<&SortInfo> {
        match self {
            Self::Select(s) => s.sort_info.as_ref(),
            Self::Union(u) => u.sort_info.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectStatement {
    /// FROM clause in declared order. Empty for a SELECT without FROM.
    pub table_refs: Vec<TableRef>,
    /// Select list. References the aggregation output when aggregating.
    pub result_exprs: Vec<Expression>,
    pub agg_info: Option<AggregateInfo>,
    /// HAVING conjuncts, referencing the final aggregation output.
    pub having: Vec<Expression>,
    pub sort_info: Option<SortInfo>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct UnionStatement {
    /// Operands in declared order. DISTINCT has been propagated to the left,
    /// so every DISTINCT operand precedes every ALL operand.
    pub operands: Vec<UnionOperand>,
    /// Tuple produced by the union.
    pub tuple_id: TupleId,
    /// References to the union tuple's slots.
    pub result_exprs: Vec<Expression>,
    pub sort_info: Option<SortInfo>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct UnionOperand {
    pub statement: QueryStatement,
    /// Registry for the operand's own query block.
    pub registry: PredicateRegistry,
    /// Qualifier of the UNION preceding this operand. Meaningless for the
    /// first operand.
    pub qualifier: Qualifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Qualifier {
    All,
    Distinct,
}

#[derive(Debug, Clone)]
pub enum TableRef {
    Base(BaseTableRef),
    InlineView(InlineViewRef),
}

impl TableRef {
    /// The tuple id identifying this reference.
    pub fn tuple_id(&self) -> TupleId {
        match self {
            Self::Base(b) => b.tuple_id,
            Self::InlineView(v) => v.tuple_id,
        }
    }

    /// Tuples materialized when planning this reference.
    pub fn materialized_tuple_ids(&self) -> Vec<TupleId> {
        match self {
            Self::Base(b) => vec![b.tuple_id],
            Self::InlineView(v) => v.materialized_tuple_ids.clone(),
        }
    }

    pub fn join(&self) -> Option<&JoinClause> {
        match self {
            Self::Base(b) => b.join.as_ref(),
            Self::InlineView(v) => v.join.as_ref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BaseTableRef {
    pub tuple_id: TupleId,
    pub table: Arc<TableDescriptor>,
    pub join: Option<JoinClause>,
}

/// Reference to an inline view or WITH-clause view.
///
/// Every occurrence of a view in a query is analyzed separately, so every
/// reference has its own body, tuples and registry.
#[derive(Debug, Clone)]
pub struct InlineViewRef {
    pub alias: String,
    pub tuple_id: TupleId,
    pub body: Box<QueryStatement>,
    /// Registry of the view body.
    pub registry: PredicateRegistry,
    /// Tuples produced by the view body that outer expressions reference.
    pub materialized_tuple_ids: Vec<TupleId>,
    pub join: Option<JoinClause>,
}

/// Join information attached to every table reference but the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinClause {
    pub op: JoinOp,
    pub hint: Option<JoinHint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinOp {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
}

impl JoinOp {
    pub const fn is_outer_join(&self) -> bool {
        !matches!(self, Self::Inner)
    }
}

impl fmt::Display for JoinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "INNER JOIN"),
            Self::LeftOuter => write!(f, "LEFT OUTER JOIN"),
            Self::RightOuter => write!(f, "RIGHT OUTER JOIN"),
            Self::FullOuter => write!(f, "FULL OUTER JOIN"),
        }
    }
}

/// Explicit placement hint on a join, `[BROADCAST]` or `[SHUFFLE]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinHint {
    Broadcast,
    Shuffle,
}

impl fmt::Display for JoinHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast => write!(f, "BROADCAST"),
            Self::Shuffle => write!(f, "SHUFFLE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByExpr {
    pub expr: Expression,
    pub desc: bool,
    pub nulls_first: bool,
}

impl fmt::Display for OrderByExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.desc { "DESC" } else { "ASC" };
        let nulls = if self.nulls_first { "NULLS FIRST" } else { "NULLS LAST" };
        write!(f, "{} {} {}", self.expr, dir, nulls)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortInfo {
    pub exprs: Vec<OrderByExpr>,
}

/// Target of an INSERT statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertTarget {
    pub table: String,
    pub overwrite: bool,
}

impl fmt::Display for InsertTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.overwrite {
            write!(f, "OVERWRITE {}", self.table)
        } else {
            write!(f, "INTO {}", self.table)
        }
    }
}
