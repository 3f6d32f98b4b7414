//! Plan tree produced by the planner.

pub mod aggregate;
pub mod exchange;
pub mod join;
pub mod merge;
pub mod scan;
pub mod sort;
pub mod value_range;

use aggregate::AggregateNode;
use exchange::ExchangeNode;
use join::HashJoinNode;
use merge::MergeNode;
use scan::ScanNode;
use sort::SortNode;
use strata_error::{DbError, Result, internal};
use tracing::trace;

use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};
use crate::expr::{DisplayExprs, Expression};
use crate::ids::{PlanNodeId, TupleId};

/// Common methods for the node specific part of a plan node.
pub trait PlanNodeInfo: Explainable {
    /// Name of the node.
    fn name(&self) -> &'static str;

    /// Visit every expression of the node specific part (not including the
    /// node's conjuncts).
    fn for_each_expr<'a, F>(&'a self, func: &mut F)
    where
        F: FnMut(&'a Expression);
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    Scan(Node<ScanNode>),
    HashJoin(Node<HashJoinNode>),
    Aggregate(Node<AggregateNode>),
    Sort(Node<SortNode>),
    Merge(Node<MergeNode>),
    Exchange(Node<ExchangeNode>),
}

/// Wrapper around nodes in the plan tree holding the state shared by every
/// kind of node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node<N> {
    /// Node specific logic.
    pub node: N,
    pub id: PlanNodeId,
    /// Inputs to this node.
    pub children: Vec<PlanNode>,
    /// Tuples making up a row produced by this node.
    pub tuple_ids: Vec<TupleId>,
    /// Tuples materialized by the scan/join subtree this node belongs to.
    pub row_tuple_ids: Vec<TupleId>,
    /// Tuples that may be NULL-extended in this node's output.
    pub nullable_tuple_ids: Vec<TupleId>,
    /// Conjuncts evaluated by this node against its output rows.
    pub conjuncts: Vec<Expression>,
    pub limit: Option<u64>,
    /// Copy data into a compact representation (build side of joins).
    pub compact_data: bool,
}

impl<N> Node<N> {
    pub fn new(id: PlanNodeId, node: N, children: Vec<PlanNode>, tuple_ids: Vec<TupleId>) -> Self {
        trace!(%id, ?tuple_ids, num_children = children.len(), "created plan node");
        Node {
            node,
            id,
            children,
            tuple_ids,
            row_tuple_ids: Vec::new(),
            nullable_tuple_ids: Vec::new(),
            conjuncts: Vec::new(),
            limit: None,
            compact_data: false,
        }
    }

    pub fn into_inner(self) -> N {
        self.node
    }

    pub fn take_one_child_exact(&mut self) -> Result<PlanNode> {
        if self.children.len() != 1 {
            return Err(DbError::new(format!(
                "Expected 1 child to plan node, have {}",
                self.children.len()
            )));
        }
        self.children
            .pop()
            .ok_or_else(|| internal!("Missing child"))
    }

    pub fn take_two_children_exact(&mut self) -> Result<[PlanNode; 2]> {
        if self.children.len() != 2 {
            return Err(DbError::new(format!(
                "Expected 2 children to plan node, have {}",
                self.children.len()
            )));
        }

        let mut children = std::mem::take(&mut self.children).into_iter();
        match (children.next(), children.next()) {
            (Some(first), Some(second)) => Ok([first, second]),
            _ => Err(internal!("Missing children")),
        }
    }

    pub fn get_one_child_exact(&self) -> Result<&PlanNode> {
        if self.children.len() != 1 {
            return Err(DbError::new(format!(
                "Expected 1 child to plan node, have {}",
                self.children.len()
            )));
        }
        Ok(&self.children[0])
    }
}

macro_rules! dispatch {
    ($plan:expr, $n:ident => $body:expr) => {
        match $plan {
            PlanNode::Scan($n) => $body,
            PlanNode::HashJoin($n) => $body,
            PlanNode::Aggregate($n) => $body,
            PlanNode::Sort($n) => $body,
            PlanNode::Merge($n) => $body,
            PlanNode::Exchange($n) => $body,
        }
    };
}

impl PlanNode {
    pub fn id(&self) -> PlanNodeId {
        dispatch!(self, n => n.id)
    }

    pub fn name(&self) -> &'static str {
        dispatch!(self, n => n.node.name())
    }

    pub fn children(&self) -> &[PlanNode] {
        dispatch!(self, n => &n.children)
    }

    pub fn children_mut(&mut self) -> &mut Vec<PlanNode> {
        dispatch!(self, n => &mut n.children)
    }

    pub fn tuple_ids(&self) -> &[TupleId] {
        dispatch!(self, n => &n.tuple_ids)
    }

    pub fn nullable_tuple_ids(&self) -> &[TupleId] {
        dispatch!(self, n => &n.nullable_tuple_ids)
    }

    pub fn row_tuple_ids(&self) -> &[TupleId] {
        dispatch!(self, n => &n.row_tuple_ids)
    }

    pub fn set_row_tuple_ids(&mut self, tuple_ids: Vec<TupleId>) {
        dispatch!(self, n => n.row_tuple_ids = tuple_ids)
    }

    pub fn conjuncts(&self) -> &[Expression] {
        dispatch!(self, n => &n.conjuncts)
    }

    pub fn conjuncts_mut(&mut self) -> &mut Vec<Expression> {
        dispatch!(self, n => &mut n.conjuncts)
    }

    pub fn limit(&self) -> Option<u64> {
        dispatch!(self, n => n.limit)
    }

    /// Set a limit on this node.
    ///
    /// Keeps the smaller limit if the node already has one, `None` leaves
    /// the limit unchanged.
    pub fn set_limit(&mut self, limit: Option<u64>) {
        let Some(limit) = limit else {
            return;
        };
        dispatch!(self, n => {
            n.limit = Some(n.limit.map_or(limit, |existing| existing.min(limit)));
        })
    }

    pub fn take_limit(&mut self) -> Option<u64> {
        dispatch!(self, n => n.limit.take())
    }

    pub fn compact_data(&self) -> bool {
        dispatch!(self, n => n.compact_data)
    }

    pub fn set_compact_data(&mut self, compact: bool) {
        dispatch!(self, n => n.compact_data = compact)
    }

    /// Visit every expression of this node, including its conjuncts.
    pub fn for_each_expr<'a, F>(&'a self, func: &mut F)
    where
        F: FnMut(&'a Expression),
    {
        dispatch!(self, n => {
            n.node.for_each_expr(func);
            n.conjuncts.iter().for_each(func);
        })
    }

    /// Visit this node and every node beneath it, parents before children,
    /// children left to right.
    pub fn for_each_node<'a, F>(&'a self, func: &mut F) -> Result<()>
    where
        F: FnMut(&'a PlanNode) -> Result<()>,
    {
        func(self)?;
        for child in self.children() {
            child.for_each_node(func)?;
        }
        Ok(())
    }

    pub fn for_each_node_mut<F>(&mut self, func: &mut F)
    where
        F: FnMut(&mut PlanNode),
    {
        func(self);
        for child in self.children_mut() {
            child.for_each_node_mut(func);
        }
    }

    /// Number of nodes in the tree rooted at this node.
    pub fn num_nodes(&self) -> usize {
        1 + self.children().iter().map(|c| c.num_nodes()).sum::<usize>()
    }

    /// Verify that every node's conjuncts are bound by the node's own output
    /// tuples.
    pub fn verify_conjuncts_bound(&self) -> Result<()> {
        self.for_each_node(&mut |node| {
            for conjunct in node.conjuncts() {
                if !conjunct.is_bound_by(node.tuple_ids()) {
                    return Err(internal!(
                        "Conjunct '{conjunct}' of node {} not bound by its tuples",
                        node.id()
                    )
                    .with_field("tuple_ids", format!("{:?}", node.tuple_ids())));
                }
            }
            Ok(())
        })
    }
}

impl Explainable for PlanNode {
    fn explain_entry(&self, conf: ExplainConfig) -> ExplainEntry {
        dispatch!(self, n => {
            let mut ent = n
                .node
                .explain_entry(conf)
                .with_value("id", n.id)
                .with_value_opt("limit", n.limit);
            if !n.conjuncts.is_empty() {
                ent = ent.with_value("predicates", DisplayExprs(&n.conjuncts));
            }
            if conf.verbose {
                ent = ent.with_values("tuple_ids", &n.tuple_ids);
                if !n.nullable_tuple_ids.is_empty() {
                    ent = ent.with_values("nullable_tuple_ids", &n.nullable_tuple_ids);
                }
                if n.compact_data {
                    ent = ent.with_value("compact_data", true);
                }
            }
            ent
        })
    }
}
