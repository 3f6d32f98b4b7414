//! Serializable request handed to the execution layer.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strata_error::{Result, ResultExt};
use uuid::Uuid;

use crate::analysis::descriptor::DescriptorTable;
use crate::analysis::statement::InsertTarget;
use crate::expr::Expression;
use crate::fragment::exec_params::PlanExecParams;
use crate::fragment::{DataPartition, DataSink, FragmentedPlan, PlanFragment};
use crate::ids::{FragmentId, PlanNodeId, TupleId};
use crate::plan::aggregate::AggregateNode;
use crate::plan::exchange::ExchangeNode;
use crate::plan::join::HashJoinNode;
use crate::plan::merge::MergeNode;
use crate::plan::scan::ScanNode;
use crate::plan::sort::SortNode;
use crate::plan::{Node, PlanNode};

/// Values that are constant for the whole query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryGlobals {
    /// Query start time, "YYYY-MM-DD HH:MM:SS.fffffffff".
    pub now_string: String,
}

impl QueryGlobals {
    pub fn new(now: NaiveDateTime) -> Self {
        QueryGlobals {
            now_string: now.format("%Y-%m-%d %H:%M:%S%.9f").to_string(),
        }
    }
}

/// Node specific part of a flattened plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlatNodeKind {
    Scan(ScanNode),
    HashJoin(HashJoinNode),
    Aggregate(AggregateNode),
    Sort(SortNode),
    Merge(MergeNode),
    Exchange(ExchangeNode),
}

/// A plan node without its children.
///
/// A tree is sent as its nodes in pre-order, each carrying its number of
/// children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatPlanNode {
    pub id: PlanNodeId,
    pub num_children: usize,
    pub kind: FlatNodeKind,
    pub tuple_ids: Vec<TupleId>,
    pub row_tuple_ids: Vec<TupleId>,
    pub nullable_tuple_ids: Vec<TupleId>,
    pub conjuncts: Vec<Expression>,
    pub limit: Option<u64>,
    pub compact_data: bool,
}

impl FlatPlanNode {
    fn from_node<N: Clone>(node: &Node<N>, kind: impl FnOnce(N) -> FlatNodeKind) -> Self {
        FlatPlanNode {
            id: node.id,
            num_children: node.children.len(),
            kind: kind(node.node.clone()),
            tuple_ids: node.tuple_ids.clone(),
            row_tuple_ids: node.row_tuple_ids.clone(),
            nullable_tuple_ids: node.nullable_tuple_ids.clone(),
            conjuncts: node.conjuncts.clone(),
            limit: node.limit,
            compact_data: node.compact_data,
        }
    }
}

/// Flatten a plan tree, parents before children.
pub fn flatten_plan(root: &PlanNode) -> Vec<FlatPlanNode> {
    let mut nodes = Vec::with_capacity(root.num_nodes());
    flatten_into(root, &mut nodes);
    nodes
}

fn flatten_into(plan: &PlanNode, out: &mut Vec<FlatPlanNode>) {
    let flat = match plan {
        PlanNode::Scan(n) => FlatPlanNode::from_node(n, FlatNodeKind::Scan),
        PlanNode::HashJoin(n) => FlatPlanNode::from_node(n, FlatNodeKind::HashJoin),
        PlanNode::Aggregate(n) => FlatPlanNode::from_node(n, FlatNodeKind::Aggregate),
        PlanNode::Sort(n) => FlatPlanNode::from_node(n, FlatNodeKind::Sort),
        PlanNode::Merge(n) => FlatPlanNode::from_node(n, FlatNodeKind::Merge),
        PlanNode::Exchange(n) => FlatPlanNode::from_node(n, FlatNodeKind::Exchange),
    };
    out.push(flat);
    for child in plan.children() {
        flatten_into(child, out);
    }
}

/// Everything needed to execute a single fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecRequest {
    pub fragment_id: FragmentId,
    /// Empty for a SELECT without FROM clause.
    pub nodes: Vec<FlatPlanNode>,
    pub output_exprs: Vec<Expression>,
    pub sink: Option<DataSink>,
    pub partition: DataPartition,
    pub desc_tbl: DescriptorTable,
    pub query_globals: QueryGlobals,
}

impl PlanExecRequest {
    fn new(fragment: &PlanFragment, desc_tbl: DescriptorTable, query_globals: QueryGlobals) -> Self {
        PlanExecRequest {
            fragment_id: fragment.id,
            nodes: fragment.root.as_ref().map(flatten_plan).unwrap_or_default(),
            output_exprs: fragment.output_exprs.clone(),
            sink: fragment.sink.clone(),
            partition: fragment.partition.clone(),
            desc_tbl,
            query_globals,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExecRequest {
    pub query_id: Uuid,
    /// Indexed like the fragments, root fragment first.
    pub fragments: Vec<PlanExecRequest>,
    /// Instances of each fragment, indexed like `fragments`.
    pub exec_params: Vec<Vec<PlanExecParams>>,
    pub has_coordinator_fragment: bool,
    pub insert: Option<InsertTarget>,
}

impl QueryExecRequest {
    pub fn new(
        plan: &FragmentedPlan,
        exec_params: Vec<Vec<PlanExecParams>>,
        desc_tbl: DescriptorTable,
        query_globals: QueryGlobals,
        insert: Option<InsertTarget>,
    ) -> Self {
        let fragments = plan
            .fragments
            .iter()
            .map(|fragment| PlanExecRequest::new(fragment, desc_tbl.clone(), query_globals.clone()))
            .collect();

        QueryExecRequest {
            query_id: Uuid::new_v4(),
            fragments,
            exec_params,
            has_coordinator_fragment: plan.has_coordinator_fragment,
            insert,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize query request")
    }
}
