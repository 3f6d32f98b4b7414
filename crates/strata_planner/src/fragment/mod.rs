//! Splitting a single-node plan into fragments that can run distributed.
//!
//! Fragments are connected through exchanges. A fragment streams its output
//! through its sink into an exchange node that lives in another fragment.
//! The fragment producing the final result is always fragment 0.

pub mod exec_params;

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_error::{Result, internal, not_implemented};
use tracing::debug;

use crate::analysis::statement::{InsertTarget, JoinHint, JoinOp};
use crate::config::PlannerConfig;
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};
use crate::expr::{DisplayExprs, Expression};
use crate::ids::{FragmentId, PlanNodeId, PlanNodeIdGen};
use crate::plan::aggregate::AggregateNode;
use crate::plan::exchange::ExchangeNode;
use crate::plan::join::{HashJoinNode, JoinDistribution};
use crate::plan::scan::ScanNode;
use crate::plan::sort::SortNode;
use crate::plan::{Node, PlanNode};
use crate::storage::ScanRangeProvider;

/// How the rows processed by a fragment's instances are partitioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataPartition {
    /// A single instance processes all rows.
    Unpartitioned,
    /// Rows are split arbitrarily, e.g. by scan range.
    Random,
    /// Rows are split by hashing the expressions.
    HashPartitioned(Vec<Expression>),
}

impl fmt::Display for DataPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unpartitioned => write!(f, "UNPARTITIONED"),
            Self::Random => write!(f, "RANDOM"),
            Self::HashPartitioned(exprs) => write!(f, "HASH_PARTITIONED: {}", DisplayExprs(exprs)),
        }
    }
}

/// How a stream sink distributes rows to the instances of the receiving
/// fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputPartition {
    /// Everything is sent to a single instance.
    Unpartitioned,
    /// Every row is sent to every instance.
    Broadcast,
    HashPartitioned(Vec<Expression>),
}

impl fmt::Display for OutputPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unpartitioned => write!(f, "UNPARTITIONED"),
            Self::Broadcast => write!(f, "BROADCAST"),
            Self::HashPartitioned(exprs) => write!(f, "HASH_PARTITIONED: {}", DisplayExprs(exprs)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataSink {
    /// Stream rows to an exchange node in another fragment.
    Stream {
        exchange_id: PlanNodeId,
        dest_fragment: FragmentId,
        output_partition: OutputPartition,
    },
    /// Write rows into a table.
    TableWrite(InsertTarget),
}

impl Explainable for DataSink {
    fn explain_entry(&self, _conf: ExplainConfig) -> ExplainEntry {
        match self {
            Self::Stream {
                exchange_id,
                dest_fragment,
                output_partition,
            } => ExplainEntry::new("STREAM DATA SINK")
                .with_value("exchange", exchange_id)
                .with_value("fragment", dest_fragment)
                .with_value("output_partition", output_partition),
            Self::TableWrite(target) => ExplainEntry::new("TABLE WRITE")
                .with_value("table", &target.table)
                .with_value("overwrite", target.overwrite),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanFragment {
    pub id: FragmentId,
    /// Root of the fragment's plan tree. None for a SELECT without FROM
    /// clause.
    pub root: Option<PlanNode>,
    /// Set on the fragment producing the query result.
    pub output_exprs: Vec<Expression>,
    /// Destination of the fragment's output. None for the coordinator
    /// fragment of a query returning rows to the client.
    pub sink: Option<DataSink>,
    pub partition: DataPartition,
}

impl PlanFragment {
    fn new(id: FragmentId, root: Option<PlanNode>, partition: DataPartition) -> Self {
        PlanFragment {
            id,
            root,
            output_exprs: Vec::new(),
            sink: None,
            partition,
        }
    }

    pub fn is_unpartitioned(&self) -> bool {
        matches!(self.partition, DataPartition::Unpartitioned)
    }

    /// Scan nodes of this fragment, left to right.
    pub fn scan_nodes(&self) -> Vec<&Node<ScanNode>> {
        let mut scans = Vec::new();
        if let Some(root) = &self.root {
            let _ = root.for_each_node(&mut |node| {
                if let PlanNode::Scan(scan) = node {
                    scans.push(scan);
                }
                Ok(())
            });
        }
        scans
    }

    /// The scan reached by always descending into the first child, if any.
    ///
    /// This scan determines how the fragment is split into instances.
    pub fn leftmost_scan(&self) -> Option<&Node<ScanNode>> {
        let mut node = self.root.as_ref()?;
        loop {
            match node {
                PlanNode::Scan(scan) => return Some(scan),
                other => node = other.children().first()?,
            }
        }
    }

    /// Fragments feeding exchanges in this fragment, in plan order.
    pub fn source_fragments(&self) -> Vec<FragmentId> {
        let mut sources = Vec::new();
        if let Some(root) = &self.root {
            let _ = root.for_each_node(&mut |node| {
                if let PlanNode::Exchange(exchange) = node {
                    sources.push(exchange.node.source_fragment);
                }
                Ok(())
            });
        }
        sources
    }
}

/// Fragments of a query, root fragment first.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentedPlan {
    pub fragments: Vec<PlanFragment>,
    /// False when an INSERT is executed entirely by worker fragments.
    pub has_coordinator_fragment: bool,
}

/// Creates fragments from a finished single-node plan.
#[derive(Debug)]
pub struct Fragmenter<'a> {
    config: &'a PlannerConfig,
    storage: &'a dyn ScanRangeProvider,
    id_gen: &'a mut PlanNodeIdGen,
    fragments: Vec<PlanFragment>,
}

impl<'a> Fragmenter<'a> {
    pub fn new(
        config: &'a PlannerConfig,
        storage: &'a dyn ScanRangeProvider,
        id_gen: &'a mut PlanNodeIdGen,
    ) -> Self {
        Fragmenter {
            config,
            storage,
            id_gen,
            fragments: Vec::new(),
        }
    }

    /// Fragment a plan.
    ///
    /// `coordinator_does_insert` decides who writes the rows of an INSERT when
    /// planning for multiple nodes. When false the coordinator fragment is
    /// dropped and the worker fragment writes directly.
    pub fn fragment(
        mut self,
        root: Option<PlanNode>,
        result_exprs: &[Expression],
        insert: Option<&InsertTarget>,
        coordinator_does_insert: bool,
    ) -> Result<FragmentedPlan> {
        let root = match root {
            Some(root) if !self.config.is_single_node() => root,
            root => {
                // Single node, or SELECT without FROM.
                let mut fragment = PlanFragment::new(FragmentId(0), root, DataPartition::Unpartitioned);
                fragment.output_exprs = result_exprs.to_vec();
                fragment.sink = insert.map(|target| DataSink::TableWrite(target.clone()));
                return Ok(FragmentedPlan {
                    fragments: vec![fragment],
                    has_coordinator_fragment: true,
                });
            }
        };

        let mut root_idx = self.create_fragments(root)?;
        let mut has_coordinator_fragment = true;

        if !self.fragments[root_idx].is_unpartitioned() {
            if insert.is_some() && !coordinator_does_insert {
                has_coordinator_fragment = false;
            } else {
                // Gather everything at the coordinator. The worker root keeps
                // its limit.
                let limit = self.fragments[root_idx].root.as_ref().and_then(|r| r.limit());
                let dest = FragmentId(self.fragments.len());
                let mut exchange =
                    self.stream_to_exchange(root_idx, dest, OutputPartition::Unpartitioned)?;
                exchange.set_limit(limit);
                root_idx = self.push_fragment(exchange, DataPartition::Unpartitioned);
            }
        }

        let root_fragment = &mut self.fragments[root_idx];
        root_fragment.output_exprs = result_exprs.to_vec();
        if let Some(target) = insert {
            root_fragment.sink = Some(DataSink::TableWrite(target.clone()));
        }

        let fragments = self.renumber(root_idx)?;
        debug!(
            num_fragments = fragments.len(),
            has_coordinator_fragment, "created plan fragments"
        );

        Ok(FragmentedPlan {
            fragments,
            has_coordinator_fragment,
        })
    }

    /// Create fragments for the tree rooted at `node`, returning the index of
    /// the fragment whose root is the (possibly rewritten) node.
    fn create_fragments(&mut self, node: PlanNode) -> Result<usize> {
        match node {
            PlanNode::Scan(_) => Ok(self.push_fragment(node, DataPartition::Random)),
            PlanNode::HashJoin(join) => self.create_join_fragment(join),
            PlanNode::Aggregate(agg) => self.create_aggregate_fragment(agg),
            PlanNode::Sort(sort) => self.create_sort_fragment(sort),
            PlanNode::Merge(_) => not_implemented!("Multinode planning of UNION not implemented."),
            PlanNode::Exchange(exchange) => Err(internal!(
                "Unexpected exchange node {} before fragmentation",
                exchange.id
            )),
        }
    }

    /// Create fragments for the input of another node.
    ///
    /// A limit in a partitioned fragment only holds per instance. Such an
    /// input is gathered into a single instance applying the limit again
    /// before its consumer sees it.
    fn create_child_fragments(&mut self, node: PlanNode) -> Result<usize> {
        let idx = self.create_fragments(node)?;

        let fragment = &self.fragments[idx];
        let limit = match fragment.root.as_ref().and_then(PlanNode::limit) {
            Some(limit) if !fragment.is_unpartitioned() => limit,
            _ => return Ok(idx),
        };

        let dest = FragmentId(self.fragments.len());
        let mut exchange = self.stream_to_exchange(idx, dest, OutputPartition::Unpartitioned)?;
        exchange.set_limit(Some(limit));
        debug!(fragment = idx, limit, "gathering limited input");

        Ok(self.push_fragment(exchange, DataPartition::Unpartitioned))
    }

    fn create_join_fragment(&mut self, mut join: Node<HashJoinNode>) -> Result<usize> {
        let [left, right] = join.take_two_children_exact()?;

        let left_bytes = self.subtree_bytes(&left);
        let right_bytes = self.subtree_bytes(&right);
        let distribution = self.join_distribution(&join.node, left_bytes, right_bytes)?;
        join.node.distribution = Some(distribution);
        debug!(
            node_id = %join.id,
            %distribution,
            ?left_bytes,
            ?right_bytes,
            "chose join distribution"
        );

        let left_idx = self.create_child_fragments(left)?;
        let right_idx = self.create_child_fragments(right)?;

        match distribution {
            JoinDistribution::Broadcast => {
                let right_child = if self.can_fold(right_idx) {
                    // Every instance of the left fragment reads the right side
                    // in full.
                    if right_idx + 1 != self.fragments.len() {
                        return Err(internal!("Folded fragment {right_idx} is not the last fragment"));
                    }
                    self.fragments
                        .pop()
                        .and_then(|f| f.root)
                        .ok_or_else(|| internal!("Missing root for fragment {right_idx}"))?
                } else {
                    self.stream_to_exchange(right_idx, FragmentId(left_idx), OutputPartition::Broadcast)?
                };
                let left_root = self.take_root(left_idx)?;
                join.children = vec![left_root, right_child];
                self.set_root(left_idx, PlanNode::HashJoin(join));
                Ok(left_idx)
            }
            JoinDistribution::Partitioned => {
                let lhs_exprs = join.node.lhs_exprs();
                let rhs_exprs = join.node.rhs_exprs();
                let dest = FragmentId(self.fragments.len());

                let left_exchange = self.stream_to_exchange(
                    left_idx,
                    dest,
                    OutputPartition::HashPartitioned(lhs_exprs.clone()),
                )?;
                let right_exchange =
                    self.stream_to_exchange(right_idx, dest, OutputPartition::HashPartitioned(rhs_exprs))?;
                join.children = vec![left_exchange, right_exchange];

                Ok(self.push_fragment(
                    PlanNode::HashJoin(join),
                    DataPartition::HashPartitioned(lhs_exprs),
                ))
            }
        }
    }

    fn join_distribution(
        &self,
        join: &HashJoinNode,
        left_bytes: Option<u64>,
        right_bytes: Option<u64>,
    ) -> Result<JoinDistribution> {
        // Broadcasting the right side of these would produce the unmatched
        // right rows once per left instance.
        let must_partition = matches!(join.join_op, JoinOp::RightOuter | JoinOp::FullOuter);

        match join.hint {
            Some(JoinHint::Broadcast) if must_partition => {
                not_implemented!("BROADCAST hint not supported for {}", join.join_op)
            }
            Some(JoinHint::Broadcast) => Ok(JoinDistribution::Broadcast),
            Some(JoinHint::Shuffle) => Ok(JoinDistribution::Partitioned),
            None if must_partition || !self.config.broadcast_by_default => {
                Ok(JoinDistribution::Partitioned)
            }
            None => match (left_bytes, right_bytes) {
                (Some(left), Some(right)) if right <= left => Ok(JoinDistribution::Broadcast),
                _ => Ok(JoinDistribution::Partitioned),
            },
        }
    }

    fn create_aggregate_fragment(&mut self, mut agg: Node<AggregateNode>) -> Result<usize> {
        let child = agg.take_one_child_exact()?;
        let child_idx = self.create_child_fragments(child)?;

        if self.fragments[child_idx].is_unpartitioned() {
            let child = self.take_root(child_idx)?;
            agg.children = vec![child];
            self.set_root(child_idx, PlanNode::Aggregate(agg));
            return Ok(child_idx);
        }

        let merge_info = agg
            .node
            .agg_info
            .merge_info
            .clone()
            .ok_or_else(|| internal!("Missing merge aggregation for node {}", agg.id))?;

        // Local pre-aggregation stays with the input, HAVING and limit move to
        // the merge.
        let conjuncts = std::mem::take(&mut agg.conjuncts);
        let limit = agg.limit.take();
        let needs_finalize = agg.node.needs_finalize;
        let tuple_ids = agg.tuple_ids.clone();
        agg.node.needs_finalize = false;

        let child = self.take_root(child_idx)?;
        agg.children = vec![child];
        self.set_root(child_idx, PlanNode::Aggregate(agg));

        let (output, partition) = if merge_info.is_grouped() {
            (
                OutputPartition::HashPartitioned(merge_info.grouping_exprs.clone()),
                DataPartition::HashPartitioned(merge_info.grouping_exprs.clone()),
            )
        } else {
            (OutputPartition::Unpartitioned, DataPartition::Unpartitioned)
        };

        let dest = FragmentId(self.fragments.len());
        let exchange = self.stream_to_exchange(child_idx, dest, output)?;

        let mut merge = Node::new(
            self.id_gen.next_id(),
            AggregateNode {
                agg_info: *merge_info,
                needs_finalize,
                is_merge: true,
            },
            vec![exchange],
            tuple_ids,
        );
        merge.conjuncts = conjuncts;
        merge.limit = limit;

        Ok(self.push_fragment(PlanNode::Aggregate(merge), partition))
    }

    fn create_sort_fragment(&mut self, mut sort: Node<SortNode>) -> Result<usize> {
        let child = sort.take_one_child_exact()?;
        let child_idx = self.create_child_fragments(child)?;

        if self.fragments[child_idx].is_unpartitioned() {
            let child = self.take_root(child_idx)?;
            sort.children = vec![child];
            self.set_root(child_idx, PlanNode::Sort(sort));
            return Ok(child_idx);
        }

        let dest = FragmentId(self.fragments.len());
        let exchange = self.stream_to_exchange(child_idx, dest, OutputPartition::Unpartitioned)?;
        sort.children = vec![exchange];

        Ok(self.push_fragment(PlanNode::Sort(sort), DataPartition::Unpartitioned))
    }

    /// If the fragment only contains scans and joins and can be merged into
    /// the fragment consuming it.
    fn can_fold(&self, idx: usize) -> bool {
        fn is_scan_join(node: &PlanNode) -> bool {
            match node {
                PlanNode::Scan(_) => true,
                PlanNode::HashJoin(join) => join.children.iter().all(is_scan_join),
                _ => false,
            }
        }

        let fragment = &self.fragments[idx];
        fragment.partition == DataPartition::Random
            && fragment.sink.is_none()
            && fragment.root.as_ref().is_some_and(is_scan_join)
    }

    /// Total bytes read by a tree of scans and joins, None if unknown.
    fn subtree_bytes(&self, node: &PlanNode) -> Option<u64> {
        match node {
            PlanNode::Scan(scan) => self.storage.total_bytes(&scan.node.table),
            PlanNode::HashJoin(join) => {
                let mut total = 0;
                for child in &join.children {
                    total += self.subtree_bytes(child)?;
                }
                Some(total)
            }
            _ => None,
        }
    }

    /// Replace the root of a fragment with a stream sink to a new exchange
    /// node, returning the exchange.
    fn stream_to_exchange(
        &mut self,
        idx: usize,
        dest: FragmentId,
        output_partition: OutputPartition,
    ) -> Result<PlanNode> {
        let child = self.take_root(idx)?;

        let mut exchange = Node::new(
            self.id_gen.next_id(),
            ExchangeNode {
                source_fragment: FragmentId(idx),
                num_senders: 0,
            },
            Vec::new(),
            child.tuple_ids().to_vec(),
        );
        exchange.row_tuple_ids = child.row_tuple_ids().to_vec();
        exchange.nullable_tuple_ids = child.nullable_tuple_ids().to_vec();
        exchange.compact_data = child.compact_data();

        let fragment = &mut self.fragments[idx];
        fragment.sink = Some(DataSink::Stream {
            exchange_id: exchange.id,
            dest_fragment: dest,
            output_partition,
        });
        fragment.root = Some(child);

        Ok(PlanNode::Exchange(exchange))
    }

    fn push_fragment(&mut self, root: PlanNode, partition: DataPartition) -> usize {
        let idx = self.fragments.len();
        self.fragments
            .push(PlanFragment::new(FragmentId(idx), Some(root), partition));
        idx
    }

    fn take_root(&mut self, idx: usize) -> Result<PlanNode> {
        self.fragments
            .get_mut(idx)
            .and_then(|f| f.root.take())
            .ok_or_else(|| internal!("Missing root for fragment {idx}"))
    }

    fn set_root(&mut self, idx: usize, root: PlanNode) {
        self.fragments[idx].root = Some(root);
    }

    /// Order fragments root first, then depth first through exchanges in plan
    /// order, and renumber them accordingly.
    fn renumber(self, root_idx: usize) -> Result<Vec<PlanFragment>> {
        let mut order = Vec::with_capacity(self.fragments.len());
        collect_order(&self.fragments, root_idx, &mut order)?;
        if order.len() != self.fragments.len() {
            return Err(internal!(
                "Unreachable plan fragments, reached {} of {}",
                order.len(),
                self.fragments.len()
            ));
        }

        let mut mapping = vec![FragmentId(0); order.len()];
        for (new_idx, old_idx) in order.iter().enumerate() {
            mapping[*old_idx] = FragmentId(new_idx);
        }

        let mut slots: Vec<_> = self.fragments.into_iter().map(Some).collect();
        let mut fragments = Vec::with_capacity(order.len());
        for old_idx in order {
            let mut fragment = slots[old_idx]
                .take()
                .ok_or_else(|| internal!("Fragment {old_idx} visited twice"))?;
            fragment.id = mapping[old_idx];
            if let Some(DataSink::Stream { dest_fragment, .. }) = &mut fragment.sink {
                *dest_fragment = mapping[dest_fragment.0];
            }
            if let Some(root) = &mut fragment.root {
                root.for_each_node_mut(&mut |node| {
                    if let PlanNode::Exchange(exchange) = node {
                        exchange.node.source_fragment = mapping[exchange.node.source_fragment.0];
                    }
                });
            }
            fragments.push(fragment);
        }

        Ok(fragments)
    }
}

fn collect_order(fragments: &[PlanFragment], idx: usize, order: &mut Vec<usize>) -> Result<()> {
    if order.contains(&idx) {
        return Err(internal!("Fragment {idx} reached twice"));
    }
    let fragment = fragments
        .get(idx)
        .ok_or_else(|| internal!("Missing fragment {idx}"))?;
    order.push(idx);
    for source in fragment.source_fragments() {
        collect_order(fragments, source.0, order)?;
    }
    Ok(())
}
