//! Turns an analyzed statement into fragments ready for execution.

pub mod materialize;
pub mod plan_aggregate;
pub mod plan_join;
pub mod plan_scan;
pub mod plan_select;
pub mod plan_setop;
pub mod plan_view;

use std::sync::Arc;

use chrono::NaiveDateTime;
use plan_select::SelectPlanner;
use plan_setop::SetOpPlanner;
use strata_error::{Result, internal, not_implemented};
use tracing::{debug, trace};

use crate::analysis::AnalysisResult;
use crate::analysis::descriptor::DescriptorTable;
use crate::analysis::registry::PredicateRegistry;
use crate::analysis::statement::{QueryStatement, SortInfo};
use crate::config::PlannerConfig;
use crate::explain::explain_query;
use crate::fragment::exec_params::compute_exec_params;
use crate::fragment::{Fragmenter, PlanFragment};
use crate::ids::{PlanNodeId, PlanNodeIdGen};
use crate::plan::sort::SortNode;
use crate::plan::{Node, PlanNode};
use crate::request::{QueryExecRequest, QueryGlobals};
use crate::storage::ScanRangeProvider;

/// State shared by every planning call for a single query.
#[derive(Debug)]
pub struct PlanContext<'a> {
    pub config: &'a PlannerConfig,
    pub desc_tbl: DescriptorTable,
    pub id_gen: PlanNodeIdGen,
    depth: usize,
}

impl<'a> PlanContext<'a> {
    pub fn new(config: &'a PlannerConfig, desc_tbl: DescriptorTable) -> Self {
        PlanContext {
            config,
            desc_tbl,
            id_gen: PlanNodeIdGen::default(),
            depth: 0,
        }
    }

    pub fn next_id(&mut self) -> PlanNodeId {
        self.id_gen.next_id()
    }

    /// Enter a nested query block (inline view or union).
    pub fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.config.max_plan_depth {
            return Err(internal!(
                "Exceeded maximum plan depth of {}",
                self.config.max_plan_depth
            ));
        }
        Ok(())
    }

    pub fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

/// Plan either kind of query statement.
///
/// Returns None for a SELECT without FROM clause.
pub(crate) fn plan_query_statement(
    ctx: &mut PlanContext,
    statement: &QueryStatement,
    registry: &mut PredicateRegistry,
) -> Result<Option<PlanNode>> {
    match statement {
        QueryStatement::Select(select) => SelectPlanner.plan(ctx, select, registry),
        QueryStatement::Union(union) => SetOpPlanner.plan(ctx, union, registry).map(Some),
    }
}

/// Add a top-n sort on top of `input`.
pub(crate) fn plan_sort(ctx: &mut PlanContext, input: PlanNode, sort_info: &SortInfo) -> PlanNode {
    let id = ctx.next_id();
    let tuple_ids = input.tuple_ids().to_vec();
    let nullable = input.nullable_tuple_ids().to_vec();
    let mut node = Node::new(
        id,
        SortNode {
            sort_info: sort_info.clone(),
            use_top_n: true,
        },
        vec![input],
        tuple_ids,
    );
    node.nullable_tuple_ids = nullable;
    trace!(%id, "planned sort");
    PlanNode::Sort(node)
}

/// Error if a registry still holds conjuncts no node evaluates.
pub(crate) fn check_fully_assigned(registry: &PredicateRegistry, what: &str) -> Result<()> {
    let unassigned = registry.unassigned();
    if unassigned.is_empty() {
        return Ok(());
    }
    let exprs: Vec<String> = unassigned.iter().map(|c| c.expr.to_string()).collect();
    Err(internal!("Unassigned conjuncts in {what}").with_field("conjuncts", exprs.join(", ")))
}

/// Output of planning a single query.
#[derive(Debug)]
pub struct PlannedQuery {
    pub request: QueryExecRequest,
    pub explain: String,
    /// Final fragments, root fragment first.
    pub fragments: Vec<PlanFragment>,
}

/// Plans analyzed statements against a storage layer.
#[derive(Debug, Clone)]
pub struct Planner {
    config: PlannerConfig,
    storage: Arc<dyn ScanRangeProvider>,
    /// Fixed "now" for query globals, the current local time if unset.
    now: Option<NaiveDateTime>,
}

impl Planner {
    pub fn new(config: PlannerConfig, storage: Arc<dyn ScanRangeProvider>) -> Self {
        Planner {
            config,
            storage,
            now: None,
        }
    }

    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PlannerConfig {
        &mut self.config
    }

    pub fn plan(&self, analysis: AnalysisResult) -> Result<PlannedQuery> {
        let AnalysisResult {
            statement,
            mut registry,
            desc_tbl,
            insert,
        } = analysis;

        if matches!(statement, QueryStatement::Union(_)) && !self.config.is_single_node() {
            not_implemented!("Multinode planning of UNION not implemented.");
        }

        let now = self
            .now
            .unwrap_or_else(|| chrono::Local::now().naive_local());

        let mut ctx = PlanContext::new(&self.config, desc_tbl);
        let root = plan_query_statement(&mut ctx, &statement, &mut registry)?;

        check_fully_assigned(&registry, "query")?;
        if let Some(root) = &root {
            root.verify_conjuncts_bound()?;
        }

        // The coordinator writes when it does more than just gathering rows.
        let coordinator_does_insert = self.config.is_single_node()
            || match &statement {
                QueryStatement::Select(select) => {
                    select.agg_info.is_some()
                        || !select.having.is_empty()
                        || select.sort_info.is_some()
                        || select.limit.is_some()
                }
                QueryStatement::Union(union) => union.sort_info.is_some() || union.limit.is_some(),
            };

        let PlanContext {
            mut desc_tbl,
            mut id_gen,
            ..
        } = ctx;

        let mut fragmented = Fragmenter::new(&self.config, self.storage.as_ref(), &mut id_gen).fragment(
            root,
            statement.result_exprs(),
            insert.as_ref(),
            coordinator_does_insert,
        )?;
        for fragment in &fragmented.fragments {
            if let Some(root) = &fragment.root {
                root.verify_conjuncts_bound()?;
            }
        }

        materialize::materialize_slots(&fragmented, statement.result_exprs(), &mut desc_tbl)?;
        desc_tbl.compute_mem_layout()?;

        let exec_params = compute_exec_params(&mut fragmented, self.storage.as_ref(), &self.config)?;
        let explain = explain_query(&fragmented, &exec_params, &desc_tbl, self.config.explain_level);

        debug!(
            num_fragments = fragmented.fragments.len(),
            num_nodes = id_gen.num_generated(),
            "planned query"
        );

        let request = QueryExecRequest::new(
            &fragmented,
            exec_params,
            desc_tbl,
            QueryGlobals::new(now),
            insert,
        );

        Ok(PlannedQuery {
            request,
            explain,
            fragments: fragmented.fragments,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::analysis::aggregate_info::AggregateInfo;
    use crate::analysis::statement::{JoinHint, JoinOp, Qualifier};
    use crate::expr::aggregate_expr::{AggregateExpr, AggregateFunction};
    use crate::expr::comparison_expr::ComparisonOperator;
    use crate::expr::{self, lit};
    use crate::fragment::{DataPartition, DataSink};
    use crate::storage::{ExecHost, HostPort};
    use crate::testutil::{self, QueryBuilder, UnionBuilder};

    fn planner(num_nodes: usize, hosts: &[HostPort]) -> Planner {
        logutil::init_test();
        let config = PlannerConfig {
            num_nodes,
            ..Default::default()
        };
        Planner::new(config, Arc::new(testutil::test_storage(hosts)))
    }

    fn join_fragment(planned: &PlannedQuery) -> &PlanFragment {
        planned
            .fragments
            .iter()
            .find(|f| matches!(f.root, Some(PlanNode::HashJoin(_))))
            .expect("fragment rooted at a join")
    }

    #[test]
    fn scan_join_aggregate_multi_node() {
        let mut builder = QueryBuilder::new();
        let a = builder.add_table(&testutil::alltypes());
        let b = builder.add_table(&testutil::alltypes_small());
        builder.filter(expr::eq(a.col("id"), b.col("id")));
        builder.filter(expr::compare(ComparisonOperator::Gt, a.col("int_col"), lit(1)));
        let agg_info = AggregateInfo::create(
            vec![a.col("year")],
            vec![AggregateExpr::new(AggregateFunction::Count, vec![b.col("int_col")], false)],
            &mut builder.desc_tbl,
        )
        .unwrap();
        let out = agg_info.output_columns(&builder.desc_tbl).unwrap();
        let mut select = testutil::select(
            vec![a.table_ref(), b.joined(JoinOp::Inner, None)],
            out.iter().map(expr::column).collect(),
        );
        select.agg_info = Some(agg_info);

        let planned = planner(3, &testutil::hosts(2))
            .plan(builder.finish_select(select))
            .unwrap();

        // coordinator <- merge aggregate <- join with local aggregate
        assert_eq!(3, planned.fragments.len());
        assert!(planned.request.has_coordinator_fragment);
        let PlanNode::Aggregate(merge) = planned.fragments[1].root.as_ref().unwrap() else {
            panic!("expected merge aggregation");
        };
        assert!(merge.node.is_merge);
        assert!(merge.node.needs_finalize);
        assert!(matches!(planned.fragments[1].partition, DataPartition::HashPartitioned(_)));
        let PlanNode::Aggregate(local) = planned.fragments[2].root.as_ref().unwrap() else {
            panic!("expected local aggregation");
        };
        assert!(!local.node.needs_finalize);
        assert_eq!(DataPartition::Random, planned.fragments[2].partition);

        for fragment in &planned.fragments {
            if let Some(root) = &fragment.root {
                root.verify_conjuncts_bound().unwrap();
            }
        }
    }

    #[test]
    fn swapped_join_operands_both_plan() {
        for swap in [false, true] {
            let mut builder = QueryBuilder::new();
            let a = builder.add_table(&testutil::alltypes());
            let b = builder.add_table(&testutil::alltypes_small());
            builder.filter(expr::eq(a.col("id"), b.col("id")));
            builder.filter(expr::eq(a.col("string_col"), b.col("string_col")));
            let refs = if swap {
                vec![b.table_ref(), a.joined(JoinOp::Inner, None)]
            } else {
                vec![a.table_ref(), b.joined(JoinOp::Inner, None)]
            };
            let select = testutil::select(refs, vec![a.col("id")]);

            let planned = planner(1, &testutil::hosts(1))
                .plan(builder.finish_select(select))
                .unwrap();
            let PlanNode::HashJoin(join) = planned.fragments[0].root.as_ref().unwrap() else {
                panic!("expected join");
            };
            assert_eq!(2, join.node.eq_join_conjuncts.len());
            assert!(join.conjuncts.is_empty());
        }
    }

    #[test]
    fn hint_decides_join_partitioning() {
        for (hint, expected_random) in [(JoinHint::Broadcast, true), (JoinHint::Shuffle, false)] {
            let mut builder = QueryBuilder::new();
            let v1 = builder.add_view("v1", &testutil::alltypes(), |_, _| {});
            let v2 = builder.add_view("v2", &testutil::alltypes(), |_, _| {});
            builder.filter(expr::eq(v1.col("id"), v2.col("id")));
            let select = testutil::select(
                vec![v1.table_ref(), v2.joined(JoinOp::Inner, Some(hint))],
                vec![v1.col("id")],
            );

            let planned = planner(3, &testutil::hosts(2))
                .plan(builder.finish_select(select))
                .unwrap();

            let partition = &join_fragment(&planned).partition;
            if expected_random {
                assert_eq!(&DataPartition::Random, partition);
                assert_eq!(2, planned.fragments.len());
            } else {
                assert!(matches!(partition, DataPartition::HashPartitioned(_)));
                assert_eq!(4, planned.fragments.len());
            }
        }
    }

    #[test]
    fn empty_sources_get_placeholder_hosts() {
        for hint in [None, Some(JoinHint::Shuffle)] {
            let mut builder = QueryBuilder::new();
            let a = builder.add_table(&testutil::alltypes());
            let b = builder.add_table(&testutil::alltypes_small());
            builder.filter(expr::eq(a.col("id"), b.col("id")));
            let select = testutil::select(
                vec![a.table_ref(), b.joined(JoinOp::Inner, hint)],
                vec![a.col("id")],
            );

            let planned = planner(3, &[]).plan(builder.finish_select(select)).unwrap();

            let params = &planned.request.exec_params;
            assert_eq!(planned.fragments.len(), params.len());
            for (idx, instances) in params.iter().enumerate() {
                assert!(!instances.is_empty());
                let expected = if idx == 0 {
                    ExecHost::Coordinator
                } else {
                    ExecHost::Worker(HostPort::placeholder())
                };
                assert!(instances.iter().all(|i| i.host == expected));
            }
        }
    }

    #[test]
    fn distinct_aggregate_distributed_shape() {
        let mut builder = QueryBuilder::new();
        let t = builder.add_table(&testutil::alltypes());
        let agg_info = AggregateInfo::create(
            vec![t.col("year")],
            vec![AggregateExpr::new(AggregateFunction::Count, vec![t.col("int_col")], true)],
            &mut builder.desc_tbl,
        )
        .unwrap();
        let out = agg_info
            .final_phase()
            .output_columns(&builder.desc_tbl)
            .unwrap();
        let mut select = testutil::select(vec![t.table_ref()], out.iter().map(expr::column).collect());
        select.agg_info = Some(agg_info);

        let planned = planner(3, &testutil::hosts(2))
            .plan(builder.finish_select(select))
            .unwrap();

        let partitions: Vec<_> = planned
            .fragments
            .iter()
            .map(|f| match f.partition {
                DataPartition::Unpartitioned => "unpartitioned",
                DataPartition::Random => "random",
                DataPartition::HashPartitioned(_) => "hash",
            })
            .collect();
        assert_eq!(vec!["unpartitioned", "hash", "hash", "random"], partitions);

        let PlanNode::Aggregate(final_merge) = planned.fragments[1].root.as_ref().unwrap() else {
            panic!("expected aggregation");
        };
        assert!(final_merge.node.is_merge);
        assert!(final_merge.node.needs_finalize);
        assert_eq!(1, final_merge.node.agg_info.grouping_exprs.len());
    }

    #[test]
    fn two_distinct_argument_sets_rejected() {
        let mut builder = QueryBuilder::new();
        let t = builder.add_table(&testutil::alltypes());
        let err = AggregateInfo::create(
            Vec::new(),
            vec![
                AggregateExpr::new(AggregateFunction::Count, vec![t.col("int_col")], true),
                AggregateExpr::new(AggregateFunction::Sum, vec![t.col("bigint_col")], true),
            ],
            &mut builder.desc_tbl,
        )
        .unwrap_err();
        assert!(err.is_not_implemented());
    }

    #[test]
    fn insert_without_coordinator() {
        let mut builder = QueryBuilder::new();
        let t = builder.add_table(&testutil::alltypes());
        let select = testutil::select(vec![t.table_ref()], vec![t.col("id")]);

        let planned = planner(3, &testutil::hosts(2))
            .plan(builder.finish_insert(select, "target"))
            .unwrap();

        assert!(!planned.request.has_coordinator_fragment);
        assert_eq!(1, planned.fragments.len());
        assert!(matches!(planned.fragments[0].sink, Some(DataSink::TableWrite(_))));
        assert!(planned.explain.starts_with("NO COORDINATOR FRAGMENT\n"));
    }

    #[test]
    fn insert_with_limit_written_by_coordinator() {
        let mut builder = QueryBuilder::new();
        let t = builder.add_table(&testutil::alltypes());
        let mut select = testutil::select(vec![t.table_ref()], vec![t.col("id")]);
        select.limit = Some(10);

        let planned = planner(3, &testutil::hosts(2))
            .plan(builder.finish_insert(select, "target"))
            .unwrap();

        assert!(planned.request.has_coordinator_fragment);
        assert_eq!(2, planned.fragments.len());
        let coordinator = &planned.fragments[0];
        assert!(matches!(coordinator.sink, Some(DataSink::TableWrite(_))));
        assert_eq!(Some(10), coordinator.root.as_ref().unwrap().limit());
    }

    #[test]
    fn multi_node_union_not_implemented() {
        let mut builder = QueryBuilder::new();
        let mut union = UnionBuilder::new(&mut builder, 1);
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::All);
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::All);
        let union = union.finish();

        let err = planner(3, &testutil::hosts(2))
            .plan(builder.finish_union(union))
            .unwrap_err();
        assert!(err.is_not_implemented());
        assert_eq!("Multinode planning of UNION not implemented.", err.message());
    }

    #[test]
    fn single_node_union_all_conjuncts_assigned() {
        let mut builder = QueryBuilder::new();
        let mut union = UnionBuilder::new(&mut builder, 1);
        let inner = union.nested(&mut builder, |builder, nested| {
            nested.select_operand(builder, &testutil::alltypes(), Qualifier::All);
            nested.constant_operand(Qualifier::All);
        });
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::All);
        union.push(inner, Qualifier::All);
        let union = union.finish();

        let planned = planner(1, &testutil::hosts(1))
            .plan(builder.finish_union(union))
            .unwrap();
        let PlanNode::Merge(merge) = planned.fragments[0].root.as_ref().unwrap() else {
            panic!("expected merge");
        };
        assert_eq!(2, merge.children.len());
        assert_eq!(1, merge.node.const_expr_lists.len());
    }

    #[test]
    fn query_globals_use_fixed_now() {
        let now = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let builder = QueryBuilder::new();
        let select = testutil::select(Vec::new(), vec![lit(1)]);

        let planned = planner(1, &[])
            .with_now(now)
            .plan(builder.finish_select(select))
            .unwrap();
        assert_eq!(
            "2024-01-02 03:04:05.000000000",
            planned.request.fragments[0].query_globals.now_string
        );
    }
}
