use strata_error::{Result, internal};
use tracing::trace;

use super::PlanContext;
use crate::analysis::aggregate_info::AggregateInfo;
use crate::analysis::registry::PredicateRegistry;
use crate::expr::Expression;
use crate::expr::conjunction_expr::split_conjunction;
use crate::plan::aggregate::AggregateNode;
use crate::plan::{Node, PlanNode};

#[derive(Debug)]
pub struct AggregatePlanner;

impl AggregatePlanner {
    /// Add aggregation on top of `input`.
    ///
    /// DISTINCT aggregates produce two nodes, the first grouping by the
    /// grouping expressions plus the distinct arguments without finalizing.
    pub fn plan(
        &self,
        ctx: &mut PlanContext,
        input: PlanNode,
        agg_info: &AggregateInfo,
    ) -> Result<PlanNode> {
        let first_phase = AggregateInfo {
            second_phase: None,
            ..agg_info.clone()
        };
        let mut root = self.aggregate_node(ctx, input, first_phase, !agg_info.is_distinct_agg());

        if let Some(second_phase) = &agg_info.second_phase {
            root = self.aggregate_node(ctx, root, second_phase.as_ref().clone(), true);
        }

        Ok(root)
    }

    /// Attach HAVING conjuncts to the outermost aggregation.
    ///
    /// The conjuncts are registered and immediately marked assigned.
    pub fn plan_having(
        &self,
        root: &mut PlanNode,
        having: &[Expression],
        registry: &mut PredicateRegistry,
    ) -> Result<()> {
        let PlanNode::Aggregate(agg) = root else {
            return Err(internal!("HAVING clause requires an aggregation, got {}", root.name()));
        };

        let ids = registry.register_conjuncts(having.iter().cloned());
        registry.mark_assigned(ids);

        for expr in having {
            split_conjunction(expr.clone(), &mut agg.conjuncts);
        }

        Ok(())
    }

    fn aggregate_node(
        &self,
        ctx: &mut PlanContext,
        input: PlanNode,
        agg_info: AggregateInfo,
        needs_finalize: bool,
    ) -> PlanNode {
        let id = ctx.next_id();
        let tuple_ids = vec![agg_info.output_tuple];
        trace!(%id, output_tuple = %agg_info.output_tuple, needs_finalize, "planned aggregate");

        PlanNode::Aggregate(Node::new(
            id,
            AggregateNode {
                agg_info,
                needs_finalize,
                is_merge: false,
            },
            vec![input],
            tuple_ids,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerConfig;
    use crate::expr::aggregate_expr::{AggregateExpr, AggregateFunction};
    use crate::expr::comparison_expr::ComparisonOperator;
    use crate::expr::{self, lit};
    use crate::planner::plan_join::plan_table_ref;
    use crate::testutil::{self, QueryBuilder};

    #[test]
    fn distinct_produces_two_nodes() {
        let mut builder = QueryBuilder::new();
        let t = builder.add_table(&testutil::alltypes());
        let agg_info = AggregateInfo::create(
            vec![t.col("year")],
            vec![AggregateExpr::new(AggregateFunction::Count, vec![t.col("int_col")], true)],
            &mut builder.desc_tbl,
        )
        .unwrap();

        let config = PlannerConfig::default();
        let mut ctx = PlanContext::new(&config, builder.desc_tbl.clone());
        let mut registry = builder.registry.clone();
        let scan = plan_table_ref(&mut ctx, &t.table_ref(), &mut registry).unwrap();
        let plan = AggregatePlanner.plan(&mut ctx, scan, &agg_info).unwrap();

        let PlanNode::Aggregate(second) = &plan else {
            panic!("expected aggregate");
        };
        assert!(second.node.needs_finalize);
        assert_eq!(1, second.node.agg_info.grouping_exprs.len());

        let PlanNode::Aggregate(first) = &second.children[0] else {
            panic!("expected aggregate");
        };
        assert!(!first.node.needs_finalize);
        assert!(first.node.agg_info.second_phase.is_none());
        assert_eq!(2, first.node.agg_info.grouping_exprs.len());
    }

    #[test]
    fn having_attached_and_assigned() {
        let mut builder = QueryBuilder::new();
        let t = builder.add_table(&testutil::alltypes());
        let agg_info = AggregateInfo::create(
            vec![t.col("year")],
            vec![AggregateExpr::new(AggregateFunction::Count, vec![t.col("id")], false)],
            &mut builder.desc_tbl,
        )
        .unwrap();
        let out = agg_info.output_columns(&builder.desc_tbl).unwrap();
        let having = expr::and([
            expr::compare(ComparisonOperator::Gt, expr::column(&out[1]), lit(10)),
            expr::compare(ComparisonOperator::Lt, expr::column(&out[0]), lit(2010)),
        ]);

        let config = PlannerConfig::default();
        let mut ctx = PlanContext::new(&config, builder.desc_tbl.clone());
        let mut registry = builder.registry.clone();
        let scan = plan_table_ref(&mut ctx, &t.table_ref(), &mut registry).unwrap();
        let mut plan = AggregatePlanner.plan(&mut ctx, scan, &agg_info).unwrap();
        AggregatePlanner
            .plan_having(&mut plan, &[having], &mut registry)
            .unwrap();

        assert_eq!(2, plan.conjuncts().len());
        assert!(!registry.has_unassigned());
        plan.verify_conjuncts_bound().unwrap();
    }

    #[test]
    fn having_without_aggregate_is_internal() {
        let mut builder = QueryBuilder::new();
        let t = builder.add_table(&testutil::alltypes());

        let config = PlannerConfig::default();
        let mut ctx = PlanContext::new(&config, builder.desc_tbl.clone());
        let mut registry = builder.registry.clone();
        let mut scan = plan_table_ref(&mut ctx, &t.table_ref(), &mut registry).unwrap();

        let err = AggregatePlanner
            .plan_having(&mut scan, &[expr::eq(t.col("id"), lit(1))], &mut registry)
            .unwrap_err();
        assert!(err.is_internal());
    }
}
