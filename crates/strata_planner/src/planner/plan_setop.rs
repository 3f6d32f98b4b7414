use strata_error::{Result, internal, not_implemented};
use tracing::{debug, trace};

use super::plan_select::SelectPlanner;
use super::{PlanContext, plan_sort};
use crate::analysis::aggregate_info::AggregateInfo;
use crate::analysis::registry::PredicateRegistry;
use crate::analysis::statement::{QueryStatement, Qualifier, UnionOperand, UnionStatement};
use crate::plan::aggregate::AggregateNode;
use crate::plan::merge::MergeNode;
use crate::plan::{Node, PlanNode};

/// Plans UNION statements.
///
/// DISTINCT operands are merged into a single merge node followed by a
/// deduplicating aggregation, ALL operands are merged into one merge node on
/// top of that. Nested unions are flattened into the enclosing merge node
/// where that doesn't change the result.
#[derive(Debug)]
pub struct SetOpPlanner;

impl SetOpPlanner {
    pub fn plan(
        &self,
        ctx: &mut PlanContext,
        union: &UnionStatement,
        registry: &mut PredicateRegistry,
    ) -> Result<PlanNode> {
        ctx.enter()?;
        let result = self.plan_inner(ctx, union, registry);
        ctx.exit();
        result
    }

    fn plan_inner(
        &self,
        ctx: &mut PlanContext,
        union: &UnionStatement,
        registry: &mut PredicateRegistry,
    ) -> Result<PlanNode> {
        if union.operands.len() < 2 {
            return Err(internal!(
                "Union requires at least two operands, got {}",
                union.operands.len()
            ));
        }
        if union.sort_info.is_some() && union.limit.is_none() {
            not_implemented!("ORDER BY without LIMIT currently not supported");
        }

        let mut merge = self.merge_node(ctx, union);
        let mut operands = union.operands.iter();

        // The first operand has no qualifier of its own, it's combined with
        // the second using the second's qualifier.
        if let Some(first) = operands.next() {
            self.absorb_operand(ctx, first, &mut merge, union.operands[1].qualifier)?;
        }

        let mut has_distinct = false;
        let mut operands = operands.peekable();
        while let Some(operand) = operands.next_if(|op| op.qualifier == Qualifier::Distinct) {
            has_distinct = true;
            self.absorb_operand(ctx, operand, &mut merge, Qualifier::Distinct)?;
        }

        let mut root = PlanNode::Merge(merge);
        if has_distinct {
            let agg_info = AggregateInfo::create_with_output_tuple(
                union.result_exprs.clone(),
                Vec::new(),
                union.tuple_id,
                &mut ctx.desc_tbl,
            )?;
            let id = ctx.next_id();
            root = PlanNode::Aggregate(Node::new(
                id,
                AggregateNode {
                    agg_info,
                    needs_finalize: true,
                    is_merge: false,
                },
                vec![root],
                vec![union.tuple_id],
            ));
            trace!(%id, "planned union deduplication");

            if operands.peek().is_some() {
                let mut all_merge = self.merge_node(ctx, union);
                all_merge.children.push(root);
                all_merge.node.result_expr_lists.push(union.result_exprs.clone());
                root = PlanNode::Merge(all_merge);
            }
        }

        // DISTINCT has been propagated to the left, only ALL remains.
        for operand in operands {
            if operand.qualifier != Qualifier::All {
                return Err(internal!("DISTINCT union operand follows an ALL operand"));
            }
            let PlanNode::Merge(merge) = &mut root else {
                return Err(internal!("Expected merge node for UNION ALL operands"));
            };
            self.absorb_operand(ctx, operand, merge, Qualifier::All)?;
        }

        // Predicates on the union's output, set when the union is the body of
        // an inline view.
        let bound = registry.bound_conjuncts(&[union.tuple_id]);
        registry.mark_conjuncts_assigned(&bound);
        let conjuncts = bound.into_iter().map(|c| c.expr);
        match &mut root {
            PlanNode::Aggregate(agg) => {
                // Filter before deduplicating.
                let child = agg
                    .children
                    .first_mut()
                    .ok_or_else(|| internal!("Union deduplication without input"))?;
                if !matches!(child, PlanNode::Merge(_)) {
                    return Err(internal!("Expected merge node below union deduplication"));
                }
                child.conjuncts_mut().extend(conjuncts);
            }
            root => root.conjuncts_mut().extend(conjuncts),
        }

        if let Some(sort_info) = &union.sort_info {
            root = plan_sort(ctx, root, sort_info);
        }
        root.set_limit(union.limit);

        debug!(
            root = %root.id(),
            num_operands = union.operands.len(),
            has_distinct,
            "planned union"
        );

        Ok(root)
    }

    fn merge_node(&self, ctx: &mut PlanContext, union: &UnionStatement) -> Node<MergeNode> {
        Node::new(
            ctx.next_id(),
            MergeNode::new(union.tuple_id),
            Vec::new(),
            vec![union.tuple_id],
        )
    }

    /// Add an operand to `merge`.
    ///
    /// `top_qualifier` is the qualifier of the operand at the start of the
    /// recursion through nested unions.
    fn absorb_operand(
        &self,
        ctx: &mut PlanContext,
        operand: &UnionOperand,
        merge: &mut Node<MergeNode>,
        top_qualifier: Qualifier,
    ) -> Result<()> {
        match &operand.statement {
            QueryStatement::Select(select) => {
                let mut registry = operand.registry.clone();
                match SelectPlanner.plan(ctx, select, &mut registry)? {
                    Some(plan) => {
                        merge.children.push(plan);
                        merge.node.result_expr_lists.push(select.result_exprs.clone());
                    }
                    None => merge.node.const_expr_lists.push(select.result_exprs.clone()),
                }
                Ok(())
            }
            QueryStatement::Union(nested) => {
                let second_qualifier = nested
                    .operands
                    .get(1)
                    .map(|op| op.qualifier)
                    .ok_or_else(|| internal!("Nested union requires at least two operands"))?;

                // Operands of a nested union can only be merged directly if
                // that doesn't change which rows get deduplicated or limited.
                let plan_separately = nested.limit.is_some()
                    || (top_qualifier == Qualifier::All && second_qualifier != Qualifier::All);
                if !plan_separately {
                    for nested_operand in &nested.operands {
                        self.absorb_operand(ctx, nested_operand, merge, top_qualifier)?;
                    }
                    return Ok(());
                }

                let mut registry = operand.registry.clone();
                match self.plan(ctx, nested, &mut registry)? {
                    PlanNode::Merge(nested_merge)
                        if nested.limit.is_none() && nested_merge.conjuncts.is_empty() =>
                    {
                        let Node { node, children, .. } = nested_merge;
                        merge.children.extend(children);
                        merge.node.result_expr_lists.extend(node.result_expr_lists);
                        merge.node.const_expr_lists.extend(node.const_expr_lists);
                    }
                    plan => {
                        merge.children.push(plan);
                        merge.node.result_expr_lists.push(nested.result_exprs.clone());
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::statement::{OrderByExpr, SortInfo};
    use crate::config::PlannerConfig;
    use crate::testutil::{self, QueryBuilder, UnionBuilder};

    fn plan_union(builder: &QueryBuilder, union: &UnionStatement) -> Result<PlanNode> {
        let config = PlannerConfig::default();
        let mut ctx = PlanContext::new(&config, builder.desc_tbl.clone());
        let mut registry = builder.registry.clone();
        let plan = SetOpPlanner.plan(&mut ctx, union, &mut registry)?;
        assert!(!registry.has_unassigned());
        Ok(plan)
    }

    fn merge_children(plan: &PlanNode) -> usize {
        match plan {
            PlanNode::Merge(merge) => merge.children.len() + merge.node.const_expr_lists.len(),
            other => panic!("expected merge, got {}", other.name()),
        }
    }

    #[test]
    fn union_all_nested_is_flattened() {
        let mut builder = QueryBuilder::new();
        let mut union = UnionBuilder::new(&mut builder, 1);
        let inner = union.nested(&mut builder, |builder, nested| {
            nested.select_operand(builder, &testutil::alltypes(), Qualifier::All);
            nested.select_operand(builder, &testutil::alltypes(), Qualifier::All);
        });
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::All);
        union.push(inner, Qualifier::All);
        let stmt = union.finish();

        let plan = plan_union(&builder, &stmt).unwrap();
        assert_eq!(3, merge_children(&plan));
        assert_eq!(4, plan.num_nodes());
    }

    #[test]
    fn outer_order_by_keeps_inner_shape() {
        let mut builder = QueryBuilder::new();
        let mut union = UnionBuilder::new(&mut builder, 1);
        let inner = union.nested(&mut builder, |builder, nested| {
            nested.select_operand(builder, &testutil::alltypes(), Qualifier::All);
            nested.select_operand(builder, &testutil::alltypes(), Qualifier::All);
        });
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::All);
        union.push(inner, Qualifier::All);
        let mut stmt = union.finish();
        stmt.sort_info = Some(SortInfo {
            exprs: vec![OrderByExpr {
                expr: stmt.result_exprs[0].clone(),
                desc: true,
                nulls_first: false,
            }],
        });
        stmt.limit = Some(5);

        let plan = plan_union(&builder, &stmt).unwrap();
        assert_eq!("Sort", plan.name());
        assert_eq!(Some(5), plan.limit());
        assert_eq!(3, merge_children(&plan.children()[0]));
    }

    #[test]
    fn nested_union_with_limit_not_flattened() {
        let mut builder = QueryBuilder::new();
        let mut union = UnionBuilder::new(&mut builder, 1);
        let mut inner = union.nested(&mut builder, |builder, nested| {
            nested.select_operand(builder, &testutil::alltypes(), Qualifier::All);
            nested.select_operand(builder, &testutil::alltypes(), Qualifier::All);
        });
        if let QueryStatement::Union(nested) = &mut inner.statement {
            nested.limit = Some(3);
        }
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::All);
        union.push(inner, Qualifier::All);
        let stmt = union.finish();

        let plan = plan_union(&builder, &stmt).unwrap();
        assert_eq!(2, merge_children(&plan));
        assert_eq!(Some(3), plan.children()[1].limit());
    }

    #[test]
    fn distinct_then_all() {
        let mut builder = QueryBuilder::new();
        let mut union = UnionBuilder::new(&mut builder, 1);
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::Distinct);
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::Distinct);
        union.constant_operand(Qualifier::All);
        let stmt = union.finish();

        let plan = plan_union(&builder, &stmt).unwrap();
        // merge(agg(merge(scan, scan)), const row)
        let PlanNode::Merge(top) = &plan else {
            panic!("expected merge");
        };
        assert_eq!(1, top.children.len());
        assert_eq!(1, top.node.const_expr_lists.len());
        let PlanNode::Aggregate(agg) = &top.children[0] else {
            panic!("expected aggregate");
        };
        assert!(agg.node.needs_finalize);
        assert_eq!(stmt.tuple_id, agg.node.agg_info.output_tuple);
        assert_eq!(2, merge_children(&agg.children[0]));
    }

    #[test]
    fn distinct_after_all_is_internal() {
        let mut builder = QueryBuilder::new();
        let mut union = UnionBuilder::new(&mut builder, 1);
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::All);
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::All);
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::Distinct);
        let stmt = union.finish();

        let err = plan_union(&builder, &stmt).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn union_order_by_requires_limit() {
        let mut builder = QueryBuilder::new();
        let mut union = UnionBuilder::new(&mut builder, 1);
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::All);
        union.select_operand(&mut builder, &testutil::alltypes(), Qualifier::All);
        let mut stmt = union.finish();
        stmt.sort_info = Some(SortInfo {
            exprs: vec![OrderByExpr {
                expr: stmt.result_exprs[0].clone(),
                desc: false,
                nulls_first: false,
            }],
        });

        let err = plan_union(&builder, &stmt).unwrap_err();
        assert!(err.is_not_implemented());
    }
}
