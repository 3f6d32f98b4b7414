use strata_error::{Result, internal, not_implemented};
use tracing::debug;

use super::plan_select::SelectPlanner;
use super::plan_setop::SetOpPlanner;
use super::{PlanContext, check_fully_assigned};
use crate::analysis::registry::PredicateRegistry;
use crate::analysis::statement::{InlineViewRef, QueryStatement};
use crate::expr::Expression;
use crate::plan::PlanNode;

/// Plans inline views and WITH clause views.
///
/// Every reference to a view is planned on its own, producing a new subtree
/// with new node ids.
#[derive(Debug)]
pub struct ViewPlanner;

impl ViewPlanner {
    pub fn plan(
        &self,
        ctx: &mut PlanContext,
        view: &InlineViewRef,
        registry: &mut PredicateRegistry,
    ) -> Result<PlanNode> {
        ctx.enter()?;
        let result = self.plan_inner(ctx, view, registry);
        ctx.exit();
        result
    }

    fn plan_inner(
        &self,
        ctx: &mut PlanContext,
        view: &InlineViewRef,
        registry: &mut PredicateRegistry,
    ) -> Result<PlanNode> {
        let bound = registry.bound_conjuncts(&view.materialized_tuple_ids);
        let bound_exprs: Vec<Expression> = bound.iter().map(|c| c.expr.clone()).collect();
        let mut view_registry = view.registry.clone();

        // Conjuncts of a node are evaluated before its limit, the outer
        // predicates must only see the rows that survive it.
        if !bound.is_empty() && view.body.limit().is_some() {
            not_implemented!(
                "Predicates on inline view '{}' with LIMIT not supported",
                view.alias
            );
        }

        let root = match view.body.as_ref() {
            QueryStatement::Union(union) => {
                // Evaluated by the union's topmost merge.
                view_registry.register_conjuncts(bound_exprs);
                registry.mark_conjuncts_assigned(&bound);
                SetOpPlanner.plan(ctx, union, &mut view_registry)?
            }
            QueryStatement::Select(select) => {
                if select.table_refs.is_empty() {
                    not_implemented!("Inline view '{}' without FROM clause not supported", view.alias);
                }

                if select.agg_info.is_none() {
                    // Push into the view body.
                    view_registry.register_conjuncts(bound_exprs);
                    registry.mark_conjuncts_assigned(&bound);
                    SelectPlanner
                        .plan(ctx, select, &mut view_registry)?
                        .ok_or_else(|| internal!("Missing plan for inline view '{}'", view.alias))?
                } else {
                    // Can't push past the aggregation, evaluate on the
                    // aggregation instead.
                    let mut root = SelectPlanner
                        .plan(ctx, select, &mut view_registry)?
                        .ok_or_else(|| internal!("Missing plan for inline view '{}'", view.alias))?;
                    if !bound_exprs.is_empty() {
                        let root_name = root.name();
                        let PlanNode::Aggregate(agg) = &mut root else {
                            return Err(internal!(
                                "Expected aggregation at the root of inline view '{}', got {root_name}",
                                view.alias
                            ));
                        };
                        agg.conjuncts.extend(bound_exprs);
                        registry.mark_conjuncts_assigned(&bound);
                    }
                    root
                }
            }
        };

        check_fully_assigned(&view_registry, "inline view")?;
        debug!(alias = %view.alias, root = %root.id(), num_pushed = bound.len(), "planned inline view");

        Ok(root)
    }
}
