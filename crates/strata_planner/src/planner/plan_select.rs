use strata_error::{Result, not_implemented};

use super::plan_aggregate::AggregatePlanner;
use super::plan_join::JoinPlanner;
use super::{PlanContext, check_fully_assigned, plan_sort};
use crate::analysis::registry::PredicateRegistry;
use crate::analysis::statement::SelectStatement;
use crate::plan::PlanNode;

#[derive(Debug)]
pub struct SelectPlanner;

impl SelectPlanner {
    /// Plan a single query block.
    ///
    /// Returns None if the statement has no FROM clause. Every conjunct of
    /// the block's registry is assigned once this returns.
    pub fn plan(
        &self,
        ctx: &mut PlanContext,
        select: &SelectStatement,
        registry: &mut PredicateRegistry,
    ) -> Result<Option<PlanNode>> {
        if select.table_refs.is_empty() {
            return Ok(None);
        }

        if select.sort_info.is_some() && select.limit.is_none() {
            not_implemented!("ORDER BY without LIMIT currently not supported");
        }

        let mut root = JoinPlanner.plan(ctx, &select.table_refs, registry)?;

        if let Some(agg_info) = &select.agg_info {
            root = AggregatePlanner.plan(ctx, root, agg_info)?;
        }

        if !select.having.is_empty() {
            AggregatePlanner.plan_having(&mut root, &select.having, registry)?;
        }

        if let Some(sort_info) = &select.sort_info {
            root = plan_sort(ctx, root, sort_info);
        }
        root.set_limit(select.limit);

        check_fully_assigned(registry, "query block")?;

        Ok(Some(root))
    }
}
