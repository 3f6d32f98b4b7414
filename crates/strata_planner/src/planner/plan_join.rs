use std::collections::BTreeSet;

use strata_error::{Result, internal, not_implemented};
use tracing::{debug, trace};

use super::PlanContext;
use super::plan_scan::ScanPlanner;
use super::plan_view::ViewPlanner;
use crate::analysis::registry::{Conjunct, PredicateRegistry};
use crate::analysis::statement::{JoinClause, JoinOp, TableRef};
use crate::expr::Expression;
use crate::ids::TupleId;
use crate::plan::join::HashJoinNode;
use crate::plan::{Node, PlanNode};

/// Plans the FROM clause as a left-deep chain of hash joins in declared
/// order.
#[derive(Debug)]
pub struct JoinPlanner;

impl JoinPlanner {
    pub fn plan(
        &self,
        ctx: &mut PlanContext,
        table_refs: &[TableRef],
        registry: &mut PredicateRegistry,
    ) -> Result<PlanNode> {
        let (first, rest) = table_refs
            .split_first()
            .ok_or_else(|| internal!("Cannot plan joins for an empty FROM clause"))?;

        let row_tuple_ids: Vec<TupleId> = table_refs
            .iter()
            .flat_map(|r| r.materialized_tuple_ids())
            .collect();

        // Conjuncts on outer joined tuples must not be evaluated below the
        // join producing NULLs for them.
        for idx in 1..table_refs.len() {
            registry.register_nullable_tuples(null_extended_tuples(table_refs, idx));
        }

        let mut root = plan_table_ref(ctx, first, registry)?;
        root.set_row_tuple_ids(row_tuple_ids.clone());

        for (offset, rhs_ref) in rest.iter().enumerate() {
            let idx = offset + 1;
            let join = rhs_ref
                .join()
                .copied()
                .ok_or_else(|| internal!("Missing join clause for table reference {idx}"))?;

            // Tuples that a later outer join will NULL-extend.
            let pending: BTreeSet<TupleId> = (idx + 1..table_refs.len())
                .flat_map(|later| null_extended_tuples(table_refs, later))
                .collect();

            root = self.plan_join(ctx, root, rhs_ref, join, &pending, registry)?;
            root.set_row_tuple_ids(row_tuple_ids.clone());
        }

        Ok(root)
    }

    fn plan_join(
        &self,
        ctx: &mut PlanContext,
        lhs: PlanNode,
        rhs_ref: &TableRef,
        join: JoinClause,
        pending: &BTreeSet<TupleId>,
        registry: &mut PredicateRegistry,
    ) -> Result<PlanNode> {
        let mut rhs = plan_table_ref(ctx, rhs_ref, registry)?;
        let rhs_tuple_ids = rhs_ref.materialized_tuple_ids();
        rhs.set_row_tuple_ids(rhs_tuple_ids.clone());
        rhs.set_compact_data(true);

        let lhs_tuple_ids = lhs.tuple_ids().to_vec();

        let (eq_join_conjuncts, other_join_conjuncts) = if join.op.is_outer_join() {
            let on_clause = registry.on_clause_conjuncts(rhs_ref.tuple_id());
            registry.mark_conjuncts_assigned(&on_clause);

            let mut pairs = Vec::new();
            let mut others = Vec::new();
            for conjunct in on_clause {
                match hash_key_pair(&conjunct, &lhs_tuple_ids, &rhs_tuple_ids) {
                    Some(pair) => pairs.push(pair),
                    None => others.push(conjunct.expr),
                }
            }
            (pairs, others)
        } else {
            let mut pairs = Vec::new();
            let mut used = Vec::new();
            let candidates = registry
                .eq_join_conjuncts(&rhs_tuple_ids)
                .into_iter()
                .filter(|c| !defers_to_outer_join(c, pending));
            for conjunct in candidates {
                if let Some(pair) = hash_key_pair(&conjunct, &lhs_tuple_ids, &rhs_tuple_ids) {
                    pairs.push(pair);
                    used.push(conjunct);
                }
            }
            registry.mark_conjuncts_assigned(&used);
            (pairs, Vec::new())
        };

        if eq_join_conjuncts.is_empty() {
            not_implemented!("Join requires at least one equality predicate between the two tables.");
        }

        let mut tuple_ids = lhs_tuple_ids.clone();
        tuple_ids.extend(rhs.tuple_ids().iter().copied());

        let mut nullable: BTreeSet<TupleId> = lhs
            .nullable_tuple_ids()
            .iter()
            .chain(rhs.nullable_tuple_ids())
            .copied()
            .collect();
        match join.op {
            JoinOp::Inner => (),
            JoinOp::LeftOuter => nullable.extend(rhs.tuple_ids()),
            JoinOp::RightOuter => nullable.extend(lhs.tuple_ids()),
            JoinOp::FullOuter => {
                nullable.extend(lhs.tuple_ids());
                nullable.extend(rhs.tuple_ids());
            }
        }

        let residual: Vec<Conjunct> = registry
            .join_bound_conjuncts(&tuple_ids)
            .into_iter()
            .filter(|c| !defers_to_outer_join(c, pending))
            .collect();
        registry.mark_conjuncts_assigned(&residual);

        let id = ctx.next_id();
        debug!(
            %id,
            op = %join.op,
            num_hash_keys = eq_join_conjuncts.len(),
            num_residual = residual.len(),
            "planned hash join"
        );

        let mut node = Node::new(
            id,
            HashJoinNode {
                join_op: join.op,
                eq_join_conjuncts,
                other_join_conjuncts,
                hint: join.hint,
                distribution: None,
            },
            vec![lhs, rhs],
            tuple_ids,
        );
        node.nullable_tuple_ids = nullable.into_iter().collect();
        node.conjuncts = residual.into_iter().map(|c| c.expr).collect();

        Ok(PlanNode::HashJoin(node))
    }
}

/// Plan a single FROM clause entry.
pub(super) fn plan_table_ref(
    ctx: &mut PlanContext,
    table_ref: &TableRef,
    registry: &mut PredicateRegistry,
) -> Result<PlanNode> {
    match table_ref {
        TableRef::Base(base) => ScanPlanner.plan(ctx, base, registry),
        TableRef::InlineView(view) => {
            trace!(alias = %view.alias, "planning inline view");
            ViewPlanner.plan(ctx, view, registry)
        }
    }
}

/// Tuples the join with the reference at `idx` may NULL-extend.
/// WHERE conjuncts on tuples a later outer join NULL-extends must see the
/// extended rows.
fn defers_to_outer_join(conjunct: &Conjunct, pending: &BTreeSet<TupleId>) -> bool {
    !conjunct.is_inner_join_on() && conjunct.tuple_ids().iter().any(|t| pending.contains(t))
}

fn null_extended_tuples(table_refs: &[TableRef], idx: usize) -> Vec<TupleId> {
    let Some(join) = table_refs[idx].join() else {
        return Vec::new();
    };
    let lhs = || table_refs[..idx].iter().flat_map(|r| r.materialized_tuple_ids());
    let rhs = table_refs[idx].materialized_tuple_ids();

    match join.op {
        JoinOp::Inner => Vec::new(),
        JoinOp::LeftOuter => rhs,
        JoinOp::RightOuter => lhs().collect(),
        JoinOp::FullOuter => lhs().chain(rhs).collect(),
    }
}

/// Return the sides of an equality usable as hash join keys, left side first.
///
/// One side must only reference the right input, the other side only the
/// left input. Sides not referencing any tuple don't qualify.
fn hash_key_pair(
    conjunct: &Conjunct,
    lhs_tuple_ids: &[TupleId],
    rhs_tuple_ids: &[TupleId],
) -> Option<(Expression, Expression)> {
    let (a, b) = conjunct.expr.as_equality()?;
    if a == b || a.tuple_ids().is_empty() || b.tuple_ids().is_empty() {
        return None;
    }

    if b.is_bound_by(rhs_tuple_ids) && a.is_bound_by(lhs_tuple_ids) {
        Some((a.clone(), b.clone()))
    } else if a.is_bound_by(rhs_tuple_ids) && b.is_bound_by(lhs_tuple_ids) {
        Some((b.clone(), a.clone()))
    } else {
        None
    }
}
