use std::fmt;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::expr::Expression;
use crate::expr::conjunction_expr::split_conjunction;
use crate::ids::TupleId;

/// Identifies a conjunct within a single registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConjunctId(pub usize);

impl fmt::Display for ConjunctId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clause a conjunct was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConjunctOrigin {
    Where,
    /// ON clause of an inner join. Evaluated no later than that join, even
    /// when a later outer join NULL-extends its tuples.
    InnerJoinOn,
    /// ON clause of an outer join with the given right-hand tuple. Only ever
    /// evaluated by that join.
    OuterJoinOn(TupleId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conjunct {
    pub id: ConjunctId,
    pub expr: Expression,
    pub origin: ConjunctOrigin,
    tuple_ids: Vec<TupleId>,
}

impl Conjunct {
    /// Tuples referenced by this conjunct.
    pub fn tuple_ids(&self) -> &[TupleId] {
        &self.tuple_ids
    }

    pub fn is_inner_join_on(&self) -> bool {
        self.origin == ConjunctOrigin::InnerJoinOn
    }

    fn is_bound_by(&self, tuple_ids: &[TupleId]) -> bool {
        self.tuple_ids.iter().all(|id| tuple_ids.contains(id))
    }
}

/// Conjuncts of a single query block and their assignment state.
///
/// Every planning call that consumes conjuncts receives the registry by
/// reference and marks what it consumed as assigned. Inline views and union
/// operands carry their own registry, cloned for every planning pass.
#[derive(Debug, Clone, Default)]
pub struct PredicateRegistry {
    conjuncts: Vec<Conjunct>,
    assigned: HashSet<ConjunctId>,
    /// Tuples that may be NULL-extended by an outer join.
    nullable_tuples: HashSet<TupleId>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate, splitting it on AND.
    pub fn register_conjunct(&mut self, expr: Expression) -> Vec<ConjunctId> {
        self.register_inner(expr, ConjunctOrigin::Where)
    }

    pub fn register_conjuncts(
        &mut self,
        exprs: impl IntoIterator<Item = Expression>,
    ) -> Vec<ConjunctId> {
        exprs
            .into_iter()
            .flat_map(|expr| self.register_conjunct(expr))
            .collect()
    }

    /// Register the ON clause of an outer join whose right-hand reference
    /// materializes `rhs_tuple`.
    ///
    /// ON clauses of inner joins go through `register_inner_join_on`.
    pub fn register_on_clause(&mut self, rhs_tuple: TupleId, expr: Expression) -> Vec<ConjunctId> {
        self.register_inner(expr, ConjunctOrigin::OuterJoinOn(rhs_tuple))
    }

    /// Register the ON clause of an inner join.
    pub fn register_inner_join_on(&mut self, expr: Expression) -> Vec<ConjunctId> {
        self.register_inner(expr, ConjunctOrigin::InnerJoinOn)
    }

    /// Register tuples that an outer join may NULL-extend.
    ///
    /// Conjuncts referencing these tuples are held back until a join binds
    /// them.
    pub fn register_nullable_tuples(&mut self, tuple_ids: impl IntoIterator<Item = TupleId>) {
        self.nullable_tuples.extend(tuple_ids);
    }

    fn register_inner(&mut self, expr: Expression, origin: ConjunctOrigin) -> Vec<ConjunctId> {
        let mut split = Vec::new();
        split_conjunction(expr, &mut split);

        split
            .into_iter()
            .map(|expr| {
                let id = ConjunctId(self.conjuncts.len());
                let tuple_ids = expr.tuple_ids().into_iter().collect();
                trace!(%id, %expr, ?origin, "registered conjunct");
                self.conjuncts.push(Conjunct {
                    id,
                    expr,
                    origin,
                    tuple_ids,
                });
                id
            })
            .collect()
    }

    fn unassigned_where_conjuncts(&self) -> impl Iterator<Item = &Conjunct> {
        self.conjuncts
            .iter()
            .filter(|c| !matches!(c.origin, ConjunctOrigin::OuterJoinOn(_)))
            .filter(|c| !self.assigned.contains(&c.id))
    }

    /// Unassigned conjuncts fully bound by `tuple_ids`, for evaluation at a
    /// scan or inline view.
    ///
    /// Conjuncts referencing an outer-joined tuple are excluded, they're
    /// picked up by the join instead (`join_bound_conjuncts`).
    pub fn bound_conjuncts(&self, tuple_ids: &[TupleId]) -> Vec<Conjunct> {
        self.unassigned_where_conjuncts()
            .filter(|c| c.is_bound_by(tuple_ids))
            .filter(|c| !c.tuple_ids.iter().any(|t| self.nullable_tuples.contains(t)))
            .cloned()
            .collect()
    }

    /// Unassigned conjuncts fully bound by the output of a join.
    pub fn join_bound_conjuncts(&self, tuple_ids: &[TupleId]) -> Vec<Conjunct> {
        self.unassigned_where_conjuncts()
            .filter(|c| c.is_bound_by(tuple_ids))
            .cloned()
            .collect()
    }

    /// Unassigned equality conjuncts referencing at least one of
    /// `rhs_tuple_ids`.
    ///
    /// Candidates for hash join keys of an inner join.
    pub fn eq_join_conjuncts(&self, rhs_tuple_ids: &[TupleId]) -> Vec<Conjunct> {
        self.unassigned_where_conjuncts()
            .filter(|c| c.expr.as_equality().is_some())
            .filter(|c| c.tuple_ids.iter().any(|t| rhs_tuple_ids.contains(t)))
            .cloned()
            .collect()
    }

    /// Unassigned conjuncts of the ON clause of the outer join with the
    /// right-hand tuple `rhs_tuple`.
    pub fn on_clause_conjuncts(&self, rhs_tuple: TupleId) -> Vec<Conjunct> {
        self.conjuncts
            .iter()
            .filter(|c| c.origin == ConjunctOrigin::OuterJoinOn(rhs_tuple))
            .filter(|c| !self.assigned.contains(&c.id))
            .cloned()
            .collect()
    }

    pub fn mark_assigned(&mut self, ids: impl IntoIterator<Item = ConjunctId>) {
        self.assigned.extend(ids);
    }

    pub fn mark_conjuncts_assigned<'a>(&mut self, conjuncts: impl IntoIterator<Item = &'a Conjunct>) {
        self.mark_assigned(conjuncts.into_iter().map(|c| c.id));
    }

    pub fn is_assigned(&self, id: ConjunctId) -> bool {
        self.assigned.contains(&id)
    }

    pub fn has_unassigned(&self) -> bool {
        self.conjuncts.iter().any(|c| !self.assigned.contains(&c.id))
    }

    pub fn unassigned(&self) -> Vec<&Conjunct> {
        self.conjuncts
            .iter()
            .filter(|c| !self.assigned.contains(&c.id))
            .collect()
    }

    pub fn num_conjuncts(&self) -> usize {
        self.conjuncts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataType;
    use crate::expr::comparison_expr::ComparisonOperator;
    use crate::expr::{self, ColumnExpr};
    use crate::ids::SlotId;

    fn col(tuple: usize, slot: usize) -> Expression {
        Expression::Column(ColumnExpr::new(
            TupleId(tuple),
            SlotId(slot),
            DataType::Int32,
            format!("t{tuple}.c{slot}"),
        ))
    }

    #[test]
    fn register_splits_and() {
        let mut registry = PredicateRegistry::new();
        let ids = registry.register_conjunct(expr::and([
            expr::eq(col(0, 0), expr::lit(1)),
            expr::eq(col(1, 1), expr::lit(2)),
        ]));
        assert_eq!(2, ids.len());
        assert_eq!(2, registry.num_conjuncts());
    }

    #[test]
    fn bound_conjuncts_and_assignment() {
        let mut registry = PredicateRegistry::new();
        registry.register_conjunct(expr::eq(col(0, 0), expr::lit(1)));
        registry.register_conjunct(expr::eq(col(0, 0), col(1, 1)));

        let bound = registry.bound_conjuncts(&[TupleId(0)]);
        assert_eq!(1, bound.len());

        registry.mark_conjuncts_assigned(&bound);
        assert!(registry.has_unassigned());
        assert!(registry.bound_conjuncts(&[TupleId(0)]).is_empty());

        let bound = registry.bound_conjuncts(&[TupleId(0), TupleId(1)]);
        assert_eq!(1, bound.len());
        registry.mark_conjuncts_assigned(&bound);
        assert!(!registry.has_unassigned());
    }

    #[test]
    fn eq_join_candidates() {
        let mut registry = PredicateRegistry::new();
        registry.register_conjunct(expr::eq(col(0, 0), col(1, 1)));
        registry.register_conjunct(expr::compare(ComparisonOperator::Lt, col(0, 0), col(1, 1)));
        registry.register_conjunct(expr::eq(col(0, 0), col(2, 2)));

        let candidates = registry.eq_join_conjuncts(&[TupleId(1)]);
        assert_eq!(1, candidates.len());
        assert_eq!(ConjunctId(0), candidates[0].id);
    }

    #[test]
    fn on_clause_conjuncts_not_bound_elsewhere() {
        let mut registry = PredicateRegistry::new();
        registry.register_on_clause(TupleId(1), expr::eq(col(0, 0), col(1, 1)));
        registry.register_on_clause(TupleId(1), expr::eq(col(1, 1), expr::lit(4)));

        assert!(registry.bound_conjuncts(&[TupleId(1)]).is_empty());
        assert!(registry.eq_join_conjuncts(&[TupleId(1)]).is_empty());
        assert_eq!(2, registry.on_clause_conjuncts(TupleId(1)).len());
    }

    #[test]
    fn inner_join_on_clause_is_join_candidate() {
        let mut registry = PredicateRegistry::new();
        registry.register_inner_join_on(expr::and([
            expr::eq(col(0, 0), col(1, 1)),
            expr::eq(col(1, 2), expr::lit(4)),
        ]));

        let candidates = registry.eq_join_conjuncts(&[TupleId(1)]);
        assert_eq!(2, candidates.len());
        assert!(candidates.iter().all(Conjunct::is_inner_join_on));
        assert_eq!(1, registry.bound_conjuncts(&[TupleId(1)]).len());
        assert!(registry.on_clause_conjuncts(TupleId(1)).is_empty());
    }

    #[test]
    fn nullable_tuples_held_until_join() {
        let mut registry = PredicateRegistry::new();
        registry.register_nullable_tuples([TupleId(1)]);
        registry.register_conjunct(expr::eq(col(1, 1), expr::lit(4)));

        assert!(registry.bound_conjuncts(&[TupleId(1)]).is_empty());
        assert_eq!(1, registry.join_bound_conjuncts(&[TupleId(0), TupleId(1)]).len());
    }

    #[test]
    fn clones_are_independent() {
        let mut registry = PredicateRegistry::new();
        let ids = registry.register_conjunct(expr::eq(col(0, 0), expr::lit(1)));

        let mut cloned = registry.clone();
        cloned.mark_assigned(ids);

        assert!(!cloned.has_unassigned());
        assert!(registry.has_unassigned());
    }
}
