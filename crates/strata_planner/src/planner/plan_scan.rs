use strata_error::Result;
use tracing::{debug, trace};

use super::PlanContext;
use crate::analysis::registry::PredicateRegistry;
use crate::analysis::statement::BaseTableRef;
use crate::analysis::table::TableFormat;
use crate::datatype::DataType;
use crate::expr::Expression;
use crate::expr::comparison_expr::ComparisonOperator;
use crate::ids::SlotId;
use crate::plan::scan::ScanNode;
use crate::plan::value_range::{Bound, ValueRange};
use crate::plan::{Node, PlanNode};

#[derive(Debug)]
pub struct ScanPlanner;

impl ScanPlanner {
    /// Plan a scan of a base table, taking every conjunct that only
    /// references the table.
    pub fn plan(
        &self,
        ctx: &mut PlanContext,
        table_ref: &BaseTableRef,
        registry: &mut PredicateRegistry,
    ) -> Result<PlanNode> {
        let bound = registry.bound_conjuncts(&[table_ref.tuple_id]);
        registry.mark_conjuncts_assigned(&bound);
        let mut conjuncts: Vec<Expression> = bound.into_iter().map(|c| c.expr).collect();

        let table = &table_ref.table;
        let mut key_ranges = Vec::with_capacity(table.num_clustering_cols);
        for (pos, col) in table.clustering_columns().iter().enumerate() {
            // Row keys are stored as strings, ranges on non-string keys
            // wouldn't be ordered the same way.
            let usable = !(table.format == TableFormat::KeyValue && col.datatype != DataType::Utf8);
            let range = match ctx.desc_tbl.slot_for_column(table_ref.tuple_id, pos) {
                Some(slot) if usable => derive_value_range(slot, &mut conjuncts),
                _ => None,
            };
            if let Some(range) = &range {
                debug!(table = %table.name, column = %col.name, %range, "derived key range");
            }
            key_ranges.push(range);
        }

        let id = ctx.next_id();
        let mut node = Node::new(
            id,
            ScanNode {
                tuple_id: table_ref.tuple_id,
                table: table.clone(),
                key_ranges,
            },
            Vec::new(),
            vec![table_ref.tuple_id],
        );
        node.conjuncts = conjuncts;
        trace!(%id, table = %table.name, "planned scan");

        Ok(PlanNode::Scan(node))
    }
}

/// Derive the range of values for `slot` from comparisons against constants.
///
/// Conjuncts turned into the range are removed from `conjuncts`. An equality
/// wins over any bounds, in which case bounds seen so far stay in
/// `conjuncts`. Otherwise the first lower and the first upper bound are used.
pub fn derive_value_range(slot: SlotId, conjuncts: &mut Vec<Expression>) -> Option<ValueRange> {
    let mut lower: Option<(usize, Bound)> = None;
    let mut upper: Option<(usize, Bound)> = None;
    let mut equality: Option<(usize, Expression)> = None;

    for (idx, conjunct) in conjuncts.iter().enumerate() {
        let Expression::Comparison(cmp) = conjunct else {
            continue;
        };
        let Some((op, value)) = cmp.slot_binding(slot) else {
            continue;
        };
        if !value.is_constant() {
            continue;
        }

        match op {
            ComparisonOperator::Eq => {
                equality = Some((idx, value.clone()));
                break;
            }
            ComparisonOperator::NotEq => (),
            ComparisonOperator::Gt | ComparisonOperator::GtEq if lower.is_none() => {
                let bound = Bound {
                    expr: value.clone(),
                    inclusive: op == ComparisonOperator::GtEq,
                };
                lower = Some((idx, bound));
            }
            ComparisonOperator::Lt | ComparisonOperator::LtEq if upper.is_none() => {
                let bound = Bound {
                    expr: value.clone(),
                    inclusive: op == ComparisonOperator::LtEq,
                };
                upper = Some((idx, bound));
            }
            _ => (),
        }
    }

    if let Some((idx, value)) = equality {
        conjuncts.remove(idx);
        return Some(ValueRange::Eq(value));
    }

    if lower.is_none() && upper.is_none() {
        return None;
    }

    // Remove back to front so indices stay valid.
    let mut consumed: Vec<usize> = lower.iter().chain(upper.iter()).map(|(idx, _)| *idx).collect();
    consumed.sort_unstable();
    for idx in consumed.into_iter().rev() {
        conjuncts.remove(idx);
    }

    Some(ValueRange::Bounded {
        lower: lower.map(|(_, b)| b),
        upper: upper.map(|(_, b)| b),
    })
}
