use serde::{Deserialize, Serialize};
use strata_error::{Result, internal, not_implemented};

use super::descriptor::DescriptorTable;
use crate::expr::aggregate_expr::AggregateExpr;
use crate::expr::{ColumnExpr, Expression};
use crate::ids::TupleId;

/// Grouping and aggregate expressions of one aggregation phase.
///
/// The output tuple holds one slot per grouping expression followed by one
/// slot per aggregate expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateInfo {
    pub grouping_exprs: Vec<Expression>,
    pub aggregate_exprs: Vec<AggregateExpr>,
    pub output_tuple: TupleId,
    /// Combines partial results of this phase, reading from and writing to
    /// the same output tuple. Used for distributed execution.
    pub merge_info: Option<Box<AggregateInfo>>,
    /// Second phase when any aggregate is DISTINCT.
    pub second_phase: Option<Box<AggregateInfo>>,
}

impl AggregateInfo {
    /// Create aggregation info, creating a new output tuple.
    ///
    /// When any aggregate is DISTINCT the returned info is the first phase,
    /// grouping by the grouping expressions plus the distinct arguments. The
    /// second phase (`second_phase`) groups by the original grouping
    /// expressions and produces the final output.
    pub fn create(
        grouping_exprs: Vec<Expression>,
        aggregate_exprs: Vec<AggregateExpr>,
        desc_tbl: &mut DescriptorTable,
    ) -> Result<Self> {
        let distinct: Vec<_> = aggregate_exprs.iter().filter(|a| a.is_distinct()).collect();
        let Some(first_distinct) = distinct.first() else {
            let tuple = desc_tbl.create_tuple(None);
            return Self::create_phase(grouping_exprs, aggregate_exprs, tuple, desc_tbl);
        };

        let distinct_args = first_distinct.inputs.clone();
        if distinct.iter().any(|a| a.inputs != distinct_args) {
            not_implemented!(
                "all DISTINCT aggregate functions need to have the same set of parameters as {first_distinct}"
            );
        }

        // First phase: group by keys + distinct args, computing the
        // non-distinct aggregates along the way.
        let mut first_grouping = grouping_exprs.clone();
        for arg in &distinct_args {
            if !first_grouping.contains(arg) {
                first_grouping.push(arg.clone());
            }
        }
        let first_aggs: Vec<_> = aggregate_exprs
            .iter()
            .filter(|a| !a.is_distinct())
            .map(|a| AggregateExpr { distinct: false, ..a.clone() })
            .collect();

        let first_tuple = desc_tbl.create_tuple(None);
        let mut first = Self::create_phase(first_grouping.clone(), first_aggs, first_tuple, desc_tbl)?;
        let first_slots: Vec<ColumnExpr> = desc_tbl
            .slots_for_tuple(first_tuple)?
            .map(|s| s.column_expr())
            .collect();

        // Second phase: group by keys only, reading everything from the first
        // phase output.
        let second_grouping = first_slots[..grouping_exprs.len()]
            .iter()
            .map(|c| Expression::Column(c.clone()))
            .collect();

        let mut non_distinct_idx = first_grouping.len();
        let mut second_aggs = Vec::with_capacity(aggregate_exprs.len());
        for agg in &aggregate_exprs {
            if agg.is_distinct() {
                // Apply the function directly to the deduplicated args.
                let inputs = agg
                    .inputs
                    .iter()
                    .map(|input| {
                        let pos = first_grouping
                            .iter()
                            .position(|e| e == input)
                            .unwrap_or_default();
                        Expression::Column(first_slots[pos].clone())
                    })
                    .collect();
                second_aggs.push(AggregateExpr::new(agg.function, inputs, false));
            } else {
                second_aggs.push(agg.merge_expr(first_slots[non_distinct_idx].clone()));
                non_distinct_idx += 1;
            }
        }

        let second_tuple = desc_tbl.create_tuple(None);
        let second = Self::create_phase(second_grouping, second_aggs, second_tuple, desc_tbl)?;
        first.second_phase = Some(Box::new(second));

        Ok(first)
    }

    /// Create a single phase aggregation writing into an existing tuple.
    ///
    /// Used for deduplicating UNION DISTINCT, where the aggregation produces
    /// the union's own tuple. The tuple must either have no slots yet, or
    /// exactly one slot per output expression.
    pub fn create_with_output_tuple(
        grouping_exprs: Vec<Expression>,
        aggregate_exprs: Vec<AggregateExpr>,
        output_tuple: TupleId,
        desc_tbl: &mut DescriptorTable,
    ) -> Result<Self> {
        Self::create_phase(grouping_exprs, aggregate_exprs, output_tuple, desc_tbl)
    }

    fn create_phase(
        grouping_exprs: Vec<Expression>,
        aggregate_exprs: Vec<AggregateExpr>,
        output_tuple: TupleId,
        desc_tbl: &mut DescriptorTable,
    ) -> Result<Self> {
        let num_outputs = grouping_exprs.len() + aggregate_exprs.len();
        let existing = desc_tbl.tuple(output_tuple)?.slots.len();

        if existing == 0 {
            for expr in &grouping_exprs {
                desc_tbl.add_slot(output_tuple, expr.to_string(), expr.datatype(), None)?;
            }
            for agg in &aggregate_exprs {
                desc_tbl.add_slot(output_tuple, agg.to_string(), agg.return_type, None)?;
            }
        } else if existing != num_outputs {
            return Err(internal!(
                "Aggregate output tuple {output_tuple} has {existing} slots, expected {num_outputs}"
            ));
        }

        let slots: Vec<ColumnExpr> = desc_tbl
            .slots_for_tuple(output_tuple)?
            .map(|s| s.column_expr())
            .collect();

        let merge = AggregateInfo {
            grouping_exprs: slots[..grouping_exprs.len()]
                .iter()
                .map(|c| Expression::Column(c.clone()))
                .collect(),
            aggregate_exprs: aggregate_exprs
                .iter()
                .zip(&slots[grouping_exprs.len()..])
                .map(|(agg, slot)| agg.merge_expr(slot.clone()))
                .collect(),
            output_tuple,
            merge_info: None,
            second_phase: None,
        };

        Ok(AggregateInfo {
            grouping_exprs,
            aggregate_exprs,
            output_tuple,
            merge_info: Some(Box::new(merge)),
            second_phase: None,
        })
    }

    pub fn is_distinct_agg(&self) -> bool {
        self.second_phase.is_some()
    }

    pub fn is_grouped(&self) -> bool {
        !self.grouping_exprs.is_empty()
    }

    /// The phase producing the final output.
    pub fn final_phase(&self) -> &AggregateInfo {
        match &self.second_phase {
            Some(second) => second,
            None => self,
        }
    }

    /// Columns of the final output, grouping columns first.
    pub fn output_columns(&self, desc_tbl: &DescriptorTable) -> Result<Vec<ColumnExpr>> {
        Ok(desc_tbl
            .slots_for_tuple(self.final_phase().output_tuple)?
            .map(|s| s.column_expr())
            .collect())
    }
}
