pub mod aggregate_expr;
pub mod column_expr;
pub mod comparison_expr;
pub mod conjunction_expr;
pub mod literal_expr;
pub mod scalar_function_expr;

use std::collections::BTreeSet;
use std::fmt;

use aggregate_expr::AggregateExpr;
pub use column_expr::ColumnExpr;
use comparison_expr::{ComparisonExpr, ComparisonOperator};
use conjunction_expr::{ConjunctionExpr, ConjunctionOperator};
use literal_expr::{LiteralExpr, ScalarValue};
use scalar_function_expr::ScalarFunctionExpr;
use serde::{Deserialize, Serialize};

use crate::datatype::DataType;
use crate::ids::{SlotId, TupleId};

/// A typed, fully resolved expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Column(ColumnExpr),
    Literal(LiteralExpr),
    Comparison(ComparisonExpr),
    Conjunction(ConjunctionExpr),
    ScalarFunction(ScalarFunctionExpr),
    Aggregate(AggregateExpr),
}

impl Expression {
    pub fn datatype(&self) -> DataType {
        match self {
            Self::Column(col) => col.datatype,
            Self::Literal(lit) => lit.literal.datatype(),
            Self::Comparison(_) | Self::Conjunction(_) => DataType::Boolean,
            Self::ScalarFunction(func) => func.return_type,
            Self::Aggregate(agg) => agg.return_type,
        }
    }

    /// Visit the direct children of this expression.
    pub fn for_each_child<'a, F>(&'a self, func: &mut F)
    where
        F: FnMut(&'a Expression),
    {
        match self {
            Self::Column(_) | Self::Literal(_) => (),
            Self::Comparison(cmp) => {
                func(&cmp.left);
                func(&cmp.right);
            }
            Self::Conjunction(conj) => conj.expressions.iter().for_each(func),
            Self::ScalarFunction(f) => f.inputs.iter().for_each(func),
            Self::Aggregate(agg) => agg.inputs.iter().for_each(func),
        }
    }

    /// Visit every column reference in this expression.
    pub fn for_each_column<'a, F>(&'a self, func: &mut F)
    where
        F: FnMut(&'a ColumnExpr),
    {
        match self {
            Self::Column(col) => func(col),
            other => other.for_each_child(&mut |child| child.for_each_column(func)),
        }
    }

    /// If this expression can be evaluated without any input row.
    pub fn is_constant(&self) -> bool {
        match self {
            Self::Column(_) | Self::Aggregate(_) => false,
            Self::Literal(_) => true,
            other => {
                let mut constant = true;
                other.for_each_child(&mut |child| constant &= child.is_constant());
                constant
            }
        }
    }

    /// Tuples referenced by this expression.
    pub fn tuple_ids(&self) -> BTreeSet<TupleId> {
        let mut ids = BTreeSet::new();
        self.for_each_column(&mut |col| {
            ids.insert(col.tuple_id);
        });
        ids
    }

    /// Slots referenced by this expression.
    pub fn slot_ids(&self) -> BTreeSet<SlotId> {
        let mut ids = BTreeSet::new();
        self.for_each_column(&mut |col| {
            ids.insert(col.slot_id);
        });
        ids
    }

    /// If every column referenced by this expression belongs to one of the
    /// given tuples.
    pub fn is_bound_by(&self, tuple_ids: &[TupleId]) -> bool {
        let mut bound = true;
        self.for_each_column(&mut |col| bound &= tuple_ids.contains(&col.tuple_id));
        bound
    }

    pub fn is_bound_by_slots(&self, slot_ids: &[SlotId]) -> bool {
        let mut bound = true;
        self.for_each_column(&mut |col| bound &= slot_ids.contains(&col.slot_id));
        bound
    }

    /// Return the two sides of this expression if it's an equality comparison.
    pub fn as_equality(&self) -> Option<(&Expression, &Expression)> {
        match self {
            Self::Comparison(ComparisonExpr {
                left,
                right,
                op: ComparisonOperator::Eq,
            }) => Some((left, right)),
            _ => None,
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        match self {
            Self::Aggregate(_) => true,
            other => {
                let mut contains = false;
                other.for_each_child(&mut |child| contains |= child.contains_aggregate());
                contains
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(e) => write!(f, "{e}"),
            Self::Literal(e) => write!(f, "{e}"),
            Self::Comparison(e) => write!(f, "{e}"),
            Self::Conjunction(e) => write!(f, "{e}"),
            Self::ScalarFunction(e) => write!(f, "{e}"),
            Self::Aggregate(e) => write!(f, "{e}"),
        }
    }
}

/// Wrapper for displaying a list of expressions separated by commas.
#[derive(Debug)]
pub struct DisplayExprs<'a>(pub &'a [Expression]);

impl fmt::Display for DisplayExprs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, expr) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{expr}")?;
        }
        Ok(())
    }
}

pub fn lit(scalar: impl Into<ScalarValue>) -> Expression {
    Expression::Literal(LiteralExpr {
        literal: scalar.into(),
    })
}

pub fn column(col: &ColumnExpr) -> Expression {
    Expression::Column(col.clone())
}

pub fn compare(op: ComparisonOperator, left: Expression, right: Expression) -> Expression {
    Expression::Comparison(ComparisonExpr {
        left: Box::new(left),
        right: Box::new(right),
        op,
    })
}

pub fn eq(left: Expression, right: Expression) -> Expression {
    compare(ComparisonOperator::Eq, left, right)
}

pub fn and(exprs: impl IntoIterator<Item = Expression>) -> Expression {
    Expression::Conjunction(ConjunctionExpr {
        op: ConjunctionOperator::And,
        expressions: exprs.into_iter().collect(),
    })
}

pub fn or(exprs: impl IntoIterator<Item = Expression>) -> Expression {
    Expression::Conjunction(ConjunctionExpr {
        op: ConjunctionOperator::Or,
        expressions: exprs.into_iter().collect(),
    })
}

pub fn scalar_function(
    name: impl Into<String>,
    inputs: Vec<Expression>,
    return_type: DataType,
) -> Expression {
    Expression::ScalarFunction(ScalarFunctionExpr {
        name: name.into(),
        inputs,
        return_type,
    })
}
