use std::fmt;

use serde::{Deserialize, Serialize};

use super::Expression;
use super::column_expr::ColumnExpr;
use crate::datatype::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// `count(*)` when there are no inputs.
    Count,
    Sum,
    Min,
    Max,
}

impl AggregateFunction {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    /// Function that combines partial results of this function.
    pub const fn merge_function(&self) -> AggregateFunction {
        match self {
            Self::Count | Self::Sum => Self::Sum,
            Self::Min => Self::Min,
            Self::Max => Self::Max,
        }
    }

    /// If DISTINCT changes the result of this function.
    ///
    /// `min(DISTINCT x)` is the same as `min(x)`.
    pub const fn is_distinct_sensitive(&self) -> bool {
        matches!(self, Self::Count | Self::Sum)
    }

    fn return_type(&self, inputs: &[Expression]) -> DataType {
        match self {
            Self::Count => DataType::Int64,
            Self::Sum => match inputs.first().map(|e| e.datatype()) {
                Some(dt) if dt.is_float() => DataType::Float64,
                _ => DataType::Int64,
            },
            Self::Min | Self::Max => inputs
                .first()
                .map(|e| e.datatype())
                .unwrap_or(DataType::Null),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateExpr {
    pub function: AggregateFunction,
    pub inputs: Vec<Expression>,
    pub distinct: bool,
    pub return_type: DataType,
}

impl AggregateExpr {
    pub fn new(function: AggregateFunction, inputs: Vec<Expression>, distinct: bool) -> Self {
        let return_type = function.return_type(&inputs);
        AggregateExpr {
            function,
            inputs,
            distinct,
            return_type,
        }
    }

    /// If this aggregate needs distinct handling.
    ///
    /// DISTINCT is ignored for functions where it has no effect.
    pub fn is_distinct(&self) -> bool {
        self.distinct && self.function.is_distinct_sensitive()
    }

    /// Create the aggregate that combines partial results of this aggregate
    /// read from `partial`.
    ///
    /// `count(x)` => `sum(partial)`, `min(x)` => `min(partial)`
    pub fn merge_expr(&self, partial: ColumnExpr) -> AggregateExpr {
        AggregateExpr {
            function: self.function.merge_function(),
            inputs: vec![Expression::Column(partial)],
            distinct: false,
            return_type: self.return_type,
        }
    }
}

impl fmt::Display for AggregateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.function)?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        if self.inputs.is_empty() {
            write!(f, "*")?;
        }
        for (idx, input) in self.inputs.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{input}")?;
        }
        write!(f, ")")
    }
}
