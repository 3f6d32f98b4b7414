use std::fmt;

use serde::{Deserialize, Serialize};

use super::Expression;
use crate::ids::SlotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl ComparisonOperator {
    /// Return the operator to use when the sides of the comparison are
    /// swapped.
    ///
    /// `a < b` => `b > a`
    pub const fn flip(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::NotEq => Self::NotEq,
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::NotEq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonExpr {
    pub left: Box<Expression>,
    pub right: Box<Expression>,
    pub op: ComparisonOperator,
}

impl ComparisonExpr {
    /// If one side of this comparison is a direct reference to `slot`, return
    /// the expression on the other side along with the operator normalized so
    /// that the slot is on the left.
    ///
    /// `5 < col` with `col` as the slot returns `(>, 5)`.
    pub fn slot_binding(&self, slot: SlotId) -> Option<(ComparisonOperator, &Expression)> {
        match (self.left.as_ref(), self.right.as_ref()) {
            (Expression::Column(col), other) if col.slot_id == slot => Some((self.op, other)),
            (other, Expression::Column(col)) if col.slot_id == slot => {
                Some((self.op.flip(), other))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ComparisonExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}
