use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::Expression;
use crate::expr::literal_expr::ScalarValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    /// Constant expression.
    pub expr: Expression,
    pub inclusive: bool,
}

impl Bound {
    /// Return the bound's value if it's a literal.
    pub fn literal(&self) -> Option<&ScalarValue> {
        match &self.expr {
            Expression::Literal(lit) => Some(&lit.literal),
            _ => None,
        }
    }
}

/// Range of values for a single clustering column, derived from constant
/// comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueRange {
    Eq(Expression),
    Bounded {
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
}

impl ValueRange {
    pub fn is_eq(&self) -> bool {
        matches!(self, Self::Eq(_))
    }

    /// Check if a value falls within this range.
    ///
    /// Returns `None` if a bound isn't a literal, or isn't comparable to the
    /// value.
    pub fn contains(&self, value: &ScalarValue) -> Option<bool> {
        match self {
            Self::Eq(Expression::Literal(lit)) => {
                Some(value.compare(&lit.literal)? == Ordering::Equal)
            }
            Self::Eq(_) => None,
            Self::Bounded { lower, upper } => {
                if let Some(lower) = lower {
                    let ord = value.compare(lower.literal()?)?;
                    let ok = ord == Ordering::Greater || (lower.inclusive && ord == Ordering::Equal);
                    if !ok {
                        return Some(false);
                    }
                }
                if let Some(upper) = upper {
                    let ord = value.compare(upper.literal()?)?;
                    let ok = ord == Ordering::Less || (upper.inclusive && ord == Ordering::Equal);
                    if !ok {
                        return Some(false);
                    }
                }
                Some(true)
            }
        }
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq(expr) => write!(f, "= {expr}"),
            Self::Bounded { lower, upper } => {
                match lower {
                    Some(b) if b.inclusive => write!(f, "[{}", b.expr)?,
                    Some(b) => write!(f, "({}", b.expr)?,
                    None => write!(f, "(-inf")?,
                }
                write!(f, ", ")?;
                match upper {
                    Some(b) if b.inclusive => write!(f, "{}]", b.expr),
                    Some(b) => write!(f, "{})", b.expr),
                    None => write!(f, "+inf)"),
                }
            }
        }
    }
}
