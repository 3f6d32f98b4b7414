use std::fmt;

use serde::{Deserialize, Serialize};

use super::Expression;
use crate::datatype::DataType;

/// A resolved scalar function call (including arithmetic and casts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarFunctionExpr {
    pub name: String,
    pub inputs: Vec<Expression>,
    pub return_type: DataType,
}

impl fmt::Display for ScalarFunctionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (idx, input) in self.inputs.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{input}")?;
        }
        write!(f, ")")
    }
}
