use std::fmt;

use serde::{Deserialize, Serialize};

use crate::datatype::DataType;
use crate::ids::{SlotId, TupleId};

/// Reference to a slot in a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnExpr {
    /// Tuple containing the slot.
    pub tuple_id: TupleId,
    /// The slot being referenced.
    pub slot_id: SlotId,
    pub datatype: DataType,
    /// Label used when displaying the column, e.g. "alltypes.int_col".
    pub label: String,
}

impl ColumnExpr {
    pub fn new(
        tuple_id: TupleId,
        slot_id: SlotId,
        datatype: DataType,
        label: impl Into<String>,
    ) -> Self {
        ColumnExpr {
            tuple_id,
            slot_id,
            datatype,
            label: label.into(),
        }
    }
}

impl fmt::Display for ColumnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            write!(f, "#{}.{}", self.tuple_id, self.slot_id)
        } else {
            write!(f, "{}", self.label)
        }
    }
}
