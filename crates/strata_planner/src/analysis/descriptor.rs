use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_error::{DbError, Result, internal};

use super::table::TableDescriptor;
use crate::datatype::DataType;
use crate::expr::ColumnExpr;
use crate::ids::{SlotId, TupleId};

/// Location of the null bit for a nullable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullIndicator {
    pub byte_offset: usize,
    pub bit_mask: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDescriptor {
    pub id: SlotId,
    pub parent: TupleId,
    pub datatype: DataType,
    /// Position of the column in the parent's table, for slots of base table
    /// tuples.
    pub column_pos: Option<usize>,
    pub label: String,
    pub nullable: bool,
    /// Set by slot materialization.
    pub is_materialized: bool,
    /// Set when the memory layout is computed. Only materialized slots get a
    /// layout.
    pub byte_offset: Option<usize>,
    pub null_indicator: Option<NullIndicator>,
}

impl SlotDescriptor {
    pub fn column_expr(&self) -> ColumnExpr {
        ColumnExpr::new(self.parent, self.id, self.datatype, self.label.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleDescriptor {
    pub id: TupleId,
    /// Table this tuple is read from, None for tuples produced by
    /// aggregations and unions.
    pub table: Option<Arc<TableDescriptor>>,
    pub slots: Vec<SlotId>,
    pub byte_size: usize,
    pub num_null_bytes: usize,
}

/// All tuple and slot descriptors of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptorTable {
    tuples: BTreeMap<TupleId, TupleDescriptor>,
    slots: BTreeMap<SlotId, SlotDescriptor>,
    layout_computed: bool,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_tuple(&mut self, table: Option<Arc<TableDescriptor>>) -> TupleId {
        let id = TupleId(self.tuples.len());
        self.tuples.insert(
            id,
            TupleDescriptor {
                id,
                table,
                slots: Vec::new(),
                byte_size: 0,
                num_null_bytes: 0,
            },
        );
        id
    }

    /// Add a nullable slot to a tuple.
    pub fn add_slot(
        &mut self,
        tuple_id: TupleId,
        label: impl Into<String>,
        datatype: DataType,
        column_pos: Option<usize>,
    ) -> Result<SlotId> {
        if self.layout_computed {
            return Err(internal!("Cannot add slots after the memory layout is computed"));
        }

        let id = SlotId(self.slots.len());
        let tuple = self
            .tuples
            .get_mut(&tuple_id)
            .ok_or_else(|| internal!("Missing tuple descriptor {tuple_id}"))?;
        tuple.slots.push(id);

        self.slots.insert(
            id,
            SlotDescriptor {
                id,
                parent: tuple_id,
                datatype,
                column_pos,
                label: label.into(),
                nullable: true,
                is_materialized: false,
                byte_offset: None,
                null_indicator: None,
            },
        );

        Ok(id)
    }

    pub fn tuple(&self, id: TupleId) -> Result<&TupleDescriptor> {
        self.tuples
            .get(&id)
            .ok_or_else(|| internal!("Missing tuple descriptor {id}"))
    }

    pub fn slot(&self, id: SlotId) -> Result<&SlotDescriptor> {
        self.slots
            .get(&id)
            .ok_or_else(|| internal!("Missing slot descriptor {id}"))
    }

    pub fn tuples(&self) -> impl Iterator<Item = &TupleDescriptor> {
        self.tuples.values()
    }

    pub fn slots_for_tuple(&self, id: TupleId) -> Result<impl Iterator<Item = &SlotDescriptor>> {
        let tuple = self.tuple(id)?;
        Ok(tuple.slots.iter().filter_map(|slot| self.slots.get(slot)))
    }

    /// Find the slot holding the column at `column_pos` of a base table tuple.
    pub fn slot_for_column(&self, tuple_id: TupleId, column_pos: usize) -> Option<SlotId> {
        let tuple = self.tuples.get(&tuple_id)?;
        tuple.slots.iter().copied().find(|slot| {
            self.slots
                .get(slot)
                .is_some_and(|s| s.column_pos == Some(column_pos))
        })
    }

    pub fn column_expr(&self, slot: SlotId) -> Result<ColumnExpr> {
        Ok(self.slot(slot)?.column_expr())
    }

    pub fn is_layout_computed(&self) -> bool {
        self.layout_computed
    }

    /// Mark a slot as needing to be materialized.
    ///
    /// Errors if the memory layout has already been computed.
    pub fn mark_materialized(&mut self, id: SlotId) -> Result<()> {
        if self.layout_computed {
            return Err(internal!(
                "Cannot mark slot {id} as materialized after the memory layout is computed"
            ));
        }
        let slot = self
            .slots
            .get_mut(&id)
            .ok_or_else(|| internal!("Missing slot descriptor {id}"))?;
        slot.is_materialized = true;
        Ok(())
    }

    pub fn materialized_slots(&self, tuple_id: TupleId) -> Result<Vec<&SlotDescriptor>> {
        Ok(self
            .slots_for_tuple(tuple_id)?
            .filter(|s| s.is_materialized)
            .collect())
    }

    /// Compute byte offsets and null indicators for every materialized slot.
    ///
    /// Null indicator bytes come first, followed by slots ordered by
    /// descending size so that every slot is naturally aligned. May only be
    /// called once.
    pub fn compute_mem_layout(&mut self) -> Result<()> {
        if self.layout_computed {
            return Err(DbError::internal("Memory layout already computed"));
        }

        for tuple in self.tuples.values_mut() {
            let mut materialized: Vec<&mut SlotDescriptor> = self
                .slots
                .values_mut()
                .filter(|s| s.parent == tuple.id && s.is_materialized)
                .collect();

            let num_nullable = materialized.iter().filter(|s| s.nullable).count();
            let num_null_bytes = num_nullable.div_ceil(8);

            let mut null_idx = 0;
            for slot in materialized.iter_mut().filter(|s| s.nullable) {
                slot.null_indicator = Some(NullIndicator {
                    byte_offset: null_idx / 8,
                    bit_mask: 1 << (null_idx % 8),
                });
                null_idx += 1;
            }

            // Stable sort keeps slot id order within a size class.
            materialized.sort_by_key(|s| std::cmp::Reverse(s.datatype.slot_size()));

            let mut offset = num_null_bytes;
            for slot in materialized {
                let align = slot.datatype.slot_size().min(8);
                offset = offset.next_multiple_of(align);
                slot.byte_offset = Some(offset);
                offset += slot.datatype.slot_size();
            }

            tuple.num_null_bytes = num_null_bytes;
            tuple.byte_size = offset;
        }

        self.layout_computed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_slots() -> (DescriptorTable, TupleId, Vec<SlotId>) {
        let mut desc_tbl = DescriptorTable::new();
        let tuple = desc_tbl.create_tuple(None);
        let slots = vec![
            desc_tbl.add_slot(tuple, "a", DataType::Boolean, None).unwrap(),
            desc_tbl.add_slot(tuple, "b", DataType::Int64, None).unwrap(),
            desc_tbl.add_slot(tuple, "c", DataType::Utf8, None).unwrap(),
            desc_tbl.add_slot(tuple, "d", DataType::Int32, None).unwrap(),
        ];
        (desc_tbl, tuple, slots)
    }

    #[test]
    fn layout_only_materialized_slots() {
        let (mut desc_tbl, tuple, slots) = table_with_slots();
        desc_tbl.mark_materialized(slots[0]).unwrap();
        desc_tbl.mark_materialized(slots[1]).unwrap();
        desc_tbl.mark_materialized(slots[2]).unwrap();

        desc_tbl.compute_mem_layout().unwrap();

        // 1 null byte, then string (16), bigint (8), bool (1).
        assert_eq!(Some(8), desc_tbl.slot(slots[2]).unwrap().byte_offset);
        assert_eq!(Some(24), desc_tbl.slot(slots[1]).unwrap().byte_offset);
        assert_eq!(Some(32), desc_tbl.slot(slots[0]).unwrap().byte_offset);
        assert_eq!(None, desc_tbl.slot(slots[3]).unwrap().byte_offset);

        let tuple = desc_tbl.tuple(tuple).unwrap();
        assert_eq!(1, tuple.num_null_bytes);
        assert_eq!(33, tuple.byte_size);
    }

    #[test]
    fn mark_after_layout_errors() {
        let (mut desc_tbl, _, slots) = table_with_slots();
        desc_tbl.compute_mem_layout().unwrap();

        let err = desc_tbl.mark_materialized(slots[0]).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn layout_computed_once() {
        let (mut desc_tbl, _, _) = table_with_slots();
        desc_tbl.compute_mem_layout().unwrap();
        desc_tbl.compute_mem_layout().unwrap_err();
    }

    #[test]
    fn null_indicators_assigned_in_slot_order() {
        let (mut desc_tbl, _, slots) = table_with_slots();
        for slot in &slots {
            desc_tbl.mark_materialized(*slot).unwrap();
        }
        desc_tbl.compute_mem_layout().unwrap();

        let ind = desc_tbl.slot(slots[3]).unwrap().null_indicator.unwrap();
        assert_eq!(0, ind.byte_offset);
        assert_eq!(1 << 3, ind.bit_mask);
    }
}
