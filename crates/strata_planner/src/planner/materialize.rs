use std::collections::BTreeSet;

use strata_error::Result;
use tracing::debug;

use crate::analysis::descriptor::DescriptorTable;
use crate::expr::Expression;
use crate::fragment::{DataPartition, DataSink, FragmentedPlan, OutputPartition};
use crate::ids::{SlotId, TupleId};
use crate::plan::PlanNode;

/// Mark every slot the fragments read or write as materialized.
///
/// Aggregations and merges write every slot of their output tuple, so those
/// are materialized even if nothing reads them.
pub fn materialize_slots(
    plan: &FragmentedPlan,
    result_exprs: &[Expression],
    desc_tbl: &mut DescriptorTable,
) -> Result<()> {
    let mut slots = BTreeSet::new();
    let mut written_tuples = BTreeSet::new();

    for expr in result_exprs {
        slots.extend(expr.slot_ids());
    }

    for fragment in &plan.fragments {
        for expr in &fragment.output_exprs {
            slots.extend(expr.slot_ids());
        }
        if let DataPartition::HashPartitioned(exprs) = &fragment.partition {
            for expr in exprs {
                slots.extend(expr.slot_ids());
            }
        }
        if let Some(DataSink::Stream {
            output_partition: OutputPartition::HashPartitioned(exprs),
            ..
        }) = &fragment.sink
        {
            for expr in exprs {
                slots.extend(expr.slot_ids());
            }
        }

        if let Some(root) = &fragment.root {
            root.for_each_node(&mut |node| {
                node.for_each_expr(&mut |expr| slots.extend(expr.slot_ids()));
                match node {
                    PlanNode::Aggregate(agg) => {
                        written_tuples.insert(agg.node.agg_info.output_tuple);
                    }
                    PlanNode::Merge(merge) => {
                        written_tuples.insert(merge.node.tuple_id);
                    }
                    _ => (),
                }
                Ok(())
            })?;
        }
    }

    for tuple_id in &written_tuples {
        slots.extend(tuple_slots(desc_tbl, *tuple_id)?);
    }

    debug!(
        num_slots = slots.len(),
        num_written_tuples = written_tuples.len(),
        "materializing slots"
    );

    for slot in slots {
        desc_tbl.mark_materialized(slot)?;
    }

    Ok(())
}

fn tuple_slots(desc_tbl: &DescriptorTable, tuple_id: TupleId) -> Result<Vec<SlotId>> {
    Ok(desc_tbl.tuple(tuple_id)?.slots.clone())
}
