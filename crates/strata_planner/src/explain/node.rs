use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::explainable::{ExplainConfig, ExplainEntry, Explainable};
use crate::analysis::descriptor::DescriptorTable;
use crate::plan::PlanNode;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExplainNode {
    pub entry: ExplainEntry,
    pub children: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Build the explain tree for a plan.
    ///
    /// Verbose output lists the materialized slots of every scan.
    pub fn walk(config: ExplainConfig, plan: &PlanNode, desc_tbl: &DescriptorTable) -> Self {
        let mut entry = plan.explain_entry(config);
        if let (true, PlanNode::Scan(scan)) = (config.verbose, plan) {
            if let Ok(slots) = desc_tbl.materialized_slots(scan.node.tuple_id) {
                entry = entry.with_values("materialized", slots.iter().map(|s| &s.label));
            }
        }

        let children = plan
            .children()
            .iter()
            .map(|child| Self::walk(config, child, desc_tbl))
            .collect();

        ExplainNode { entry, children }
    }

    /// Write one line per node, children indented two more spaces than
    /// their parent.
    pub fn write_indented(&self, out: &mut String, indent: usize) {
        let _ = writeln!(out, "{:indent$}{}", "", self.entry);
        for child in &self.children {
            child.write_indented(out, indent + 2);
        }
    }
}
