//! Human readable rendering of fragmented plans.

pub mod explainable;
pub mod node;

use std::fmt::Write as _;

use explainable::{ExplainConfig, ExplainEntry, Explainable};
use node::ExplainNode;

use crate::analysis::descriptor::DescriptorTable;
use crate::config::ExplainLevel;
use crate::fragment::exec_params::{NodeScanRanges, PlanExecParams};
use crate::fragment::{FragmentedPlan, PlanFragment};
use crate::storage::{FileSplit, KeyRange, ScanRange};

/// Render every fragment followed by the scan ranges of its instances.
///
/// `exec_params` is indexed like the fragments.
pub fn explain_query(
    plan: &FragmentedPlan,
    exec_params: &[Vec<PlanExecParams>],
    desc_tbl: &DescriptorTable,
    level: ExplainLevel,
) -> String {
    let config = ExplainConfig {
        verbose: level == ExplainLevel::Verbose,
    };

    let mut out = String::new();
    if !plan.has_coordinator_fragment {
        out.push_str("NO COORDINATOR FRAGMENT\n");
    }

    for (idx, fragment) in plan.fragments.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        explain_fragment(&mut out, fragment, desc_tbl, config);

        let instances = exec_params.get(idx).map(Vec::as_slice).unwrap_or_default();
        if instances.iter().any(PlanExecParams::has_scan_ranges) {
            out.push_str("\n  EXEC PARAMS\n");
            for instance in instances {
                explain_instance(&mut out, instance, config);
            }
        }
    }

    out
}

fn explain_fragment(
    out: &mut String,
    fragment: &PlanFragment,
    desc_tbl: &DescriptorTable,
    config: ExplainConfig,
) {
    let _ = writeln!(out, "Plan Fragment {}", fragment.id);
    let _ = writeln!(out, "  {}", fragment.partition);
    if let Some(sink) = &fragment.sink {
        let _ = writeln!(out, "  {}", sink.explain_entry(config));
    }

    match &fragment.root {
        Some(root) => ExplainNode::walk(config, root, desc_tbl).write_indented(out, 2),
        None => {
            let ent = ExplainEntry::new("SELECT CONSTANT").with_values("exprs", &fragment.output_exprs);
            let _ = writeln!(out, "  {ent}");
        }
    }
}

fn explain_instance(out: &mut String, instance: &PlanExecParams, config: ExplainConfig) {
    let _ = writeln!(out, "    HOST: {}", instance.host);

    for node_ranges in &instance.scan_ranges {
        let NodeScanRanges { node_id, ranges } = node_ranges;

        let mut splits: Vec<&FileSplit> = Vec::new();
        let mut keys: Vec<&KeyRange> = Vec::new();
        for range in ranges {
            match range {
                ScanRange::File(split) => splits.push(split),
                ScanRange::Key(key) => keys.push(key),
            }
        }

        if !keys.is_empty() {
            keys.sort();
            let _ = writeln!(out, "      HBASE KEY RANGES NODE ID: {node_id}");
            for key in keys {
                let _ = writeln!(out, "        {key}");
            }
        }

        if !splits.is_empty() {
            if config.verbose {
                splits.sort();
                let _ = writeln!(out, "      HDFS SPLITS NODE ID: {node_id}");
                for split in splits {
                    let _ = writeln!(out, "        {} {}:{}", split.path, split.offset, split.length);
                }
            } else {
                let total: u64 = splits.iter().map(|s| s.length).sum();
                let _ = writeln!(out, "      HDFS SPLITS NODE ID: {node_id} TOTAL SIZE: {total}");
            }
        }
    }
}
