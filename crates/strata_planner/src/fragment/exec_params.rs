//! Per-instance execution parameters of fragments.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strata_error::{Result, internal};
use tracing::debug;

use super::{DataSink, FragmentedPlan, PlanFragment};
use crate::config::PlannerConfig;
use crate::ids::PlanNodeId;
use crate::plan::PlanNode;
use crate::plan::scan::ScanNode;
use crate::plan::Node;
use crate::storage::{ExecHost, HostPort, HostScanRange, ScanRange, ScanRangeProvider};

/// Scan ranges one instance reads for a single scan node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeScanRanges {
    pub node_id: PlanNodeId,
    pub ranges: Vec<ScanRange>,
}

/// Parameters of a single instance of a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanExecParams {
    pub host: ExecHost,
    pub scan_ranges: Vec<NodeScanRanges>,
    /// Hosts of the instances receiving this instance's output.
    pub destinations: Vec<ExecHost>,
}

impl PlanExecParams {
    fn new(host: ExecHost) -> Self {
        PlanExecParams {
            host,
            scan_ranges: Vec::new(),
            destinations: Vec::new(),
        }
    }

    pub fn has_scan_ranges(&self) -> bool {
        self.scan_ranges.iter().any(|s| !s.ranges.is_empty())
    }
}

/// Compute the instances of every fragment, indexed like the fragments.
///
/// Also sets `num_senders` on every exchange node.
pub fn compute_exec_params(
    plan: &mut FragmentedPlan,
    storage: &dyn ScanRangeProvider,
    config: &PlannerConfig,
) -> Result<Vec<Vec<PlanExecParams>>> {
    let mut instances: Vec<Option<Vec<PlanExecParams>>> = vec![None; plan.fragments.len()];

    // Fragments driven by a scan first, their hosts decide where everything
    // else runs.
    for (idx, fragment) in plan.fragments.iter().enumerate() {
        let Some(leftmost) = fragment.leftmost_scan() else {
            continue;
        };
        let is_coordinator = plan.has_coordinator_fragment && idx == 0;
        let num_partitions = if is_coordinator || fragment.is_unpartitioned() {
            1
        } else {
            config.num_partitions()
        };

        let assignments = storage.scan_ranges(
            &leftmost.node.table,
            &leftmost.node.key_ranges,
            config.max_scan_range_length,
            num_partitions,
        )?;

        let mut fragment_instances: Vec<_> = assignments
            .into_iter()
            .map(|assignment| {
                let host = if is_coordinator {
                    ExecHost::Coordinator
                } else {
                    ExecHost::Worker(assignment.host)
                };
                let mut params = PlanExecParams::new(host);
                params.scan_ranges.push(NodeScanRanges {
                    node_id: leftmost.id,
                    ranges: assignment.ranges,
                });
                params
            })
            .collect();

        if fragment_instances.is_empty() {
            let host = if is_coordinator {
                ExecHost::Coordinator
            } else {
                ExecHost::Worker(HostPort::placeholder())
            };
            fragment_instances.push(PlanExecParams::new(host));
        }

        add_replicated_scans(fragment, Some(leftmost.id), storage, config, &mut fragment_instances)?;
        instances[idx] = Some(fragment_instances);
    }

    let worker_hosts: BTreeSet<HostPort> = instances
        .iter()
        .flatten()
        .flatten()
        .filter_map(|params| match &params.host {
            ExecHost::Worker(host) => Some(host.clone()),
            ExecHost::Coordinator => None,
        })
        .collect();

    for (idx, fragment) in plan.fragments.iter().enumerate() {
        if instances[idx].is_some() {
            continue;
        }

        let mut fragment_instances = if plan.has_coordinator_fragment && idx == 0 {
            vec![PlanExecParams::new(ExecHost::Coordinator)]
        } else if fragment.is_unpartitioned() {
            let host = worker_hosts
                .first()
                .cloned()
                .unwrap_or_else(HostPort::placeholder);
            vec![PlanExecParams::new(ExecHost::Worker(host))]
        } else if worker_hosts.is_empty() {
            vec![PlanExecParams::new(ExecHost::Worker(HostPort::placeholder()))]
        } else {
            worker_hosts
                .iter()
                .map(|host| PlanExecParams::new(ExecHost::Worker(host.clone())))
                .collect()
        };

        add_replicated_scans(fragment, None, storage, config, &mut fragment_instances)?;
        instances[idx] = Some(fragment_instances);
    }

    let mut instances = instances
        .into_iter()
        .enumerate()
        .map(|(idx, params)| params.ok_or_else(|| internal!("Missing exec params for fragment {idx}")))
        .collect::<Result<Vec<_>>>()?;

    connect_senders(plan, &mut instances)?;

    debug!(
        instances = ?instances.iter().map(|i| i.len()).collect::<Vec<_>>(),
        "computed exec params"
    );

    Ok(instances)
}

/// Every scan besides the one driving the fragment reads all of its ranges
/// in every instance.
fn add_replicated_scans(
    fragment: &PlanFragment,
    driving_scan: Option<PlanNodeId>,
    storage: &dyn ScanRangeProvider,
    config: &PlannerConfig,
    instances: &mut [PlanExecParams],
) -> Result<()> {
    let scans: Vec<&Node<ScanNode>> = fragment
        .scan_nodes()
        .into_iter()
        .filter(|scan| Some(scan.id) != driving_scan)
        .collect();

    for scan in scans {
        let assignments =
            storage.scan_ranges(&scan.node.table, &scan.node.key_ranges, config.max_scan_range_length, 1)?;
        let ranges: Vec<ScanRange> = assignments
            .into_iter()
            .flat_map(|HostScanRange { ranges, .. }| ranges)
            .collect();
        if ranges.is_empty() {
            continue;
        }
        for params in instances.iter_mut() {
            params.scan_ranges.push(NodeScanRanges {
                node_id: scan.id,
                ranges: ranges.clone(),
            });
        }
    }

    Ok(())
}

/// Set the sender count of every exchange and the destinations of every
/// streaming instance.
fn connect_senders(plan: &mut FragmentedPlan, instances: &mut [Vec<PlanExecParams>]) -> Result<()> {
    for idx in 0..plan.fragments.len() {
        let Some(DataSink::Stream {
            exchange_id,
            dest_fragment,
            ..
        }) = plan.fragments[idx].sink.clone()
        else {
            continue;
        };

        let num_senders = instances[idx].len();
        let destinations: Vec<ExecHost> = instances
            .get(dest_fragment.0)
            .ok_or_else(|| internal!("Missing destination fragment {dest_fragment}"))?
            .iter()
            .map(|params| params.host.clone())
            .collect();

        let dest_root = plan.fragments[dest_fragment.0]
            .root
            .as_mut()
            .ok_or_else(|| internal!("Destination fragment {dest_fragment} has no plan"))?;
        let mut found = false;
        dest_root.for_each_node_mut(&mut |node| {
            if let PlanNode::Exchange(exchange) = node {
                if exchange.id == exchange_id {
                    exchange.node.num_senders = num_senders;
                    found = true;
                }
            }
        });
        if !found {
            return Err(internal!(
                "Exchange {exchange_id} not found in fragment {dest_fragment}"
            ));
        }

        for params in instances[idx].iter_mut() {
            params.destinations = destinations.clone();
        }
    }

    Ok(())
}
