//! The dependency passes run on every structural mutation: prune, order,
//! cluster, split, validate. All of them operate on the scheduler's module
//! table and produce an [`ExecutionPlan`]; executor assembly happens in the
//! scheduler afterwards.

use crate::module_state::ModuleState;
use driftwave_core::{Device, FlowError, FlowResult};
use fixedbitset::FixedBitSet;
use log::trace;
use std::collections::{HashMap, HashSet};

/// Result of the dependency passes over the valid compute modules.
pub(crate) struct ExecutionPlan {
    /// Indices into the module table, in linear topological order with
    /// device-affine re-sorting applied.
    pub execution_order: Vec<usize>,
    /// Cluster id per ordered module.
    pub clusters: HashMap<usize, u64>,
    /// Contiguous runs sharing one device and one cluster.
    pub device_runs: Vec<(Device, Vec<usize>)>,
    /// Content hashes consumed by two or more modules after a branch while
    /// at least one of the consumers computes in place.
    pub conflicts: Vec<u64>,
}

/// Phase 1: promote ports referenced by at least two ends to the active
/// maps and mark modules with no active ports stale.
pub(crate) fn prune(modules: &mut [ModuleState]) {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for state in modules.iter() {
        for record in state.input_map.values().chain(state.output_map.values()) {
            *counts.entry(record.hash).or_insert(0) += 1;
        }
    }

    for state in modules.iter_mut() {
        state.active_inputs = state
            .input_map
            .iter()
            .filter(|(_, record)| counts[&record.hash] > 1)
            .map(|(pin, record)| (pin.clone(), record.clone()))
            .collect();
        state.active_outputs = state
            .output_map
            .iter()
            .filter(|(_, record)| counts[&record.hash] > 1)
            .map(|(pin, record)| (pin.clone(), record.clone()))
            .collect();
        state.stale = state.active_inputs.is_empty() && state.active_outputs.is_empty();
        if state.stale {
            trace!("module `{}` is stale after pruning", state.name);
        }
    }
}

/// Phases 2-5 over the pruned table.
pub(crate) fn solve(modules: &[ModuleState]) -> FlowResult<ExecutionPlan> {
    let valid: Vec<usize> = modules
        .iter()
        .enumerate()
        .filter(|(_, state)| state.is_compute())
        .map(|(index, _)| index)
        .collect();

    // An input record carries the locale of the port that produced it, so
    // one producer exists per locale hash by construction.
    let mut producer_of: HashMap<u64, usize> = HashMap::new();
    let mut consumers_of: HashMap<u64, Vec<usize>> = HashMap::new();
    for &index in &valid {
        for record in modules[index].active_outputs.values() {
            producer_of.insert(record.locale_hash(), index);
        }
    }
    for &index in &valid {
        for record in modules[index].active_inputs.values() {
            consumers_of
                .entry(record.locale_hash())
                .or_default()
                .push(index);
        }
    }

    let mut edges: HashMap<usize, HashSet<usize>> = HashMap::new();
    for (locale_hash, &producer) in &producer_of {
        let Some(consumers) = consumers_of.get(locale_hash) else {
            continue;
        };
        for &consumer in consumers {
            if consumer != producer {
                edges.entry(producer).or_default().insert(consumer);
                edges.entry(consumer).or_default().insert(producer);
            }
        }
    }

    // In-degree counts the active inputs whose producing port exists on a
    // valid module. A hash made active purely by self-aliasing or by
    // input-input sharing has no producer and must not leave its consumer
    // undrainable.
    let mut in_degree: HashMap<usize, usize> = HashMap::new();
    for &index in &valid {
        let degree = modules[index]
            .active_inputs
            .values()
            .filter(|record| producer_of.contains_key(&record.locale_hash()))
            .count();
        in_degree.insert(index, degree);
    }

    // Weakly-connected components by depth-first walk, ids assigned in
    // first-visit order over the registration order. Solved ahead of the
    // drain so the tie-breaking below can keep clusters contiguous.
    let mut clusters: HashMap<usize, u64> = HashMap::new();
    let mut visited = FixedBitSet::with_capacity(modules.len());
    let mut next_cluster = 0u64;
    for &seed in &valid {
        if visited.contains(seed) {
            continue;
        }
        let mut stack = vec![seed];
        while let Some(index) = stack.pop() {
            if visited.contains(index) {
                continue;
            }
            visited.insert(index);
            clusters.insert(index, next_cluster);
            if let Some(neighbors) = edges.get(&index) {
                stack.extend(neighbors.iter().copied().filter(|n| !visited.contains(*n)));
            }
        }
        next_cluster += 1;
    }

    // Kahn drain with affinity tie-breaking: stay on the current device and
    // cluster while anything there is ready, then settle for the device
    // alone, and otherwise leave the chain and adopt the next ready
    // module's device in the same iteration, so a non-empty ready set
    // always makes progress. Without the cluster preference two
    // independent same-device chains would interleave and shatter into one
    // executor per module.
    let mut ready: Vec<usize> = valid
        .iter()
        .copied()
        .filter(|index| in_degree[index] == 0)
        .collect();
    let mut execution_order = Vec::with_capacity(valid.len());
    let mut last: Option<(Device, u64)> = None;
    while !ready.is_empty() {
        let position = last
            .and_then(|(device, cluster)| {
                ready
                    .iter()
                    .position(|&index| {
                        modules[index].device == device && clusters[&index] == cluster
                    })
                    .or_else(|| {
                        ready
                            .iter()
                            .position(|&index| modules[index].device == device)
                    })
            })
            .unwrap_or(0);
        let index = ready.remove(position);
        last = Some((modules[index].device, clusters[&index]));
        execution_order.push(index);

        for record in modules[index].active_outputs.values() {
            let Some(consumers) = consumers_of.get(&record.locale_hash()) else {
                continue;
            };
            for &consumer in consumers {
                match in_degree.get_mut(&consumer) {
                    Some(degree) if *degree > 0 => {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(consumer);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    if execution_order.len() != valid.len() {
        return Err(FlowError::Cycle);
    }

    // Phase 4: split the ordered walk into device-execution runs.
    let mut device_runs: Vec<(Device, Vec<usize>)> = Vec::new();
    for &index in &execution_order {
        let device = modules[index].device;
        let cluster = clusters[&index];
        match device_runs.last_mut() {
            Some((run_device, run)) if *run_device == device && clusters[&run[0]] == cluster => {
                run.push(index);
            }
            _ => device_runs.push((device, vec![index])),
        }
    }

    // Phase 5: a tensor branched to several consumers must not also be
    // rewritten in place by one of them.
    let mut inplace: HashMap<u64, Vec<usize>> = HashMap::new();
    for &index in &valid {
        let outputs: HashSet<u64> = modules[index]
            .active_outputs
            .values()
            .map(|record| record.hash)
            .collect();
        for record in modules[index].active_inputs.values() {
            if outputs.contains(&record.hash) {
                inplace.entry(record.hash).or_default().push(index);
            }
        }
    }

    let mut conflicts = Vec::new();
    for (locale_hash, consumers) in &consumers_of {
        let distinct: HashSet<usize> = consumers.iter().copied().collect();
        if distinct.len() < 2 {
            continue;
        }
        let record_hash = modules[consumers[0]]
            .active_inputs
            .values()
            .find(|record| record.locale_hash() == *locale_hash)
            .map(|record| record.hash);
        let Some(record_hash) = record_hash else {
            continue;
        };
        if let Some(users) = inplace.get(&record_hash) {
            if users.iter().any(|user| distinct.contains(user)) {
                conflicts.push(record_hash);
            }
        }
    }
    conflicts.sort_unstable();
    conflicts.dedup();

    Ok(ExecutionPlan {
        execution_order,
        clusters,
        device_runs,
        conflicts,
    })
}
