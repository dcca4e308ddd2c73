//! Victim selection for scale-down.
//!
//! Engines carrying more replicas of a workload give one up first; within
//! the chosen engine the replica with the highest instance index goes.

/// One replica of the workload on a candidate engine.
#[derive(Debug, Clone)]
pub struct ReduceContainer {
    pub index: i32,
    pub container_id: String,
}

/// A candidate engine and the workload's replicas it currently holds.
#[derive(Debug, Clone)]
pub struct ReduceCandidate {
    pub ip: String,
    pub containers: Vec<ReduceContainer>,
}

/// Pick the next container to remove: densest engine first (ties broken
/// by IP), highest instance index within it. `None` when no candidate
/// holds a replica.
pub fn select_reduce_victim(candidates: &[ReduceCandidate]) -> Option<(String, String)> {
    let engine = candidates
        .iter()
        .filter(|c| !c.containers.is_empty())
        .max_by(|a, b| {
            a.containers
                .len()
                .cmp(&b.containers.len())
                .then_with(|| b.ip.cmp(&a.ip))
        })?;

    let victim = engine.containers.iter().max_by_key(|c| c.index)?;
    Some((engine.ip.clone(), victim.container_id.clone()))
}
