//! Weighted engine selection with affinity spread.
//!
//! Selection works over `EngineSlot` snapshots so the ranking itself is
//! pure: the cluster converts its live engines into slots, and the
//! selector never touches engine state. Order of operations:
//!
//! 1. keep healthy engines only
//! 2. rank by weight (`free + total × overcommit − requested`), dropping
//!    engines that cannot fit the request
//! 3. prefer engines outside the avoid list; when the avoid list would
//!    empty the set, fall back to a pseudo-random shuffle of the ranked
//!    set instead

use std::cmp::Ordering;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// A point-in-time snapshot of one engine, as seen by the selector.
#[derive(Debug, Clone)]
pub struct EngineSlot {
    pub ip: String,
    pub name: String,
    pub healthy: bool,
    pub total_memory: u64,
    pub free_memory: u64,
    pub total_cpus: u32,
    pub used_cpus: u32,
}

/// Ranks engines for placement.
///
/// Holds the overcommit ratio and the selection PRNG; the PRNG is an
/// instance field (not a process-wide source) so tests can seed it.
pub struct EngineSelector {
    overcommit_ratio: f64,
    rng: Mutex<StdRng>,
}

impl EngineSelector {
    pub fn new(overcommit_ratio: f64) -> Self {
        Self {
            overcommit_ratio,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the PRNG with a deterministic seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn overcommit_ratio(&self) -> f64 {
        self.overcommit_ratio
    }

    /// Produce the ordered candidate list for one placement.
    ///
    /// Callers consume the head and retry down the list. An empty result
    /// means no engine is eligible.
    pub fn select(
        &self,
        slots: &[EngineSlot],
        avoid_ips: &[String],
        requested_memory: u64,
    ) -> Vec<EngineSlot> {
        let mut ranked = self.rank_by_weight(slots, requested_memory);
        if ranked.is_empty() {
            return ranked;
        }

        if !avoid_ips.is_empty() {
            let spread: Vec<EngineSlot> = ranked
                .iter()
                .filter(|slot| !avoid_ips.contains(&slot.ip))
                .cloned()
                .collect();
            if !spread.is_empty() {
                return spread;
            }
            // Every candidate is already used in this batch; shuffle so
            // repeated picks do not all land on the same engine.
            let mut rng = self.rng.lock().expect("selector rng poisoned");
            for i in (1..ranked.len()).rev() {
                let j = rng.gen_range(0..=i);
                ranked.swap(i, j);
            }
        }
        ranked
    }

    /// Healthy engines ranked by weight, best first.
    fn rank_by_weight(&self, slots: &[EngineSlot], requested_memory: u64) -> Vec<EngineSlot> {
        let mut scored: Vec<(f64, EngineSlot)> = slots
            .iter()
            .filter(|slot| slot.healthy)
            .filter_map(|slot| {
                let available = slot.free_memory as f64
                    + slot.total_memory as f64 * self.overcommit_ratio;
                let score = available - requested_memory as f64;
                if score < 0.0 {
                    debug!(ip = %slot.ip, score, "engine dropped by weight filter");
                    return None;
                }
                Some((score, slot.clone()))
            })
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.ip.cmp(&b.ip))
        });
        scored.into_iter().map(|(_, slot)| slot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(ip: &str, total: u64, free: u64) -> EngineSlot {
        EngineSlot {
            ip: ip.to_string(),
            name: format!("node-{ip}"),
            healthy: true,
            total_memory: total,
            free_memory: free,
            total_cpus: 4,
            used_cpus: 0,
        }
    }

    fn selector() -> EngineSelector {
        EngineSelector::new(0.05).with_seed(42)
    }

    #[test]
    fn unhealthy_engines_are_filtered() {
        let mut unhealthy = slot("10.0.0.1", 1024, 1024);
        unhealthy.healthy = false;
        let slots = vec![unhealthy, slot("10.0.0.2", 1024, 1024)];

        let picked = selector().select(&slots, &[], 128);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].ip, "10.0.0.2");
    }

    #[test]
    fn weight_filter_drops_engines_that_cannot_fit() {
        // No overcommit: 100 free cannot fit a 128 request.
        let sel = EngineSelector::new(0.0).with_seed(1);
        let slots = vec![slot("10.0.0.1", 1024, 100), slot("10.0.0.2", 1024, 512)];

        let picked = sel.select(&slots, &[], 128);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].ip, "10.0.0.2");
    }

    #[test]
    fn overcommit_extends_availability() {
        // 100 free + 1024 * 0.05 = 151.2 fits a 128 request.
        let sel = EngineSelector::new(0.05).with_seed(1);
        let slots = vec![slot("10.0.0.1", 1024, 100)];

        let picked = sel.select(&slots, &[], 128);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn ranking_is_descending_with_ip_tiebreak() {
        let slots = vec![
            slot("10.0.0.3", 1024, 512),
            slot("10.0.0.1", 1024, 900),
            slot("10.0.0.2", 1024, 900),
        ];

        let picked = selector().select(&slots, &[], 0);
        assert_eq!(picked[0].ip, "10.0.0.1"); // tie with .2 broken by IP
        assert_eq!(picked[1].ip, "10.0.0.2");
        assert_eq!(picked[2].ip, "10.0.0.3");
    }

    #[test]
    fn avoid_list_prefers_fresh_engines() {
        let slots = vec![slot("10.0.0.1", 1024, 900), slot("10.0.0.2", 1024, 512)];
        let avoid = vec!["10.0.0.1".to_string()];

        let picked = selector().select(&slots, &avoid, 0);
        assert_eq!(picked[0].ip, "10.0.0.2");
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn exhausted_avoid_list_falls_back_to_shuffle() {
        let slots = vec![slot("10.0.0.1", 1024, 900), slot("10.0.0.2", 1024, 512)];
        let avoid = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];

        let picked = selector().select(&slots, &avoid, 0);
        // Everything was avoided, so the full ranked set comes back.
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn seeded_shuffle_is_deterministic() {
        let slots: Vec<EngineSlot> = (1..=5)
            .map(|i| slot(&format!("10.0.0.{i}"), 1024, 512))
            .collect();
        let avoid: Vec<String> = slots.iter().map(|s| s.ip.clone()).collect();

        let a = EngineSelector::new(0.05)
            .with_seed(7)
            .select(&slots, &avoid, 0);
        let b = EngineSelector::new(0.05)
            .with_seed(7)
            .select(&slots, &avoid, 0);

        let ips = |v: &[EngineSlot]| v.iter().map(|s| s.ip.clone()).collect::<Vec<_>>();
        assert_eq!(ips(&a), ips(&b));
    }

    #[test]
    fn no_eligible_engines_yields_empty() {
        let sel = EngineSelector::new(0.0);
        let slots = vec![slot("10.0.0.1", 128, 0)];
        assert!(sel.select(&slots, &[], 512).is_empty());
        assert!(sel.select(&[], &[], 0).is_empty());
    }

    #[test]
    fn distinct_engines_for_spread_batches() {
        // K slots over N engines pick K distinct engines when weights allow.
        let slots: Vec<EngineSlot> = (1..=4)
            .map(|i| slot(&format!("10.0.0.{i}"), 1024, 512))
            .collect();
        let sel = selector();

        let mut avoid: Vec<String> = Vec::new();
        for _ in 0..3 {
            let picked = sel.select(&slots, &avoid, 64);
            let head = &picked[0];
            assert!(!avoid.contains(&head.ip));
            avoid.push(head.ip.clone());
        }
        assert_eq!(avoid.len(), 3);
    }
}
