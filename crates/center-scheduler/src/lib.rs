//! center-scheduler — engine selection under resource and affinity
//! constraints.
//!
//! Pure ranking over engine snapshots: weight filtering with a
//! configurable overcommit ratio, best-effort spread across IPs already
//! used in a batch, and victim selection for scale-down. The cluster
//! converts live engines to `EngineSlot`s before asking for a decision.

mod reduce;
mod selector;

pub use reduce::{select_reduce_victim, ReduceCandidate, ReduceContainer};
pub use selector::{EngineSelector, EngineSlot};
