//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Shard receives request for a proxy location
//!     → looks up (or creates) that location's selector
//!     → round_robin.rs (rotate through the upstream group)
//!     → index into the location's address list
//!
//! Shard manager assigns requests to shards
//!     → its own round_robin cursor over the shard slice
//! ```
//!
//! # Design Decisions
//! - Selectors only hand out indices; the caller owns the address list
//! - One selector per location per shard, never shared across shards
//! - Algorithm chosen from config; unimplemented names rejected at load

pub mod round_robin;

use thiserror::Error;

use crate::config::LoadBalancingAlgorithm;

pub use round_robin::RoundRobinCursor;

/// Picks the next index into a group of fixed length.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Return the next index; always `< self.len()`.
    fn next_index(&self) -> usize;

    /// Size of the group this selector was built for.
    fn len(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("cannot balance over an empty group")]
    EmptyGroup,

    #[error("load balancing algorithm `{0}` is not implemented")]
    Unsupported(LoadBalancingAlgorithm),
}

/// Build a selector for a group of `len` entries.
pub fn build(alg: LoadBalancingAlgorithm, len: usize) -> Result<Box<dyn LoadBalancer>, SelectorError> {
    match alg {
        LoadBalancingAlgorithm::RoundRobin => Ok(Box::new(RoundRobinCursor::new(len)?)),
        other => Err(SelectorError::Unsupported(other)),
    }
}
