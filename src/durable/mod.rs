//! # Durable execution
//!
//! Durable promises (futures mirrored as persisted Actions), the
//! priority-tiered execution queue, the batch scheduler, execution
//! contexts, and crash recovery.

pub mod batch;
pub mod context;
pub mod promise;
pub mod queue;

use serde::{Deserialize, Serialize};

pub use batch::{
    BatchProvider, BatchRequest, BatchResult, BatchResultStatus, BatchStatus, BatchSubmission,
};
pub use context::{with_context, ContextFrame, ExecutionContext, FlushFn};
pub use promise::{work_fn, DurablePromise, PromiseState, WorkFn};
pub use queue::{ExecutionQueue, QueueConfig, RecoveryReport, SubmitOptions};

/// Execution priority tier, highest first. Each tier owns a counting
/// semaphore; `batch` work accumulates for window-flushed submission
/// instead of executing immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Priority,
    Standard,
    Flex,
    Batch,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Priority, Tier::Standard, Tier::Flex, Tier::Batch];

    pub(crate) fn index(self) -> usize {
        match self {
            Tier::Priority => 0,
            Tier::Standard => 1,
            Tier::Flex => 2,
            Tier::Batch => 3,
        }
    }

    /// Numeric mirror persisted on Actions.
    pub fn numeric(self) -> u8 {
        match self {
            Tier::Priority => 9,
            Tier::Standard => 7,
            Tier::Flex => 5,
            Tier::Batch => 1,
        }
    }

    pub fn from_numeric(n: u8) -> Option<Tier> {
        match n {
            9 => Some(Tier::Priority),
            7 => Some(Tier::Standard),
            5 => Some(Tier::Flex),
            1 => Some(Tier::Batch),
            _ => None,
        }
    }

    /// Default semaphore bound for the tier.
    pub fn default_concurrency(self) -> usize {
        match self {
            Tier::Priority => 50,
            Tier::Standard => 20,
            Tier::Flex => 10,
            Tier::Batch => 1000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Priority => "priority",
            Tier::Standard => "standard",
            Tier::Flex => "flex",
            Tier::Batch => "batch",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_mirror_round_trips() {
        for tier in Tier::ALL {
            assert_eq!(Tier::from_numeric(tier.numeric()), Some(tier));
        }
        assert_eq!(Tier::from_numeric(0), None);
    }

    #[test]
    fn test_default_concurrency() {
        assert_eq!(Tier::Priority.default_concurrency(), 50);
        assert_eq!(Tier::Standard.default_concurrency(), 20);
        assert_eq!(Tier::Flex.default_concurrency(), 10);
        assert_eq!(Tier::Batch.default_concurrency(), 1000);
    }
}
