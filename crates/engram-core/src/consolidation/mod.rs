//! Consolidation
//!
//! Scheduled background processing over the store: the daily decay cycle
//! recomputes relevance, the weekly association cycle discovers relations
//! between similar observations, and the opt-in forgetting cycle archives
//! what has decayed past usefulness. Each cycle runs under a named lock in
//! the store and records its run in the maintenance log.

mod cycles;
mod scheduler;

pub use cycles::{Consolidator, CycleOutcome};
pub use scheduler::Scheduler;

/// The three consolidation cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Decay,
    Associate,
    Forget,
}

impl CycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleKind::Decay => "decay",
            CycleKind::Associate => "associate",
            CycleKind::Forget => "forget",
        }
    }
}

impl std::fmt::Display for CycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
