//! Lifecycle services.
//!
//! Services orchestrate storage, training and alerting into the high-level
//! operations of the control loop.

mod fairness;
mod retrain;
pub mod scheduler;

pub use fairness::{DEFAULT_MAX_GAP, FairnessAuditor, compute_gaps};
pub use retrain::{
    DriftDecision, DriftPolicy, FeedbackCountPolicy, RetrainOrchestrator, RetrainOutcome,
    RetrainState, RetrainTicket,
};
