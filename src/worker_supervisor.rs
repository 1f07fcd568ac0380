//! Worker supervision.
//!
//! One supervisor task owns each admitted session: it launches the
//! provider's worker, consumes the progress stream, enforces the session
//! timeout and cancellation with two-phase escalation, publishes the
//! workspace on success, and records the terminal state in the session
//! store.

pub mod proc_stats;
pub mod progress;
pub mod supervisor;

pub use supervisor::{run_session, SupervisorContext};
