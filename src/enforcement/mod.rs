//! Conflict enforcement engine.
//!
//! Dependency order (leaves first):
//! mutation → locks → monitor → tamper → reset → lifecycle.
//! All components are `impl` blocks on [`ConflictEngine`].

pub mod engine;
pub mod lifecycle;
pub mod locks;
pub mod monitor;
pub mod mutation;
pub mod notices;
pub mod reset;
pub mod runner;
pub mod tamper;

pub use engine::{ConflictEngine, EngineError, EngineResult};
pub use lifecycle::CreateOutcome;
pub use locks::{Lock, LockTable, SweepReport, VoiceOutcome};
pub use monitor::ViolationOutcome;
pub use mutation::{classify, effective_length, RemovalClass};
pub use notices::{format_age, running_log_text};
pub use runner::EnforcementRunner;
pub use tamper::TamperReport;
