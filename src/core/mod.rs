//! Core scheduling abstractions and error types.

pub mod audit;
pub mod error;
pub mod scheduler;

pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink};
pub use error::{AppResult, GateError};
pub use scheduler::{Scheduler, SchedulerStats, Spawn, TaskHandle};
