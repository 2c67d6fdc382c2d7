//! Builders to construct gates from configuration.

pub mod gate_builder;

pub use gate_builder::{build_gates, GateRegistry};
