//! Runtime adapters for task execution.

pub mod tokio_spawner;

pub use tokio_spawner::TokioSpawner;
