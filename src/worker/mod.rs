//! Worker side of the engine.
//!
//! - `state`: saga state machine and step list
//! - `prompt`: agent prompt rendering
//! - `saga`: the step driver with compensation
//! - `pool`: fixed-size pool pulling tasks off the queue

pub mod pool;
pub mod prompt;
pub mod saga;
pub mod state;

pub use pool::WorkerPool;
pub use saga::{SagaDeps, SagaError, SagaReport, SagaSettings, TaskSaga};
pub use state::{SagaState, SagaStep, StateTransition};
