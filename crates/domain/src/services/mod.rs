//! Shared service helpers: queue access, periodic recyclers and telemetry
//! wiring.

pub mod queue;
pub mod task;
pub mod telemetry;

pub use queue::*;
pub use task::*;
pub use telemetry::*;
