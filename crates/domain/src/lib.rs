//! Domain-level building blocks shared across the scanner and consumer crates.
//!
//! Both binaries agree on the configuration contract, the event model that
//! travels through the queue, and the storage traits implemented by the
//! SeaORM adapters.

pub mod config;
pub mod model;
pub mod services;

pub mod storage {
    mod traits;

    pub use traits::*;
}

pub use model::*;
pub use storage::*;
