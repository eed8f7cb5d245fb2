//! Queue consumer: long-polls the event queue, dispatches each event to its
//! registered handler and acknowledges it, parking failed acknowledgements
//! for a background GC recycler.

pub mod consumer;
pub mod handlers;
pub mod registry;

pub use consumer::{
    run_consumer, BatchReport, ConsumerError, InboundConsumer, MessageOutcome, ReceiveSettings,
};
pub use handlers::ListingCreatedHandler;
pub use registry::{EventHandler, HandlerError, HandlerRegistry};
