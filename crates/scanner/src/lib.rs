//! Ledger event scanner: walks contract event types across block heights and
//! forwards every matching event to the message queue, persisting a
//! per-event-type checkpoint once a window is fully published.

pub mod pool;
pub mod publisher;
pub mod rpc;
pub mod runner;
pub mod worker;

pub use pool::EndpointPool;
pub use publisher::{OutboundPublisher, PublishError};
pub use rpc::{FlowAccessClient, LedgerClient, RpcError};
pub use runner::{run_scanner, ScannerError};
pub use worker::{CycleOutcome, ScanError, ScanState, ScanWorker};
