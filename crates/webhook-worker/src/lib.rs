//! Ingest handling and the background delivery worker, independent of any HTTP
//! framework — the `webhook-service` binary wires these onto `axum`.

mod delivery;
mod ingest;

pub use delivery::{DeliveryWorker, WorkerConfig};
pub use ingest::{ingest_event, IngestOutcome};
