//! Shared configuration, error taxonomy, domain model and metrics for the
//! webhook delivery system. Depended on by every other crate in the workspace.

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;

pub use config::Settings;
pub use error::{ApiError, DeliveryError, SecurityError, StoreError};
pub use metrics::Metrics;
pub use model::{Attempt, BackoffPolicy, Event, EventStatus};

pub type Result<T, E = error::ApiError> = std::result::Result<T, E>;
