//! HTTP wiring for the webhook delivery service: routes + the shared
//! application context. All decision logic lives in the `webhook-*` library
//! crates; this crate only extracts, calls, and serializes.

mod error;
mod handlers;
mod routes;
mod state;

pub use routes::build_router;
pub use state::AppState;
