//! HTTP surface of the Switchyard registry.
//!
//! [`create_router`] exposes host and service registration, job management
//! and load reporting as JSON endpoints. The binary in `main.rs` wires it to
//! a registry, a dispatcher and a heartbeat monitor.

pub mod bootstrap;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use errors::{AppError, AppResult};
pub use routes::create_router;
pub use state::AppState;
