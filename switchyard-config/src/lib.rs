//! Configuration loading for Switchyard.
//!
//! The process configuration is composed from built-in defaults, an optional
//! TOML file and the environment (optionally seeded from a `.env` file).
//! Recoverable problems are reported as [`ConfigWarnings`] next to the
//! effective configuration; unreadable files and an unusable public URL fail
//! the load with [`ConfigLoadError`].

#![allow(missing_docs)]

pub mod error;
pub mod loader;
pub mod models;
pub mod sources;
pub mod util;
pub mod validation;

pub use error::ConfigLoadError;
pub use loader::{ConfigLoad, ConfigLoader, DEFAULT_CONFIG_FILES};
pub use models::{AppConfig, DatabaseConfig, IdentityConfig, ServerConfig};
pub use switchyard_core::RegistryConfig;
pub use validation::{ConfigWarning, ConfigWarnings};
