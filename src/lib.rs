// ABOUTME: Host-side wiring for kiana: configuration and the storage lifecycle hooks.
// ABOUTME: Request handlers receive an App and use its label and series stores.

pub mod app;
pub mod config;

pub use app::{App, AppError};
pub use config::{ConfigError, DB_PATH, KianaConfig};
