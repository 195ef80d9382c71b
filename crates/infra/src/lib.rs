//! Infrastructure layer: storage, the transfer engine, configuration.

pub mod config;
pub mod engine;
pub mod store;

pub use config::{AppConfig, ConfigError, DatabaseConfig};
pub use engine::{AbortReason, TransferEngine, TransferError, TransferErrorKind};
