//! EmberDB common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all EmberDB components.

pub mod config;
pub mod error;
pub mod page;
pub mod stats;

pub use config::{DatabaseConfig, EnvConfig, SubmitMode};
pub use error::{EmberError, ErrorKind, Result};
pub use page::{FileId, PageAddr, PageKey};
pub use stats::{CacheStats, StatsSnapshot};
