//! Telebuf common types, errors, and configuration.
//!
//! This crate provides foundational types shared by the storage engine:
//! - Tracking consent values and their wire names
//! - Common error types with stable codes
//! - Storage configuration loading and validation
//! - Time providers used to name and age batch files

pub mod config;
pub mod consent;
pub mod error;
pub mod time;

pub use config::{
    ConfigResolution, ConfigResolver, ConfigSource, FilePersistenceConfig, StorageConfig,
    WipeRetryConfig,
};
pub use consent::TrackingConsent;
pub use error::{Error, ErrorCategory, Result};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};

/// Version of the on-disk batch directory layout.
pub const SCHEMA_VERSION: u32 = 2;
