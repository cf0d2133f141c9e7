//! # usagebar-core
//!
//! Usage polling and pacing engine - shared by every presentation surface.
//!
//! This crate provides:
//! - The polling engine, fetch client and failure handling (`services::quota`)
//! - Configuration with environment fallback (`config` module)
//! - Unified error handling (`error` module)

pub mod config;
pub mod error;
pub mod services;

// Re-exports for convenience
pub use config::{CredentialConfig, Credentials, EnvFallback, UsageConfig};
pub use error::{Error, Result};

pub use services::quota::{
    ClaudeWebClient, DisplayConfig, EngineEvent, EngineHandle, IconStyle, NumberStyle,
    PacingStatus, PollingConfig, PollingEngine, QuotaError, QuotaLimit, QuotaMetric,
    QuotaSnapshot, UsageFetcher, WidgetPhase, WidgetSnapshot, WidgetState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}
