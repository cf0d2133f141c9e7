//! Quota polling and pacing
//!
//! Periodically samples the remote usage API and turns raw utilization into
//! a pacing status and a short rendered title.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ PollingEngine (engine)                                   │
//! │   schedule, retries with backoff, failure accounting     │
//! └──────────────────────────────────────────────────────────┘
//!      │ fetch            │ classify          │ decode
//!      ▼                  ▼                   ▼
//! ┌───────────┐    ┌────────────┐     ┌───────────┐
//! │UsageFetch.│    │ classifier │     │ decoder   │
//! │ (claude)  │    └────────────┘     └───────────┘
//! └───────────┘
//!      │ publishes WidgetSnapshot
//!      ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │ widget ──► pacing (expected usage, status)               │
//! │        ──► display (emoji, numbers, bars, copy)          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use usagebar_core::config::{EnvFallback, UsageConfig};
//! use usagebar_core::services::quota::{ClaudeWebClient, PollingEngine};
//!
//! let env = EnvFallback::from_process();
//! let config = UsageConfig::load_from(&UsageConfig::default_path()?)?;
//! let display = config.display_config(&env);
//!
//! let mut handle = PollingEngine::new(ClaudeWebClient::new(), config.credentials, env).spawn();
//! while let Some(state) = handle.next_state().await {
//!     println!("{}", state.title(&display, chrono::Utc::now()));
//! }
//! ```

pub mod types;
pub mod pacing;
pub mod display;
pub mod decoder;
pub mod classifier;
pub mod provider;
pub mod claude;
pub mod engine;
pub mod widget;

// Re-export main types
pub use types::{
    DisplayConfig,
    IconStyle,
    NumberStyle,
    PacingStatus,
    QuotaLimit,
    QuotaMetric,
    QuotaSnapshot,
};

// Re-export fetcher trait and errors
pub use provider::{HttpResponse, QuotaError, UsageFetcher};
pub use classifier::{Classification, FailureKind};

// Re-export client
pub use claude::ClaudeWebClient;

// Re-export pacing
pub use pacing::{expected_usage, MetricPacing};

// Re-export engine
pub use engine::{
    EngineController,
    EngineEvent,
    EngineHandle,
    PollingConfig,
    PollingEngine,
    Trigger,
};

// Re-export widget
pub use widget::{
    Health,
    WidgetPhase,
    WidgetSnapshot,
    WidgetState,
    WidgetStateMachine,
    WidgetView,
};
