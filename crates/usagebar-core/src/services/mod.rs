//! Services module

pub mod quota;

pub use quota::{
    ClaudeWebClient, DisplayConfig, EngineHandle, PollingConfig, PollingEngine, QuotaError,
    QuotaMetric, QuotaSnapshot, WidgetSnapshot, WidgetState,
};
