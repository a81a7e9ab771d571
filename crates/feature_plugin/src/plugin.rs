use std::{any::Any, fmt, sync::Arc};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::message::{ContextPayload, ExecutionResult, PluginConfig, SettingsMap};
use crate::store::ConfigStore;

/// Lifecycle of a plugin (and of the registry that drives it).
///
/// ```text
/// Unloaded ─▶ Initializing ─▶ Initialized ─▶ Activating ─▶ Active
///                  │               ▲              │            │
///                  ▼               └── Deactivating ◀──────────┘
///               Failed ◀───────────────────────────┘   │
///                                                  Disposed
/// ```
/// `Failed` and `Disposed` are absorbing.
#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default,
    Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginStatus {
    #[default]
    Unloaded,
    Initializing,
    Initialized,
    Activating,
    Active,
    Deactivating,
    Disposed,
    Failed,
}

impl PluginStatus {
    pub fn can_transition_to(self, next: PluginStatus) -> bool {
        use PluginStatus::*;
        matches!(
            (self, next),
            (Unloaded, Initializing)
                | (Initializing, Initialized)
                | (Initializing, Failed)
                | (Initialized, Activating)
                | (Activating, Active)
                | (Activating, Failed)
                | (Active, Deactivating)
                | (Deactivating, Initialized)
                | (Deactivating, Disposed)
                | (Unloaded, Disposed)
                | (Initialized, Disposed)
        )
    }

    /// Move to `next`, refusing anything the state machine does not allow.
    pub fn transition(&mut self, next: PluginStatus) -> Result<(), FeatureError> {
        if !self.can_transition_to(next) {
            return Err(FeatureError::InvalidTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PluginStatus::Disposed | PluginStatus::Failed)
    }

    /// `Initialized` or any later, non-terminal state.
    pub fn is_ready(self) -> bool {
        matches!(
            self,
            PluginStatus::Initialized
                | PluginStatus::Activating
                | PluginStatus::Active
                | PluginStatus::Deactivating
        )
    }
}

// -----------------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------------

/// Errors raised by host capabilities (storage, menus, script injection).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostError {
    /// The host API does not exist in this environment.
    #[error("host API unavailable: {0}")]
    Unavailable(String),

    /// The host API exists but refused the call.
    #[error("host API rejected the call: {0}")]
    Rejected(String),

    #[error("host call timed out after {0} ms")]
    Timeout(u64),
}

impl From<serde_json::Error> for HostError {
    fn from(err: serde_json::Error) -> HostError {
        HostError::Rejected(err.to_string())
    }
}

/// Coordinator-side failure taxonomy. Everything here is converted into an
/// `ExecutionResult::Failure` or an error response before it reaches a reply sink.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureError {
    #[error("not initialized: {0}")]
    NotInitialized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("external call failed: {0}")]
    ExternalCall(String),

    #[error("executor unreachable: {0}")]
    ChannelUnreachable(String),

    #[error("no reply within {0} ms")]
    Timeout(u64),

    #[error("plugin `{0}` failed: {1}")]
    PluginFailed(String, String),

    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: PluginStatus, to: PluginStatus },

    #[error("registry has been disposed")]
    Disposed,
}

impl From<HostError> for FeatureError {
    fn from(err: HostError) -> FeatureError {
        FeatureError::ExternalCall(err.to_string())
    }
}

impl From<FeatureError> for ExecutionResult {
    fn from(err: FeatureError) -> ExecutionResult {
        ExecutionResult::failure(err.to_string())
    }
}

// -----------------------------------------------------------------------------
// Execution context
// -----------------------------------------------------------------------------

/// Opaque page-local state. The core never looks inside.
pub type PageState = Arc<dyn Any + Send + Sync>;

/// Built fresh for every request and dropped afterwards.
#[derive(Clone)]
pub struct ExecutionContext {
    pub settings: SettingsMap,
    pub url: String,
    pub store: ConfigStore,
    pub page_state: Option<PageState>,
}

impl ExecutionContext {
    pub fn new(payload: ContextPayload, store: ConfigStore) -> Self {
        Self {
            settings: payload.settings,
            url: payload.url,
            store,
            page_state: None,
        }
    }

    pub fn with_page_state(mut self, state: PageState) -> Self {
        self.page_state = Some(state);
        self
    }

    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        self.settings.get(key).and_then(Value::as_u64)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("settings", &self.settings.keys().collect::<Vec<_>>())
            .field("url", &self.url)
            .field("store", &self.store)
            .field("page_state", &self.page_state.is_some())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Feature / Plugin traits – implement these in your plugin code
// -----------------------------------------------------------------------------

/// A named, versioned capability.
#[async_trait]
pub trait Feature: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    /// Cheap, synchronous page-class filter.
    fn is_applicable(&self, url: &str) -> bool;

    /// Checks inputs and configuration. Must not have side effects.
    async fn can_execute(&self, ctx: &ExecutionContext) -> bool;

    /// Does the work. An `Err` is turned into a `Failure` by the registry.
    async fn execute(&self, ctx: &ExecutionContext) -> anyhow::Result<ExecutionResult>;
}

/// A bundle of features plus configuration.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    /// The features this plugin owns, in order.
    fn features(&self) -> Vec<Arc<dyn Feature>>;

    /// Built-in defaults, used when nothing is persisted.
    fn default_config(&self) -> PluginConfig {
        PluginConfig::default()
    }

    async fn on_initialize(&self, _config: &PluginConfig) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_activate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_deactivate(&self) {}
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id())
            .field("version", &self.version())
            .finish()
    }
}

/// What log levels are supported?
/// Higher-value variants are more severe.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    #[default]
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
}

impl LogLevel {
    /// The `EnvFilter` directive for this level.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl From<&str> for LogLevel {
    fn from(level: &str) -> LogLevel {
        match level.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            "critical" => LogLevel::Critical,
            _ => LogLevel::Info,
        }
    }
}
