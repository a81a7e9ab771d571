use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::plugin::PluginStatus;

/// Free-form settings as they travel between executors and the coordinator.
pub type SettingsMap = Map<String, Value>;

/// Host-assigned identity of a page (one executor per page).
pub type PageId = u64;

// -----------------------------------------------------------------------------
// Results
// -----------------------------------------------------------------------------

/// Outcome of a feature execution. Never an error across the channel.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ExecutionResult {
    Success { value: Value },
    Failure { reason: String },
}

impl ExecutionResult {
    pub fn success(value: impl Into<Value>) -> Self {
        ExecutionResult::Success { value: value.into() }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        ExecutionResult::Failure { reason: reason.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            ExecutionResult::Success { value } => Some(value),
            ExecutionResult::Failure { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Failure { reason } => Some(reason),
        }
    }
}

// -----------------------------------------------------------------------------
// Persisted records
// -----------------------------------------------------------------------------

/// The `settings` record every context can read.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub api_url: String,
    pub api_key: String,
    pub max_length: u32,
    pub language: String,
}

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            max_length: 200,
            language: "zh-CN".to_string(),
        }
    }
}

impl Settings {
    pub fn to_map(&self) -> SettingsMap {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => SettingsMap::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Per-plugin configuration, stored under `plugin_config_<pluginId>`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    pub enabled: bool,
    #[serde(default)]
    pub settings: SettingsMap,
    pub last_updated: DateTime<Utc>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settings: SettingsMap::new(),
            last_updated: Utc::now(),
        }
    }
}

impl PluginConfig {
    pub fn with_settings(settings: SettingsMap) -> Self {
        Self { settings, ..Default::default() }
    }

    /// Shallow merge of a partial update, stamping `last_updated`.
    pub fn apply(&mut self, patch: PluginConfigPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(settings) = patch.settings {
            self.settings.extend(settings);
        }
        self.last_updated = Utc::now();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsMap>,
}

/// One summary, newest first in `summaryHistory`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub truncated_input: String,
    pub output: String,
}

impl HistoryEntry {
    pub const MAX_INPUT_CHARS: usize = 500;

    pub fn new(url: &str, input: &str, output: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            url: url.to_string(),
            truncated_input: input.chars().take(Self::MAX_INPUT_CHARS).collect(),
            output: output.to_string(),
        }
    }
}

/// Read-only snapshot of a plugin as executors see it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatusInfo {
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    pub status: PluginStatus,
    pub enabled: bool,
    pub features_count: usize,
    pub active_features: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    pub total_summaries: usize,
    pub is_configured: bool,
    pub last_used: Option<DateTime<Utc>>,
}

// -----------------------------------------------------------------------------
// Executor → coordinator
// -----------------------------------------------------------------------------

/// What an executor knows about the page when it asks for a feature.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
    #[serde(default)]
    pub settings: SettingsMap,
    #[serde(default)]
    pub url: String,
    /// The page the request comes from, when an executor sends it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<PageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteFeatureParams {
    pub feature_id: String,
    #[serde(default)]
    pub context: ContextPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsParams {
    pub settings: SettingsMap,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetPluginConfigParams {
    pub plugin_id: String,
    pub config: PluginConfigPatch,
}

/// Every request the coordinator understands. Unknown `type`s fail to
/// deserialize instead of being dropped.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    ExecuteFeature(ExecuteFeatureParams),
    GetPluginStatus,
    GetSettings,
    UpdateSettings(UpdateSettingsParams),
    GetSummaryHistory,
    ClearSummaryHistory,
    GetStats,
    SetPluginConfig(SetPluginConfigParams),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::ExecuteFeature(_) => "EXECUTE_FEATURE",
            Request::GetPluginStatus => "GET_PLUGIN_STATUS",
            Request::GetSettings => "GET_SETTINGS",
            Request::UpdateSettings(_) => "UPDATE_SETTINGS",
            Request::GetSummaryHistory => "GET_SUMMARY_HISTORY",
            Request::ClearSummaryHistory => "CLEAR_SUMMARY_HISTORY",
            Request::GetStats => "GET_STATS",
            Request::SetPluginConfig(_) => "SET_PLUGIN_CONFIG",
        }
    }

    pub fn execute_feature(feature_id: impl Into<String>, context: ContextPayload) -> Self {
        Request::ExecuteFeature(ExecuteFeatureParams {
            feature_id: feature_id.into(),
            context,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AckResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StatusResponse {
    pub success: bool,
    pub status: Vec<PluginStatusInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SettingsResponse {
    pub success: bool,
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct HistoryResponse {
    pub success: bool,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: SummaryStats,
}

/// The single reply a call-site receives.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(untagged)]
pub enum Response {
    Execution(ExecutionResult),
    Status(StatusResponse),
    Settings(SettingsResponse),
    History(HistoryResponse),
    Stats(StatsResponse),
    Ack(AckResponse),
}

impl Response {
    pub fn is_success(&self) -> bool {
        match self {
            Response::Execution(result) => result.is_success(),
            Response::Status(r) => r.success,
            Response::Settings(r) => r.success,
            Response::History(r) => r.success,
            Response::Stats(r) => r.success,
            Response::Ack(r) => r.success,
        }
    }

    pub fn ack() -> Self {
        Response::Ack(AckResponse::ok())
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Response::Ack(AckResponse::fail(error))
    }
}

// -----------------------------------------------------------------------------
// Coordinator → executor
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutorMessage {
    SummaryRequested {
        #[serde(rename = "selectedText")]
        selected_text: String,
    },
    UpdateConfig {
        config: SettingsMap,
    },
    ShowSelectionAffordance,
    HideSelectionAffordance,
}

impl ExecutorMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorMessage::SummaryRequested { .. } => "SUMMARY_REQUESTED",
            ExecutorMessage::UpdateConfig { .. } => "UPDATE_CONFIG",
            ExecutorMessage::ShowSelectionAffordance => "SHOW_SELECTION_AFFORDANCE",
            ExecutorMessage::HideSelectionAffordance => "HIDE_SELECTION_AFFORDANCE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_type_tag_and_camel_case_fields() {
        let req: Request = serde_json::from_value(json!({
            "type": "EXECUTE_FEATURE",
            "featureId": "text-summary",
            "context": { "settings": { "selectedText": "hello world!" }, "url": "https://a.b" }
        }))
        .expect("valid request");

        match req {
            Request::ExecuteFeature(p) => {
                assert_eq!(p.feature_id, "text-summary");
                assert_eq!(p.context.url, "https://a.b");
                assert_eq!(p.context.settings["selectedText"], json!("hello world!"));
            }
            other => panic!("unexpected request {other:?}"),
        }

        let req: Request = serde_json::from_value(json!({ "type": "GET_SETTINGS" })).unwrap();
        assert_eq!(req, Request::GetSettings);
    }

    #[test]
    fn unknown_request_type_is_rejected() {
        let err = serde_json::from_value::<Request>(json!({ "type": "GET_WEATHER" }));
        assert!(err.is_err());
    }

    #[test]
    fn settings_fill_missing_fields_with_defaults() {
        let s: Settings = serde_json::from_value(json!({ "apiKey": "k" })).unwrap();
        assert_eq!(s.api_key, "k");
        assert_eq!(s.api_url, DEFAULT_API_URL);
        assert_eq!(s.max_length, 200);
        assert!(s.is_configured());
    }

    #[test]
    fn history_entry_truncates_input() {
        let input = "x".repeat(800);
        let entry = HistoryEntry::new("https://a.b", &input, "sum");
        assert_eq!(entry.truncated_input.chars().count(), HistoryEntry::MAX_INPUT_CHARS);
    }

    #[test]
    fn plugin_config_patch_merges_settings() {
        let mut cfg = PluginConfig::with_settings(
            json!({ "apiUrl": "a", "language": "en" }).as_object().cloned().unwrap(),
        );
        cfg.apply(PluginConfigPatch {
            enabled: Some(false),
            settings: json!({ "apiUrl": "b" }).as_object().cloned(),
        });
        assert!(!cfg.enabled);
        assert_eq!(cfg.settings["apiUrl"], json!("b"));
        assert_eq!(cfg.settings["language"], json!("en"));
    }

    #[test]
    fn summary_requested_wire_shape() {
        let msg = ExecutorMessage::SummaryRequested { selected_text: "abc".into() };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "SUMMARY_REQUESTED", "selectedText": "abc" })
        );
    }
}
