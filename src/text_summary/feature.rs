use async_trait::async_trait;
use feature_plugin::{
    ExecutionContext, Feature,
    message::{ExecutionResult, HistoryEntry},
};
use regex::Regex;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::history::SummaryHistory;

pub const FEATURE_ID: &str = "text-summary";
pub const SELECTED_TEXT: &str = "selectedText";
pub const MIN_SELECTION_CHARS: usize = 10;
pub const DEFAULT_MAX_LENGTH: usize = 200;

pub const TOO_SHORT: &str = "no text selected or text too short";
pub const NOT_CONFIGURED: &str = "feature not configured";

/// Summarizes the current selection. The remote model call is replaced by a
/// local extractive summary: leading sentences up to `maxLength` characters.
pub struct TextSummaryFeature {
    sentences: Regex,
}

impl TextSummaryFeature {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            sentences: Regex::new(r"[^.!?。！？]+[.!?。！？]*")?,
        })
    }

    /// The selection to summarize, or the user-facing reason it can't be.
    fn check<'a>(&self, ctx: &'a ExecutionContext) -> Result<&'a str, &'static str> {
        let text = ctx.setting_str(SELECTED_TEXT).unwrap_or_default().trim();
        if text.chars().count() < MIN_SELECTION_CHARS {
            return Err(TOO_SHORT);
        }
        match ctx.setting_str("apiUrl") {
            Some(url) if !url.trim().is_empty() => Ok(text),
            _ => Err(NOT_CONFIGURED),
        }
    }

    pub fn summarize(&self, text: &str, max_length: usize) -> String {
        let mut summary = String::new();
        for sentence in self.sentences.find_iter(text) {
            let sentence = sentence.as_str().trim();
            if sentence.is_empty() {
                continue;
            }
            let needed = sentence.chars().count() + usize::from(!summary.is_empty());
            if summary.chars().count() + needed > max_length {
                break;
            }
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(sentence);
        }

        if summary.is_empty() {
            // first sentence alone is too long: cut it
            let cut: String = text.chars().take(max_length.saturating_sub(1)).collect();
            summary = format!("{}…", cut.trim_end());
        }
        summary
    }
}

#[async_trait]
impl Feature for TextSummaryFeature {
    fn id(&self) -> &str {
        FEATURE_ID
    }

    fn name(&self) -> &str {
        "Text summary"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Any web or local document; no internal browser pages.
    fn is_applicable(&self, url: &str) -> bool {
        if url.is_empty() {
            return true;
        }
        Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https" | "file"))
    }

    async fn can_execute(&self, ctx: &ExecutionContext) -> bool {
        self.check(ctx).is_ok()
    }

    async fn execute(&self, ctx: &ExecutionContext) -> anyhow::Result<ExecutionResult> {
        let text = match self.check(ctx) {
            Ok(text) => text,
            Err(reason) => return Ok(ExecutionResult::failure(reason)),
        };

        let max_length = ctx
            .setting_u64("maxLength")
            .map(|n| n as usize)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_LENGTH);
        let language = ctx.setting_str("language").unwrap_or("zh-CN").to_string();
        let summary = self.summarize(text, max_length);
        debug!(chars = text.chars().count(), max_length, "summarized selection");

        let history = SummaryHistory::new(ctx.store.clone());
        if let Err(err) = history.append(HistoryEntry::new(&ctx.url, text, &summary)).await {
            warn!(error = %err, "could not record summary history");
        }

        Ok(ExecutionResult::success(json!({
            "summary": summary,
            "originalLength": text.chars().count(),
            "language": language,
        })))
    }
}
