use std::{
    sync::Mutex,
    time::Duration,
};

use strum_macros::Display;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

impl NoticeLevel {
    pub fn dismiss_after(self) -> Duration {
        match self {
            NoticeLevel::Info => Duration::from_secs(3),
            NoticeLevel::Warning | NoticeLevel::Error => Duration::from_secs(5),
        }
    }
}

/// What an executor can draw on its page.
pub trait PageSurface: Send + Sync {
    /// A transient notice, gone after [`NoticeLevel::dismiss_after`].
    fn notify(&self, level: NoticeLevel, message: &str);
    fn show_result(&self, summary: &str, original: &str);
    fn show_affordance(&self, selection: &str);
    fn hide_affordance(&self);
}

/// Headless surface: everything becomes a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSurface;

impl PageSurface for TracingSurface {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info => info!(target: "surface", "{message}"),
            NoticeLevel::Warning | NoticeLevel::Error => warn!(target: "surface", %level, "{message}"),
        }
    }

    fn show_result(&self, summary: &str, original: &str) {
        info!(target: "surface", original_chars = original.chars().count(), "summary: {summary}");
    }

    fn show_affordance(&self, selection: &str) {
        info!(target: "surface", selection_chars = selection.chars().count(), "affordance shown");
    }

    fn hide_affordance(&self) {
        info!(target: "surface", "affordance hidden");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Notice(NoticeLevel, String),
    Result(String),
    AffordanceShown,
    AffordanceHidden,
}

/// Keeps every call so callers can check what a page would have shown.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    events: Mutex<Vec<SurfaceEvent>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Poll until `pred` holds for some recorded event, or `limit` passes.
    pub async fn wait_for<F>(&self, limit: Duration, pred: F) -> Option<SurfaceEvent>
    where
        F: Fn(&SurfaceEvent) -> bool,
    {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(found) = self.events().into_iter().find(|e| pred(e)) {
                return Some(found);
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    fn record(&self, event: SurfaceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl PageSurface for RecordingSurface {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.record(SurfaceEvent::Notice(level, message.to_string()));
    }

    fn show_result(&self, summary: &str, _original: &str) {
        self.record(SurfaceEvent::Result(summary.to_string()));
    }

    fn show_affordance(&self, _selection: &str) {
        self.record(SurfaceEvent::AffordanceShown);
    }

    fn hide_affordance(&self) {
        self.record(SurfaceEvent::AffordanceHidden);
    }
}
