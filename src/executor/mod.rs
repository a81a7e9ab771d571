//! The per-page side.
//!
//! An [`ExecutorClient`] lives as long as its page. It pulls settings once on
//! start, keeps them as a read-only cache refreshed by `UPDATE_CONFIG`, and turns
//! summary requests (from the menu or its own affordance) into one
//! `EXECUTE_FEATURE` call each.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use feature_plugin::{
    FeatureError, HostError,
    message::{
        AckResponse, ContextPayload, ExecutionResult, ExecutorMessage, PageId, Request, Response,
        SettingsMap,
    },
};
use serde_json::Value;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tracing::{debug, info, warn};

use crate::{
    channel::{CoordinatorHandle, ExecutorDirectory, ExecutorHandle, PageInfo, directory::Delivery},
    host::ExecutorInjector,
    menu::MenuItem,
    text_summary::{FEATURE_ID, MIN_SELECTION_CHARS, SELECTED_TEXT, feature::TOO_SHORT},
};

pub mod affordance;
pub mod surface;

pub use affordance::{AFFORDANCE_TIMEOUT, Affordance};
pub use surface::{NoticeLevel, PageSurface, RecordingSurface, SurfaceEvent, TracingSurface};

/// Client-side bound on one coordinator call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const TOO_SHORT_NOTICE: &str = TOO_SHORT;
pub const WORKING_NOTICE: &str = "Summarizing…";
pub const RETRY_NOTICE: &str = "request failed, try again";

/// Things that happen on the page itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Selection(String),
    AffordanceClicked,
    OutsideClick,
    Closed,
}

pub struct ExecutorClient {
    page: PageInfo,
    coordinator: CoordinatorHandle,
    directory: ExecutorDirectory,
    handle: ExecutorHandle,
    surface: Arc<dyn PageSurface>,
    settings: SettingsMap,
    selection: String,
    affordance_enabled: bool,
    affordance: Affordance,
    scope: MenuItem,
    timeout: Duration,
}

impl ExecutorClient {
    pub fn spawn(
        page: PageInfo,
        coordinator: CoordinatorHandle,
        directory: ExecutorDirectory,
        surface: Arc<dyn PageSurface>,
    ) -> ExecutorTask {
        Self::spawn_with_timeout(page, coordinator, directory, surface, REQUEST_TIMEOUT)
    }

    /// Attach to `directory` right away, then run on a task of its own.
    pub fn spawn_with_timeout(
        page: PageInfo,
        coordinator: CoordinatorHandle,
        directory: ExecutorDirectory,
        surface: Arc<dyn PageSurface>,
        timeout: Duration,
    ) -> ExecutorTask {
        let (handle, inbox) = directory.attach(page.id);
        let (events_tx, events_rx) = mpsc::channel(16);
        let page_id = page.id;

        let client = Self {
            page,
            coordinator,
            directory,
            handle,
            surface,
            settings: SettingsMap::new(),
            selection: String::new(),
            affordance_enabled: false,
            affordance: Affordance::default(),
            scope: MenuItem::summary(),
            timeout,
        };
        let join = tokio::spawn(client.run(inbox, events_rx));

        ExecutorTask {
            page: page_id,
            events: events_tx,
            join,
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Delivery>, mut events: mpsc::Receiver<PageEvent>) {
        self.refresh_settings().await;
        let mut events_open = true;

        loop {
            let deadline = self.affordance.deadline();
            // coordinator messages before page events
            tokio::select! {
                biased;
                delivery = inbox.recv() => match delivery {
                    Some((msg, ack)) => self.handle_message(msg, ack).await,
                    None => break,
                },
                event = events.recv(), if events_open => match event {
                    Some(PageEvent::Closed) => break,
                    Some(event) => self.handle_event(event).await,
                    None => events_open = false,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.dismiss_affordance();
                }
            }
        }

        self.dismiss_affordance();
        self.directory.detach(&self.handle);
        debug!(page = self.page.id, "executor finished");
    }

    async fn refresh_settings(&mut self) {
        match self.coordinator.call_with_timeout(Request::GetSettings, self.timeout).await {
            Ok(Response::Settings(r)) => self.settings = r.settings.to_map(),
            Ok(other) => warn!(page = self.page.id, "unexpected settings reply {other:?}"),
            Err(err) => warn!(page = self.page.id, error = %err, "could not load settings"),
        }
    }

    async fn handle_message(&mut self, msg: ExecutorMessage, ack: Option<tokio::sync::oneshot::Sender<AckResponse>>) {
        // ack first; the work below may take a while
        if let Some(ack) = ack {
            let _ = ack.send(AckResponse::ok());
        }
        match msg {
            ExecutorMessage::SummaryRequested { selected_text } => {
                self.handle_summary_request(&selected_text).await;
            }
            ExecutorMessage::UpdateConfig { config } => {
                self.settings.extend(config);
                debug!(page = self.page.id, "settings cache updated");
            }
            ExecutorMessage::ShowSelectionAffordance => self.affordance_enabled = true,
            ExecutorMessage::HideSelectionAffordance => {
                self.affordance_enabled = false;
                self.dismiss_affordance();
            }
        }
    }

    async fn handle_event(&mut self, event: PageEvent) {
        match event {
            PageEvent::Selection(text) => {
                self.selection = text;
                // same pages and selections the native menu entry would cover
                if self.affordance_enabled && self.scope.applies_to(&self.page.url, &self.selection) {
                    self.affordance.show();
                    self.surface.show_affordance(&self.selection);
                } else {
                    self.dismiss_affordance();
                }
            }
            PageEvent::AffordanceClicked => {
                if self.affordance.is_visible() {
                    self.dismiss_affordance();
                    let text = self.selection.clone();
                    self.handle_summary_request(&text).await;
                }
            }
            PageEvent::OutsideClick => self.dismiss_affordance(),
            PageEvent::Closed => {}
        }
    }

    fn dismiss_affordance(&mut self) {
        if self.affordance.hide() {
            self.surface.hide_affordance();
        }
    }

    async fn handle_summary_request(&mut self, text: &str) {
        if text.trim().chars().count() < MIN_SELECTION_CHARS {
            self.surface.notify(NoticeLevel::Warning, TOO_SHORT_NOTICE);
            return;
        }
        self.surface.notify(NoticeLevel::Info, WORKING_NOTICE);

        let mut settings = self.settings.clone();
        settings.insert(SELECTED_TEXT.to_string(), Value::String(text.to_string()));
        let request = Request::execute_feature(
            FEATURE_ID,
            ContextPayload {
                settings,
                url: self.page.url.clone(),
                page_id: Some(self.page.id),
            },
        );

        match self.coordinator.call_with_timeout(request, self.timeout).await {
            Ok(Response::Execution(ExecutionResult::Success { value })) => {
                let summary = value
                    .get("summary")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());
                info!(page = self.page.id, "summary shown");
                self.surface.show_result(&summary, text);
            }
            Ok(Response::Execution(ExecutionResult::Failure { reason })) => {
                self.surface.notify(NoticeLevel::Error, &reason);
            }
            Ok(other) => {
                warn!(page = self.page.id, "unexpected reply {other:?}");
                self.surface.notify(NoticeLevel::Error, RETRY_NOTICE);
            }
            Err(err) => {
                warn!(page = self.page.id, error = %err, "summary request failed");
                self.surface.notify(NoticeLevel::Error, RETRY_NOTICE);
            }
        }
    }
}

/// The page's grip on its executor.
#[derive(Debug)]
pub struct ExecutorTask {
    page: PageId,
    events: mpsc::Sender<PageEvent>,
    join: JoinHandle<()>,
}

impl ExecutorTask {
    pub fn page(&self) -> PageId {
        self.page
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn select(&self, text: &str) -> Result<(), FeatureError> {
        self.send(PageEvent::Selection(text.to_string())).await
    }

    pub async fn click_affordance(&self) -> Result<(), FeatureError> {
        self.send(PageEvent::AffordanceClicked).await
    }

    pub async fn click_outside(&self) -> Result<(), FeatureError> {
        self.send(PageEvent::OutsideClick).await
    }

    /// The page goes away.
    pub async fn close(self) {
        let _ = self.events.send(PageEvent::Closed).await;
        let _ = self.join.await;
    }

    async fn send(&self, event: PageEvent) -> Result<(), FeatureError> {
        self.events
            .send(event)
            .await
            .map_err(|_| FeatureError::ChannelUnreachable(format!("executor of page {} has stopped", self.page)))
    }
}

/// Re-injects executors into pages on the coordinator's behalf.
pub struct ExecutorSpawner {
    coordinator: CoordinatorHandle,
    directory: ExecutorDirectory,
    surface: Arc<dyn PageSurface>,
    timeout: Duration,
    tasks: DashMap<PageId, ExecutorTask>,
}

impl ExecutorSpawner {
    pub fn new(
        coordinator: CoordinatorHandle,
        directory: ExecutorDirectory,
        surface: Arc<dyn PageSurface>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            directory,
            surface,
            timeout,
            tasks: DashMap::new(),
        })
    }

    pub fn spawned(&self) -> usize {
        self.tasks.len()
    }

    pub async fn close_all(&self) {
        let pages: Vec<PageId> = self.tasks.iter().map(|kv| *kv.key()).collect();
        for page in pages {
            if let Some((_, task)) = self.tasks.remove(&page) {
                task.close().await;
            }
        }
    }
}

#[async_trait]
impl ExecutorInjector for ExecutorSpawner {
    async fn inject(&self, page: &PageInfo) -> Result<(), HostError> {
        if self.directory.get(page.id).is_some_and(|h| !h.is_closed()) {
            debug!(page = page.id, "executor already present");
            return Ok(());
        }
        if self.coordinator.is_closed() {
            return Err(HostError::Unavailable("coordinator is gone".into()));
        }
        let task = ExecutorClient::spawn_with_timeout(
            page.clone(),
            self.coordinator.clone(),
            self.directory.clone(),
            self.surface.clone(),
            self.timeout,
        );
        info!(page = page.id, "executor injected");
        if let Some(old) = self.tasks.insert(page.id, task) {
            old.close().await;
        }
        Ok(())
    }
}
