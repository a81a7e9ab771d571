use std::{sync::Arc, time::Duration};

use feature_plugin::{FeatureError, message::ExecutorMessage};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{MENU_ID, MenuClick, MenuItem};
use crate::{
    channel::{ExecutorDirectory, PageInfo},
    host::{ExecutorInjector, external_call},
};

/// Pause between re-injecting an executor and the single retry.
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not ours, nothing selected, or no page to send to.
    Ignored,
    Delivered,
    DeliveredAfterRetry,
    /// Both attempts failed; logged and given up on.
    Dropped,
}

/// Forwards menu clicks to the executor of the page they came from.
///
/// Policy: one attempt, one re-injection, one retry after [`RETRY_DELAY`].
/// Never more.
#[derive(Clone)]
pub struct ClickDispatcher {
    directory: ExecutorDirectory,
    injector: Option<Arc<dyn ExecutorInjector>>,
    scope: MenuItem,
}

impl ClickDispatcher {
    pub fn new(directory: ExecutorDirectory, injector: Option<Arc<dyn ExecutorInjector>>) -> Self {
        Self {
            directory,
            injector,
            scope: MenuItem::summary(),
        }
    }

    pub async fn dispatch(&self, click: MenuClick) -> DispatchOutcome {
        if click.menu_item_id != MENU_ID {
            debug!("ignoring click on `{}`", click.menu_item_id);
            return DispatchOutcome::Ignored;
        }
        if click.selection_text.trim().is_empty() {
            debug!("ignoring click without a selection");
            return DispatchOutcome::Ignored;
        }
        let Some(page) = click.page else {
            warn!("menu click has no originating page");
            return DispatchOutcome::Ignored;
        };
        if !self.scope.applies_to(&page.url, &click.selection_text) {
            debug!(page = page.id, "page `{}` is outside the menu scope", page.url);
            return DispatchOutcome::Ignored;
        }

        let msg = ExecutorMessage::SummaryRequested {
            selected_text: click.selection_text,
        };

        match self.forward(&page, msg.clone()).await {
            Ok(()) => return DispatchOutcome::Delivered,
            Err(err) => debug!(page = page.id, error = %err, "first delivery failed"),
        }

        self.reinject(&page).await;
        sleep(RETRY_DELAY).await;

        match self.forward(&page, msg).await {
            Ok(()) => {
                info!(page = page.id, "summary request delivered after re-injection");
                DispatchOutcome::DeliveredAfterRetry
            }
            Err(err) => {
                warn!(page = page.id, error = %err, "dropping summary request");
                DispatchOutcome::Dropped
            }
        }
    }

    async fn forward(&self, page: &PageInfo, msg: ExecutorMessage) -> Result<(), FeatureError> {
        let handle = self
            .directory
            .get(page.id)
            .ok_or_else(|| FeatureError::ChannelUnreachable(format!("page {} has no executor", page.id)))?;
        let ack = handle.request(msg).await?;
        if ack.success {
            Ok(())
        } else {
            Err(FeatureError::ChannelUnreachable(
                ack.error.unwrap_or_else(|| "executor refused".to_string()),
            ))
        }
    }

    async fn reinject(&self, page: &PageInfo) {
        let Some(injector) = &self.injector else {
            debug!(page = page.id, "no injector configured");
            return;
        };
        if let Err(err) = external_call("scripting.executeScript", injector.inject(page)).await {
            warn!(page = page.id, error = %err, "executor re-injection failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use feature_plugin::{HostError, message::AckResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn click(page: Option<PageInfo>, text: &str) -> MenuClick {
        MenuClick {
            menu_item_id: MENU_ID.to_string(),
            selection_text: text.to_string(),
            page,
        }
    }

    /// Attaches an executor that acks everything.
    struct AckingInjector {
        directory: ExecutorDirectory,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExecutorInjector for AckingInjector {
        async fn inject(&self, page: &PageInfo) -> Result<(), HostError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (_, mut rx) = self.directory.attach(page.id);
            tokio::spawn(async move {
                while let Some((_, ack)) = rx.recv().await {
                    if let Some(ack) = ack {
                        let _ = ack.send(AckResponse::ok());
                    }
                }
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ignores_foreign_and_empty_clicks() {
        let dispatcher = ClickDispatcher::new(ExecutorDirectory::new(), None);
        let page = Some(PageInfo::new(1, "https://example.com"));

        let mut foreign = click(page.clone(), "text");
        foreign.menu_item_id = "other".into();
        assert_eq!(dispatcher.dispatch(foreign).await, DispatchOutcome::Ignored);
        assert_eq!(dispatcher.dispatch(click(page, "  ")).await, DispatchOutcome::Ignored);
        assert_eq!(dispatcher.dispatch(click(None, "text")).await, DispatchOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_ignores_pages_outside_scope() {
        let directory = ExecutorDirectory::new();
        let injector = Arc::new(AckingInjector {
            directory: directory.clone(),
            calls: AtomicUsize::new(0),
        });
        let dispatcher = ClickDispatcher::new(directory.clone(), Some(injector.clone()));

        for url in ["file:///home/user/notes.txt", "chrome://settings"] {
            let outcome = dispatcher
                .dispatch(click(Some(PageInfo::new(9, url)), "some selected text"))
                .await;
            assert_eq!(outcome, DispatchOutcome::Ignored);
        }
        assert_eq!(injector.calls.load(Ordering::SeqCst), 0);
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn test_retry_after_reinjection() {
        let directory = ExecutorDirectory::new();
        let injector = Arc::new(AckingInjector {
            directory: directory.clone(),
            calls: AtomicUsize::new(0),
        });
        let dispatcher = ClickDispatcher::new(directory, Some(injector.clone()));

        let outcome = dispatcher
            .dispatch(click(Some(PageInfo::new(4, "https://example.com")), "some selected text"))
            .await;
        assert_eq!(outcome, DispatchOutcome::DeliveredAfterRetry);
        assert_eq!(injector.calls.load(Ordering::SeqCst), 1);

        // executor is there now: no second injection
        let outcome = dispatcher
            .dispatch(click(Some(PageInfo::new(4, "https://example.com")), "again"))
            .await;
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(injector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_failure_is_dropped() {
        let dispatcher = ClickDispatcher::new(ExecutorDirectory::new(), None);
        let outcome = dispatcher
            .dispatch(click(Some(PageInfo::new(2, "https://example.com")), "text"))
            .await;
        assert_eq!(outcome, DispatchOutcome::Dropped);
    }
}
