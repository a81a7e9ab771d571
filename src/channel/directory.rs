use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use feature_plugin::{
    FeatureError,
    message::{AckResponse, ExecutorMessage, PageId},
};
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tracing::{debug, info, warn};

/// A message for an executor plus, when the sender wants one, the ack sink.
pub type Delivery = (ExecutorMessage, Option<oneshot::Sender<AckResponse>>);

pub const INBOX_CAPACITY: usize = 16;

/// How long a direct request waits for the executor's ack.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// The coordinator's way into one executor.
#[derive(Clone, Debug)]
pub struct ExecutorHandle {
    page: PageId,
    tx: mpsc::Sender<Delivery>,
}

impl ExecutorHandle {
    pub fn page(&self) -> PageId {
        self.page
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn same_channel(&self, other: &ExecutorHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Send and wait for the single ack.
    pub async fn request(&self, msg: ExecutorMessage) -> Result<AckResponse, FeatureError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send((msg, Some(ack_tx)))
            .await
            .map_err(|_| FeatureError::ChannelUnreachable(format!("page {} has no executor", self.page)))?;

        match timeout(ACK_TIMEOUT, ack_rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(FeatureError::ChannelUnreachable(format!(
                "executor of page {} dropped the request",
                self.page
            ))),
            Err(_) => Err(FeatureError::Timeout(ACK_TIMEOUT.as_millis() as u64)),
        }
    }

    /// Fire and forget. Never waits on a full inbox.
    pub fn notify(&self, msg: ExecutorMessage) -> Result<(), FeatureError> {
        self.tx.try_send((msg, None)).map_err(|err| {
            FeatureError::ChannelUnreachable(format!("page {}: {err}", self.page))
        })
    }
}

/// Outcome of a best-effort broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Every executor the coordinator currently knows about.
///
/// Shared because click dispatch runs outside the coordinator's turn.
#[derive(Clone, Debug, Default)]
pub struct ExecutorDirectory {
    executors: Arc<DashMap<PageId, ExecutorHandle>>,
    affordance: Arc<AtomicBool>,
}

impl ExecutorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the executor of `page`, replacing whatever was there before.
    /// A late joiner gets the selection affordance if it is switched on.
    pub fn attach(&self, page: PageId) -> (ExecutorHandle, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let handle = ExecutorHandle { page, tx };
        if self.affordance_enabled() {
            let _ = handle.notify(ExecutorMessage::ShowSelectionAffordance);
        }
        if self.executors.insert(page, handle.clone()).is_some() {
            debug!(page, "replaced executor");
        } else {
            info!(page, "executor attached");
        }
        (handle, rx)
    }

    /// Remove `handle`, unless a newer executor already took its page.
    pub fn detach(&self, handle: &ExecutorHandle) {
        if self
            .executors
            .remove_if(&handle.page, |_, current| current.same_channel(handle))
            .is_some()
        {
            info!(page = handle.page, "executor detached");
        }
    }

    pub fn get(&self, page: PageId) -> Option<ExecutorHandle> {
        self.executors.get(&page).map(|h| h.value().clone())
    }

    pub fn pages(&self) -> Vec<PageId> {
        self.executors.iter().map(|kv| *kv.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    pub fn set_affordance(&self, enabled: bool) {
        self.affordance.store(enabled, Ordering::SeqCst);
    }

    pub fn affordance_enabled(&self) -> bool {
        self.affordance.load(Ordering::SeqCst)
    }

    /// Send `msg` to every executor independently. Dead executors are dropped
    /// from the directory; nothing here fails the caller.
    pub fn broadcast(&self, msg: ExecutorMessage) -> BroadcastReport {
        let targets: Vec<ExecutorHandle> = self.executors.iter().map(|kv| kv.value().clone()).collect();
        let mut report = BroadcastReport::default();

        for handle in targets {
            match handle.notify(msg.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(page = handle.page, error = %err, "broadcast {} not delivered", msg.kind());
                    if handle.is_closed() {
                        self.detach(&handle);
                    }
                }
            }
        }

        debug!(
            delivered = report.delivered,
            failed = report.failed,
            "broadcast {}",
            msg.kind()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn test_broadcast_skips_dead_executors() {
        let directory = ExecutorDirectory::new();
        let mut alive = vec![];
        for page in 0..5 {
            let (_, rx) = directory.attach(page);
            if page % 2 == 0 {
                alive.push(rx);
            }
        }

        let report = directory.broadcast(ExecutorMessage::UpdateConfig { config: Map::new() });
        assert_eq!(report, BroadcastReport { delivered: 3, failed: 2 });
        assert_eq!(directory.len(), 3);

        for rx in alive.iter_mut() {
            let (msg, ack) = rx.recv().await.unwrap();
            assert_eq!(msg.kind(), "UPDATE_CONFIG");
            assert!(ack.is_none());
        }
    }

    #[tokio::test]
    async fn test_late_joiner_sees_affordance() {
        let directory = ExecutorDirectory::new();
        directory.set_affordance(true);
        let (_, mut rx) = directory.attach(9);
        let (msg, _) = rx.recv().await.unwrap();
        assert_eq!(msg, ExecutorMessage::ShowSelectionAffordance);
    }

    #[tokio::test]
    async fn test_stale_detach_keeps_newer_executor() {
        let directory = ExecutorDirectory::new();
        let (old, _old_rx) = directory.attach(1);
        let (new, _new_rx) = directory.attach(1);

        directory.detach(&old);
        assert!(directory.get(1).is_some_and(|h| h.same_channel(&new)));

        directory.detach(&new);
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn test_request_without_reader_is_unreachable() {
        let directory = ExecutorDirectory::new();
        let (handle, rx) = directory.attach(3);
        drop(rx);
        let res = handle
            .request(ExecutorMessage::SummaryRequested { selected_text: "x".into() })
            .await;
        assert!(matches!(res, Err(FeatureError::ChannelUnreachable(_))));
    }
}
