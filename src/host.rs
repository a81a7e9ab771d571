// src/host.rs
//
// Host capabilities the coordinator talks to: the context-menu namespace and
// executor (re)injection. Every call goes through `external_call`.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use feature_plugin::HostError;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{channel::PageInfo, menu::MenuItem};

/// Upper bound on any single host API call.
pub const HOST_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Run one host call with the uniform timeout and logging.
pub async fn external_call<T, Fut>(op: &str, call: Fut) -> Result<T, HostError>
where
    Fut: Future<Output = Result<T, HostError>>,
{
    match timeout(HOST_CALL_TIMEOUT, call).await {
        Ok(Ok(value)) => {
            debug!(op, "host call succeeded");
            Ok(value)
        }
        Ok(Err(err)) => {
            warn!(op, error = %err, "host call failed");
            Err(err)
        }
        Err(_) => {
            let ms = HOST_CALL_TIMEOUT.as_millis() as u64;
            warn!(op, "host call timed out after {ms} ms");
            Err(HostError::Timeout(ms))
        }
    }
}

/// The host's context-menu namespace.
#[async_trait]
pub trait MenuApi: Send + Sync {
    async fn remove_all(&self) -> Result<(), HostError>;
    async fn create(&self, item: &MenuItem) -> Result<(), HostError>;
}

/// Puts a fresh executor into a page that lost (or never had) one.
#[async_trait]
pub trait ExecutorInjector: Send + Sync {
    async fn inject(&self, page: &PageInfo) -> Result<(), HostError>;
}

/// In-process menu namespace. Creating an id twice is rejected, like a real host does.
#[derive(Debug, Default)]
pub struct InMemoryMenuApi {
    items: DashMap<String, MenuItem>,
    unavailable: bool,
}

impl InMemoryMenuApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A namespace that refuses every call.
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            items: DashMap::new(),
            unavailable: true,
        })
    }

    pub fn items(&self) -> Vec<MenuItem> {
        self.items.iter().map(|kv| kv.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn check(&self) -> Result<(), HostError> {
        if self.unavailable {
            Err(HostError::Unavailable("contextMenus".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MenuApi for InMemoryMenuApi {
    async fn remove_all(&self) -> Result<(), HostError> {
        self.check()?;
        self.items.clear();
        Ok(())
    }

    async fn create(&self, item: &MenuItem) -> Result<(), HostError> {
        self.check()?;
        if self.items.contains_key(&item.id) {
            return Err(HostError::Rejected(format!(
                "cannot create item with duplicate id {}",
                item.id
            )));
        }
        self.items.insert(item.id.clone(), item.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let api = InMemoryMenuApi::new();
        let item = MenuItem::summary();
        api.create(&item).await.unwrap();
        assert!(matches!(api.create(&item).await, Err(HostError::Rejected(_))));

        api.remove_all().await.unwrap();
        api.create(&item).await.unwrap();
        assert_eq!(api.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_call_times_out() {
        let res: Result<(), HostError> = external_call("never", pending()).await;
        assert_eq!(res, Err(HostError::Timeout(HOST_CALL_TIMEOUT.as_millis() as u64)));
    }

    #[tokio::test]
    async fn test_external_call_passes_errors_through() {
        let api = InMemoryMenuApi::unavailable();
        let res = external_call("menus.removeAll", api.remove_all()).await;
        assert!(matches!(res, Err(HostError::Unavailable(_))));
    }
}
