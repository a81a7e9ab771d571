use std::sync::Arc;

use async_trait::async_trait;
use feature_plugin::HostError;

use super::{MenuItem, MenuKind, MenuStrategy};
use crate::host::{MenuApi, external_call};

/// The host's own context menu.
pub struct NativeMenuStrategy {
    api: Arc<dyn MenuApi>,
}

impl NativeMenuStrategy {
    pub fn new(api: Arc<dyn MenuApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl MenuStrategy for NativeMenuStrategy {
    fn kind(&self) -> MenuKind {
        MenuKind::Native
    }

    /// Clear the namespace first so a leftover entry from an earlier run
    /// cannot collide with the fixed id.
    async fn register(&self, item: &MenuItem) -> Result<(), HostError> {
        external_call("menus.removeAll", self.api.remove_all()).await?;
        external_call("menus.create", self.api.create(item)).await
    }

    async fn unregister(&self) -> Result<(), HostError> {
        external_call("menus.removeAll", self.api.remove_all()).await
    }
}
