use async_trait::async_trait;
use feature_plugin::{HostError, message::ExecutorMessage};
use tracing::debug;

use super::{MenuItem, MenuKind, MenuStrategy};
use crate::channel::ExecutorDirectory;

/// In-page affordance next to the selection, for hosts without a menu API.
/// Executors attaching later pick the flag up from the directory.
pub struct FallbackMenuStrategy {
    directory: ExecutorDirectory,
}

impl FallbackMenuStrategy {
    pub fn new(directory: ExecutorDirectory) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl MenuStrategy for FallbackMenuStrategy {
    fn kind(&self) -> MenuKind {
        MenuKind::Fallback
    }

    async fn register(&self, item: &MenuItem) -> Result<(), HostError> {
        self.directory.set_affordance(true);
        let report = self.directory.broadcast(ExecutorMessage::ShowSelectionAffordance);
        debug!(delivered = report.delivered, "affordance for `{}` enabled", item.id);
        Ok(())
    }

    async fn unregister(&self) -> Result<(), HostError> {
        if self.directory.affordance_enabled() {
            self.directory.set_affordance(false);
            self.directory.broadcast(ExecutorMessage::HideSelectionAffordance);
        }
        Ok(())
    }
}
