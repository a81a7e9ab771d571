use std::{panic::AssertUnwindSafe, sync::Arc};

use feature_plugin::{
    ConfigStore, ExecutionContext, FeatureError, Plugin, PluginStatus,
    message::{ExecutionResult, PluginConfigPatch, PluginStatusInfo},
};
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::PluginWrapper;
use crate::menu::{ClickDispatcher, MenuResourceManager};

/// Owns every plugin, drives their lifecycle and runs features.
///
/// Lives inside the coordinator task; `&mut self` methods only ever run on
/// its turn.
pub struct PluginRegistry {
    state: PluginStatus,
    plugins: Vec<PluginWrapper>,
    store: ConfigStore,
    menu: MenuResourceManager,
}

impl PluginRegistry {
    pub fn new(store: ConfigStore, menu: MenuResourceManager) -> Self {
        Self {
            state: PluginStatus::Unloaded,
            plugins: vec![],
            store,
            menu,
        }
    }

    pub fn state(&self) -> PluginStatus {
        self.state
    }

    pub fn menu(&self) -> &MenuResourceManager {
        &self.menu
    }

    pub fn click_dispatcher(&self) -> ClickDispatcher {
        self.menu.dispatcher()
    }

    /// `Unloaded → Initializing → Initialized`. Calling it again is a no-op.
    pub async fn initialize(&mut self) -> Result<(), FeatureError> {
        if self.state.is_ready() {
            return Ok(());
        }
        if self.state == PluginStatus::Disposed {
            return Err(FeatureError::Disposed);
        }
        // plugins can only be registered once this has run; each one is
        // initialized by `register_plugin`
        self.state.transition(PluginStatus::Initializing)?;
        self.state.transition(PluginStatus::Initialized)?;
        info!("plugin registry initialized");
        Ok(())
    }

    /// Add a plugin, or replace the one with the same id in place.
    ///
    /// The replaced plugin is deactivated and disposed first. A plugin added to
    /// an active registry is activated right away.
    pub async fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), FeatureError> {
        if self.state == PluginStatus::Disposed {
            return Err(FeatureError::Disposed);
        }
        if !self.state.is_ready() {
            return Err(FeatureError::NotInitialized(format!(
                "registry is {}, cannot register `{}`",
                self.state,
                plugin.id()
            )));
        }

        let id = plugin.id().to_string();
        let slot = self.plugins.iter().position(|p| p.id() == id);
        if let Some(i) = slot {
            let mut old = self.plugins.remove(i);
            info!(plugin = %id, "replacing registered plugin");
            if let Err(err) = old.deactivate().await {
                warn!(plugin = %id, error = %err, "old plugin did not deactivate cleanly");
            }
            old.dispose().await;
        }

        let mut wrapper = PluginWrapper::new(plugin);
        let mut result = wrapper.initialize(&self.store).await;
        if result.is_ok() && self.state == PluginStatus::Active {
            result = wrapper.activate().await;
        }

        match slot {
            Some(i) => self.plugins.insert(i, wrapper),
            None => self.plugins.push(wrapper),
        }
        debug!(plugin = %id, total = self.plugins.len(), "plugin registered");
        result
    }

    /// `Initialized → Activating → Active`, activating every ready plugin and
    /// registering the menu entry. A plugin whose hook fails ends up `Failed`;
    /// the others carry on.
    pub async fn activate(&mut self) -> Result<(), FeatureError> {
        if self.state == PluginStatus::Active {
            return Ok(());
        }
        if self.state == PluginStatus::Disposed {
            return Err(FeatureError::Disposed);
        }
        self.state.transition(PluginStatus::Activating)?;

        for wrapper in self.plugins.iter_mut() {
            if wrapper.status() != PluginStatus::Initialized {
                continue;
            }
            if let Err(err) = wrapper.activate().await {
                error!(plugin = wrapper.id(), error = %err, "plugin failed to activate");
            }
        }

        let kind = self.menu.register().await;
        self.state.transition(PluginStatus::Active)?;
        info!(menu = %kind, "plugin registry active");
        Ok(())
    }

    /// `Active → Deactivating → Initialized`. The registry can be activated again.
    pub async fn deactivate(&mut self) -> Result<(), FeatureError> {
        if self.state != PluginStatus::Active {
            return Ok(());
        }
        self.state.transition(PluginStatus::Deactivating)?;
        for wrapper in self.plugins.iter_mut() {
            if let Err(err) = wrapper.deactivate().await {
                warn!(plugin = wrapper.id(), error = %err, "plugin did not deactivate cleanly");
            }
        }
        self.menu.unregister().await;
        self.state.transition(PluginStatus::Initialized)?;
        info!("plugin registry deactivated");
        Ok(())
    }

    /// Terminal: releases every plugin and the menu entry.
    pub async fn dispose(&mut self) -> Result<(), FeatureError> {
        if self.state == PluginStatus::Disposed {
            return Ok(());
        }
        self.deactivate().await?;
        for mut wrapper in self.plugins.drain(..) {
            wrapper.dispose().await;
        }
        self.menu.unregister().await;
        self.state.transition(PluginStatus::Disposed)?;
        info!("plugin registry disposed");
        Ok(())
    }

    pub fn get_status(&self, plugin_id: &str) -> Option<PluginStatusInfo> {
        self.plugins
            .iter()
            .find(|p| p.id() == plugin_id)
            .map(PluginWrapper::status_info)
    }

    pub fn get_all_status(&self) -> Vec<PluginStatusInfo> {
        self.plugins.iter().map(PluginWrapper::status_info).collect()
    }

    /// Never fails: every problem comes back as a `Failure`.
    pub async fn execute_feature(&self, feature_id: &str, ctx: ExecutionContext) -> ExecutionResult {
        match self.try_execute(feature_id, &ctx).await {
            Ok(result) => result,
            Err(err) => {
                debug!(feature = feature_id, error = %err, "feature not executed");
                err.into()
            }
        }
    }

    async fn try_execute(&self, feature_id: &str, ctx: &ExecutionContext) -> Result<ExecutionResult, FeatureError> {
        if self.state != PluginStatus::Active {
            return Err(FeatureError::NotInitialized(format!("plugin registry is {}", self.state)));
        }

        let (wrapper, feature) = self
            .plugins
            .iter()
            .find_map(|w| w.find_feature(feature_id).map(|f| (w, f)))
            .ok_or_else(|| FeatureError::NotFound(format!("feature `{feature_id}`")))?;

        if wrapper.status() != PluginStatus::Active {
            return Err(FeatureError::NotInitialized(format!(
                "plugin `{}` is {}",
                wrapper.id(),
                wrapper.status()
            )));
        }
        if !wrapper.config().enabled {
            return Err(FeatureError::Precondition(format!("plugin `{}` is disabled", wrapper.id())));
        }
        if !feature.is_applicable(&ctx.url) {
            return Err(FeatureError::Precondition(format!(
                "feature `{feature_id}` does not apply to this page"
            )));
        }
        if !feature.can_execute(ctx).await {
            return Err(FeatureError::Precondition(format!(
                "feature `{feature_id}` cannot run: no text selected, text too short, or feature not configured"
            )));
        }

        match AssertUnwindSafe(feature.execute(ctx)).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => {
                warn!(feature = feature_id, error = %err, "feature returned an error");
                Ok(FeatureError::PluginFailed(wrapper.id().to_string(), format!("{err:#}")).into())
            }
            Err(_) => {
                error!(feature = feature_id, "feature panicked");
                Ok(FeatureError::PluginFailed(wrapper.id().to_string(), format!("feature `{feature_id}` panicked")).into())
            }
        }
    }

    /// Merge into `plugin_config_<id>`, persist, and hand the new settings to the menu manager.
    pub async fn set_plugin_config(&mut self, plugin_id: &str, patch: PluginConfigPatch) -> Result<(), FeatureError> {
        let wrapper = self
            .plugins
            .iter_mut()
            .find(|p| p.id() == plugin_id)
            .ok_or_else(|| FeatureError::NotFound(format!("plugin `{plugin_id}`")))?;
        let settings = wrapper.set_config(patch, &self.store).await?;
        self.menu.update_settings(settings).await;
        Ok(())
    }
}
