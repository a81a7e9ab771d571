use std::sync::Arc;

use feature_plugin::{
    ConfigStore, Feature, FeatureError, Plugin, PluginStatus,
    message::{PluginConfig, PluginConfigPatch, PluginStatusInfo, SettingsMap},
};
use tracing::{debug, info, warn};

pub fn config_key(plugin_id: &str) -> String {
    format!("plugin_config_{plugin_id}")
}

/// A registered plugin together with the state the registry keeps for it.
pub struct PluginWrapper {
    plugin: Arc<dyn Plugin>,
    features: Vec<Arc<dyn Feature>>,
    status: PluginStatus,
    config: PluginConfig,
    last_error: Option<String>,
}

impl PluginWrapper {
    pub fn new(plugin: Arc<dyn Plugin>) -> Self {
        let features = plugin.features();
        let config = plugin.default_config();
        Self {
            plugin,
            features,
            status: PluginStatus::Unloaded,
            config,
            last_error: None,
        }
    }

    pub fn id(&self) -> &str {
        self.plugin.id()
    }

    pub fn status(&self) -> PluginStatus {
        self.status
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// `Unloaded → Initializing → Initialized`.
    ///
    /// Stored config overrides the plugin defaults key by key. A missing or
    /// unreadable record just means defaults.
    pub async fn initialize(&mut self, store: &ConfigStore) -> Result<(), FeatureError> {
        self.status.transition(PluginStatus::Initializing)?;

        let mut config = self.plugin.default_config();
        match store.get_as::<Option<PluginConfig>>(&config_key(self.id()), None).await {
            Ok(Some(stored)) => {
                config.enabled = stored.enabled;
                config.settings.extend(stored.settings);
                config.last_updated = stored.last_updated;
                debug!(plugin = self.id(), "loaded stored config");
            }
            Ok(None) => {}
            Err(err) => warn!(plugin = self.id(), error = %err, "stored config unreadable, using defaults"),
        }
        self.config = config;

        match self.plugin.on_initialize(&self.config).await {
            Ok(()) => {
                self.status.transition(PluginStatus::Initialized)?;
                info!(plugin = self.id(), version = self.plugin.version(), "plugin initialized");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// `Initialized → Activating → Active`. Already active is fine.
    pub async fn activate(&mut self) -> Result<(), FeatureError> {
        if self.status == PluginStatus::Active {
            return Ok(());
        }
        self.status.transition(PluginStatus::Activating)?;
        match self.plugin.on_activate().await {
            Ok(()) => {
                self.status.transition(PluginStatus::Active)?;
                info!(plugin = self.id(), "plugin active");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// `Active → Deactivating → Initialized`; a no-op otherwise.
    pub async fn deactivate(&mut self) -> Result<(), FeatureError> {
        if self.status != PluginStatus::Active {
            return Ok(());
        }
        self.status.transition(PluginStatus::Deactivating)?;
        self.plugin.on_deactivate().await;
        self.status.transition(PluginStatus::Initialized)
    }

    /// Terminal. Releases the features.
    pub async fn dispose(&mut self) {
        if self.status == PluginStatus::Active {
            if let Err(err) = self.status.transition(PluginStatus::Deactivating) {
                warn!(plugin = self.id(), error = %err, "cannot deactivate before dispose");
            } else {
                self.plugin.on_deactivate().await;
            }
        }
        if self.status.can_transition_to(PluginStatus::Disposed) {
            let _ = self.status.transition(PluginStatus::Disposed);
        }
        self.features.clear();
        debug!(plugin = self.id(), status = %self.status, "plugin released");
    }

    pub fn find_feature(&self, feature_id: &str) -> Option<Arc<dyn Feature>> {
        self.features.iter().find(|f| f.id() == feature_id).cloned()
    }

    pub fn status_info(&self) -> PluginStatusInfo {
        let runnable = self.status == PluginStatus::Active && self.config.enabled;
        PluginStatusInfo {
            plugin_id: self.id().to_string(),
            name: self.plugin.name().to_string(),
            version: self.plugin.version().to_string(),
            status: self.status,
            enabled: self.config.enabled,
            features_count: self.features.len(),
            active_features: if runnable { self.features.len() } else { 0 },
        }
    }

    /// Merge `patch`, persist under `plugin_config_<id>` and return the settings.
    /// The live config only changes once the store accepted the write.
    pub async fn set_config(
        &mut self,
        patch: PluginConfigPatch,
        store: &ConfigStore,
    ) -> Result<SettingsMap, FeatureError> {
        let mut next = self.config.clone();
        next.apply(patch);
        store.set_as(&config_key(self.id()), &next).await?;
        self.config = next;
        info!(plugin = self.id(), enabled = self.config.enabled, "plugin config updated");
        Ok(self.config.settings.clone())
    }

    fn fail(&mut self, err: anyhow::Error) -> FeatureError {
        let reason = format!("{err:#}");
        if let Err(bad) = self.status.transition(PluginStatus::Failed) {
            warn!(plugin = self.id(), error = %bad, "could not mark plugin failed");
        }
        warn!(plugin = self.id(), "plugin failed: {reason}");
        self.last_error = Some(reason.clone());
        FeatureError::PluginFailed(self.id().to_string(), reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_plugin::plugin_test_util::{FailingConfigStore, StaticBehaviour, StaticFeature, StaticPlugin};
    use serde_json::{Value, json};

    fn plugin(id: &str) -> Arc<StaticPlugin> {
        Arc::new(StaticPlugin::new(
            id,
            vec![StaticFeature::new("echo", StaticBehaviour::Succeed(Value::Null))],
        ))
    }

    #[tokio::test]
    async fn test_full_lifecycle_and_hooks() {
        let inner = plugin("p");
        let mut wrapper = PluginWrapper::new(inner.clone());
        let store = ConfigStore::in_memory();

        wrapper.initialize(&store).await.unwrap();
        wrapper.activate().await.unwrap();
        assert_eq!(wrapper.status_info().active_features, 1);

        wrapper.deactivate().await.unwrap();
        assert_eq!(wrapper.status(), PluginStatus::Initialized);
        wrapper.activate().await.unwrap();
        wrapper.dispose().await;

        assert_eq!(wrapper.status(), PluginStatus::Disposed);
        assert!(wrapper.find_feature("echo").is_none());
        assert_eq!(
            inner.calls(),
            vec!["initialize", "activate", "deactivate", "activate", "deactivate"]
        );
    }

    #[tokio::test]
    async fn test_activation_error_marks_failed() {
        let inner = Arc::new(StaticPlugin::new("bad", vec![]).failing_activation());
        let mut wrapper = PluginWrapper::new(inner);
        wrapper.initialize(&ConfigStore::in_memory()).await.unwrap();

        let err = wrapper.activate().await.unwrap_err();
        assert!(matches!(err, FeatureError::PluginFailed(ref id, _) if id == "bad"));
        assert_eq!(wrapper.status(), PluginStatus::Failed);
        assert!(wrapper.last_error().unwrap().contains("activation refused"));
        assert!(wrapper.activate().await.is_err());
    }

    #[tokio::test]
    async fn test_stored_config_overrides_defaults() {
        let store = ConfigStore::in_memory();
        store
            .set(
                &config_key("p"),
                json!({ "enabled": false, "settings": { "language": "en" }, "lastUpdated": "2024-01-01T00:00:00Z" }),
            )
            .await
            .unwrap();

        let mut wrapper = PluginWrapper::new(plugin("p"));
        wrapper.initialize(&store).await.unwrap();
        assert!(!wrapper.config().enabled);
        assert_eq!(wrapper.config().settings["language"], json!("en"));
    }

    #[tokio::test]
    async fn test_unreadable_config_falls_back() {
        let failing = FailingConfigStore::broken();
        let store = ConfigStore::new(failing);
        let mut wrapper = PluginWrapper::new(plugin("p"));
        wrapper.initialize(&store).await.unwrap();
        assert!(wrapper.config().enabled);
        assert_eq!(wrapper.status(), PluginStatus::Initialized);
    }

    #[tokio::test]
    async fn test_set_config_persists() {
        let store = ConfigStore::in_memory();
        let mut wrapper = PluginWrapper::new(plugin("p"));
        wrapper.initialize(&store).await.unwrap();

        let settings = wrapper
            .set_config(
                PluginConfigPatch {
                    enabled: Some(false),
                    settings: json!({ "maxLength": 80 }).as_object().cloned(),
                },
                &store,
            )
            .await
            .unwrap();
        assert_eq!(settings["maxLength"], json!(80));

        let stored: PluginConfig = store.get_as(&config_key("p"), PluginConfig::default()).await.unwrap();
        assert!(!stored.enabled);
    }

    #[tokio::test]
    async fn test_failed_config_write_keeps_live_config() {
        let store = ConfigStore::new(FailingConfigStore::read_only());
        let mut wrapper = PluginWrapper::new(plugin("p"));
        wrapper.initialize(&store).await.unwrap();
        wrapper.activate().await.unwrap();
        let before = wrapper.config().clone();

        let err = wrapper
            .set_config(
                PluginConfigPatch {
                    enabled: Some(false),
                    settings: json!({ "language": "en" }).as_object().cloned(),
                },
                &store,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FeatureError::ExternalCall(_)));
        assert_eq!(wrapper.config(), &before);
        assert!(wrapper.status_info().enabled);
        assert_eq!(wrapper.status_info().active_features, 1);
    }
}
