// src/apps.rs
use std::{sync::Arc, time::Duration};

use anyhow::Result;
use feature_plugin::{ConfigStore, FeatureError, Plugin};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    channel::{CoordinatorHandle, ExecutorDirectory, MessageRouter, PageInfo, spawn_coordinator},
    executor::{ExecutorClient, ExecutorSpawner, ExecutorTask, PageSurface},
    host::{ExecutorInjector, MenuApi},
    menu::{MenuClick, MenuResourceManager},
    plugin::PluginRegistry,
    settings::ensure_default_settings,
    text_summary::TextSummaryPlugin,
};

/// The plugins a stock coordinator starts with.
pub fn default_plugins() -> Result<Vec<Arc<dyn Plugin>>> {
    Ok(vec![Arc::new(TextSummaryPlugin::new()?)])
}

/// A running coordinator plus the pieces pages need to join it.
pub struct App {
    coordinator: CoordinatorHandle,
    directory: ExecutorDirectory,
    spawner: Arc<ExecutorSpawner>,
    surface: Arc<dyn PageSurface>,
    store: ConfigStore,
    client_timeout: Duration,
    actor: Option<JoinHandle<()>>,
}

impl App {
    /// Bootstraps the coordinator:
    ///   - seeds default settings on first run
    ///   - registers and activates `plugins` (one bad plugin does not stop the rest)
    ///   - registers the menu, natively or through the in-page fallback
    ///   - starts the coordinator task
    pub async fn bootstrap(
        store: ConfigStore,
        menu_api: Option<Arc<dyn MenuApi>>,
        surface: Arc<dyn PageSurface>,
        plugins: Vec<Arc<dyn Plugin>>,
        client_timeout: Duration,
    ) -> Result<App> {
        match ensure_default_settings(&store).await {
            Ok(true) => info!("default settings written"),
            Ok(false) => {}
            Err(err) => warn!(error = %err, "could not seed default settings"),
        }

        let directory = ExecutorDirectory::new();
        let (coordinator, inbox) = CoordinatorHandle::channel();
        let spawner = ExecutorSpawner::new(
            coordinator.clone(),
            directory.clone(),
            surface.clone(),
            client_timeout,
        );

        let injector: Arc<dyn ExecutorInjector> = spawner.clone();
        let menu = MenuResourceManager::new(menu_api, directory.clone(), Some(injector));
        let mut registry = PluginRegistry::new(store.clone(), menu);
        registry.initialize().await?;
        for plugin in plugins {
            let id = plugin.id().to_string();
            if let Err(err) = registry.register_plugin(plugin).await {
                error!(plugin = %id, error = %err, "plugin not registered");
            }
        }
        registry.activate().await?;
        info!(menu = %registry.menu().kind(), "coordinator ready");

        let router = MessageRouter::new(registry, store.clone(), directory.clone());
        let actor = spawn_coordinator(router, inbox);

        Ok(App {
            coordinator,
            directory,
            spawner,
            surface,
            store,
            client_timeout,
            actor: Some(actor),
        })
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    pub fn directory(&self) -> &ExecutorDirectory {
        &self.directory
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// A page loads and gets its executor.
    pub fn open_page(&self, page: PageInfo) -> ExecutorTask {
        ExecutorClient::spawn_with_timeout(
            page,
            self.coordinator.clone(),
            self.directory.clone(),
            self.surface.clone(),
            self.client_timeout,
        )
    }

    pub async fn menu_clicked(&self, click: MenuClick) -> Result<(), FeatureError> {
        self.coordinator.menu_clicked(click).await
    }

    /// Close every injected executor, dispose the registry and wait for the coordinator.
    pub async fn shutdown(mut self) {
        self.spawner.close_all().await;
        if let Err(err) = self.coordinator.shutdown().await {
            warn!(error = %err, "coordinator already stopped");
        }
        if let Some(actor) = self.actor.take() {
            if let Err(err) = actor.await {
                error!("coordinator task failed: {err}");
            }
        }
        info!("aiflow stopped");
    }
}
