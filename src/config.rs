use std::{env, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use feature_plugin::{ConfigStoreType, HostError, plugin::LogLevel};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::executor::REQUEST_TIMEOUT;

pub const ROOT_ENV: &str = "AIFLOW_ROOT";
pub const LOG_LEVEL_ENV: &str = "AIFLOW_LOG_LEVEL";
pub const STORE_FILE_ENV: &str = "AIFLOW_STORE_FILE";
pub const LOG_DIR_ENV: &str = "AIFLOW_LOG_DIR";
pub const CLIENT_TIMEOUT_ENV: &str = "AIFLOW_CLIENT_TIMEOUT_SECS";

/// Resolve the aiflow root directory from the environment or use default.
pub fn resolve_root_dir() -> PathBuf {
    if let Ok(path) = env::var(ROOT_ENV) {
        PathBuf::from(path)
    } else {
        PathBuf::from("./aiflow")
    }
}

/// Everything the coordinator process needs before it can start.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub root: PathBuf,
    pub log_level: LogLevel,
    pub log_dir: Option<PathBuf>,
    pub store_file: PathBuf,
    pub client_timeout: Duration,
}

impl CoordinatorConfig {
    /// Defaults for `root`, before any environment is applied.
    pub fn new(root: PathBuf) -> Self {
        Self {
            log_dir: Some(root.join("logs")),
            store_file: root.join("store.json"),
            root,
            log_level: LogLevel::Info,
            client_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Load `<root>/.env` (if any) and apply the `AIFLOW_*` variables.
    pub fn from_env(root: PathBuf) -> Self {
        let env_file = root.join(".env");
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => info!("Loaded .env from {}", env_file.display()),
                Err(err) => error!("could not load .env from {}: {err}", env_file.display()),
            }
        }

        let mut config = Self::new(root);
        if let Ok(level) = env::var(LOG_LEVEL_ENV) {
            config.log_level = LogLevel::from(level.as_str());
        }
        if let Ok(file) = env::var(STORE_FILE_ENV) {
            config.store_file = PathBuf::from(file);
        }
        if let Ok(dir) = env::var(LOG_DIR_ENV) {
            config.log_dir = if dir.is_empty() { None } else { Some(PathBuf::from(dir)) };
        }
        if let Some(secs) = env::var(CLIENT_TIMEOUT_ENV).ok().and_then(|s| s.parse::<u64>().ok()) {
            config.client_timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// JSON-file backed store. Reads come from memory; every write rewrites the file.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    cache: DashMap<String, Value>,
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    pub async fn open(path: PathBuf) -> anyhow::Result<Arc<Self>> {
        let cache = DashMap::new();
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            if !text.trim().is_empty() {
                let map: Map<String, Value> = serde_json::from_str(&text)
                    .with_context(|| format!("{} is not a JSON object", path.display()))?;
                for (key, value) in map {
                    cache.insert(key, value);
                }
            }
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        info!("config store at {} ({} keys)", path.display(), cache.len());
        Ok(Arc::new(Self {
            path,
            cache,
            write_lock: Mutex::new(()),
        }))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn flush(&self) -> Result<(), HostError> {
        let _guard = self.write_lock.lock().await;
        let snapshot: Map<String, Value> = self
            .cache
            .iter()
            .map(|kv| (kv.key().clone(), kv.value().clone()))
            .collect();
        let text = serde_json::to_string_pretty(&snapshot)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| HostError::Rejected(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| HostError::Rejected(format!("rename to {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl ConfigStoreType for FileConfigStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, HostError> {
        Ok(self.cache.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), HostError> {
        self.cache.insert(key.to_string(), value);
        self.flush().await
    }

    async fn remove(&self, key: &str) -> Result<(), HostError> {
        if self.cache.remove(key).is_some() {
            self.flush().await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, HostError> {
        Ok(self.cache.iter().map(|kv| kv.key().clone()).collect())
    }

    fn name(&self) -> &'static str {
        "FileConfigStore"
    }
}
