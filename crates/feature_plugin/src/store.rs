use std::{fmt, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::plugin::HostError;

/// A persistent key-value store readable from any context.
#[async_trait]
pub trait ConfigStoreType: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, HostError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), HostError>;
    async fn remove(&self, key: &str) -> Result<(), HostError>;
    async fn keys(&self) -> Result<Vec<String>, HostError>;
    fn name(&self) -> &'static str;
}

/// Cheap, shareable handle to whichever backend the host picked.
#[derive(Clone)]
pub struct ConfigStore(pub Arc<dyn ConfigStoreType>);

impl ConfigStore {
    pub fn new(inner: Arc<dyn ConfigStoreType>) -> Self {
        ConfigStore(inner)
    }

    pub fn in_memory() -> Self {
        ConfigStore(MapConfigStore::new())
    }

    /// `get(key, default)`: the stored value or `default` when missing.
    pub async fn get_or(&self, key: &str, default: Value) -> Result<Value, HostError> {
        Ok(self.0.get(key).await?.unwrap_or(default))
    }

    /// Typed read. A stored value that does not deserialize is an error,
    /// not a silent default.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, HostError> {
        match self.0.get(key).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(default),
        }
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<(), HostError> {
        self.0.set(key, value).await
    }

    pub async fn set_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), HostError> {
        self.0.set(key, serde_json::to_value(value)?).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), HostError> {
        self.0.remove(key).await
    }

    pub async fn keys(&self) -> Result<Vec<String>, HostError> {
        self.0.keys().await
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore").field("impl", &self.0.name()).finish()
    }
}

/// In-memory backend; lives as long as the coordinator.
#[derive(Debug, Default)]
pub struct MapConfigStore {
    map: DashMap<String, Value>,
}

impl MapConfigStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { map: DashMap::new() })
    }
}

#[async_trait]
impl ConfigStoreType for MapConfigStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, HostError> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), HostError> {
        self.map.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), HostError> {
        self.map.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, HostError> {
        Ok(self.map.iter().map(|kv| kv.key().clone()).collect())
    }

    fn name(&self) -> &'static str {
        "MapConfigStore"
    }
}
