//! Test doubles for hosts and plugin authors. Enabled with the `test-utils` feature.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use serde_json::Value;

use crate::message::{ExecutionResult, PluginConfig};
use crate::plugin::{ExecutionContext, Feature, HostError, Plugin};
use crate::store::{ConfigStoreType, MapConfigStore};

/// A store whose reads and/or writes fail on demand.
#[derive(Debug, Default)]
pub struct FailingConfigStore {
    inner: MapConfigStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FailingConfigStore {
    /// Every operation fails.
    pub fn broken() -> Arc<Self> {
        let store = Self::default();
        store.fail_reads.store(true, Ordering::SeqCst);
        store.fail_writes.store(true, Ordering::SeqCst);
        Arc::new(store)
    }

    /// Reads work, writes fail.
    pub fn read_only() -> Arc<Self> {
        let store = Self::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        Arc::new(store)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> Result<(), HostError> {
        if flag.load(Ordering::SeqCst) {
            Err(HostError::Rejected(format!("{op} refused by FailingConfigStore")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigStoreType for FailingConfigStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, HostError> {
        self.check(&self.fail_reads, "get")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), HostError> {
        self.check(&self.fail_writes, "set")?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), HostError> {
        self.check(&self.fail_writes, "remove")?;
        self.inner.remove(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, HostError> {
        self.check(&self.fail_reads, "keys")?;
        self.inner.keys().await
    }

    fn name(&self) -> &'static str {
        "FailingConfigStore"
    }
}

/// What a `StaticFeature` does when executed.
#[derive(Debug, Clone)]
pub enum StaticBehaviour {
    Succeed(Value),
    Error(String),
    Panic,
}

/// A feature with a fixed answer, counting its executions.
#[derive(Debug)]
pub struct StaticFeature {
    pub id: String,
    pub runnable: bool,
    pub behaviour: StaticBehaviour,
    pub executions: AtomicUsize,
}

impl StaticFeature {
    pub fn new(id: &str, behaviour: StaticBehaviour) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            runnable: true,
            behaviour,
            executions: AtomicUsize::new(0),
        })
    }

    pub fn blocked(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            runnable: false,
            behaviour: StaticBehaviour::Succeed(Value::Null),
            executions: AtomicUsize::new(0),
        })
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Feature for StaticFeature {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.id
    }
    fn version(&self) -> &str {
        "0.0.1"
    }
    fn is_applicable(&self, _url: &str) -> bool {
        true
    }
    async fn can_execute(&self, _ctx: &ExecutionContext) -> bool {
        self.runnable
    }
    async fn execute(&self, _ctx: &ExecutionContext) -> anyhow::Result<ExecutionResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            StaticBehaviour::Succeed(v) => Ok(ExecutionResult::success(v.clone())),
            StaticBehaviour::Error(e) => Err(anyhow::anyhow!(e.clone())),
            StaticBehaviour::Panic => panic!("StaticFeature `{}` asked to panic", self.id),
        }
    }
}

/// A plugin wrapping a fixed feature list, recording lifecycle hook calls.
pub struct StaticPlugin {
    pub id: String,
    pub features: Vec<Arc<dyn Feature>>,
    pub config: PluginConfig,
    pub fail_activation: bool,
    pub calls: Mutex<Vec<&'static str>>,
}

impl StaticPlugin {
    pub fn new(id: &str, features: Vec<Arc<dyn Feature>>) -> Self {
        Self {
            id: id.to_string(),
            features,
            config: PluginConfig::default(),
            fail_activation: false,
            calls: Mutex::new(vec![]),
        }
    }

    pub fn failing_activation(mut self) -> Self {
        self.fail_activation = true;
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl Plugin for StaticPlugin {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.id
    }
    fn version(&self) -> &str {
        "0.0.1"
    }
    fn features(&self) -> Vec<Arc<dyn Feature>> {
        self.features.clone()
    }
    fn default_config(&self) -> PluginConfig {
        self.config.clone()
    }
    async fn on_initialize(&self, _config: &PluginConfig) -> anyhow::Result<()> {
        self.record("initialize");
        Ok(())
    }
    async fn on_activate(&self) -> anyhow::Result<()> {
        self.record("activate");
        if self.fail_activation {
            anyhow::bail!("activation refused");
        }
        Ok(())
    }
    async fn on_deactivate(&self) {
        self.record("deactivate");
    }
}
