pub mod message;
pub mod plugin;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod plugin_test_util;

pub use plugin::{ExecutionContext, Feature, FeatureError, HostError, Plugin, PluginStatus};
pub use store::{ConfigStore, ConfigStoreType, MapConfigStore};
