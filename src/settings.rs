//! The shared `settings` record.
//!
//! Reads fill missing fields from [`Settings::default`]. Writes are partial:
//! only the given keys change, everything else already stored is kept.

use feature_plugin::{
    ConfigStore, HostError,
    message::{Settings, SettingsMap},
};
use serde_json::Value;
use tracing::info;

pub const SETTINGS_KEY: &str = "settings";

pub async fn load_settings(store: &ConfigStore) -> Result<Settings, HostError> {
    store.get_as(SETTINGS_KEY, Settings::default()).await
}

/// Merge `patch` over what is stored and persist the result.
///
/// The merged record must still parse as [`Settings`]; otherwise nothing is written.
pub async fn update_settings(store: &ConfigStore, patch: SettingsMap) -> Result<Settings, HostError> {
    let mut current: SettingsMap = store.get_as(SETTINGS_KEY, Settings::default().to_map()).await?;
    current.extend(patch);

    let merged: Settings = serde_json::from_value(Value::Object(current.clone()))?;
    store.set(SETTINGS_KEY, Value::Object(current)).await?;
    Ok(merged)
}

/// Seed the defaults when no usable `apiUrl` is stored. Returns whether it wrote.
pub async fn ensure_default_settings(store: &ConfigStore) -> Result<bool, HostError> {
    let current: SettingsMap = store.get_as(SETTINGS_KEY, SettingsMap::new()).await?;
    let has_api_url = current
        .get("apiUrl")
        .and_then(Value::as_str)
        .is_some_and(|url| !url.is_empty());
    if has_api_url {
        return Ok(false);
    }

    let mut seeded = Settings::default().to_map();
    for (key, value) in current {
        if key != "apiUrl" {
            seeded.insert(key, value);
        }
    }
    store.set(SETTINGS_KEY, Value::Object(seeded)).await?;
    info!("seeded default settings");
    Ok(true)
}
