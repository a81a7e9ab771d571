//! Ownership of the one shared context-menu entry.
//!
//! [`MenuResourceManager`] picks a [`MenuStrategy`] once, from whether the host
//! offers a menu API at all. A native registration that fails moves the manager
//! to the in-page affordance for good.

use std::sync::Arc;

use async_trait::async_trait;
use feature_plugin::{HostError, message::SettingsMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::Display;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    channel::{ExecutorDirectory, PageInfo},
    host::{ExecutorInjector, MenuApi},
};

pub mod dispatch;
pub mod fallback;
pub mod native;

pub use dispatch::{ClickDispatcher, DispatchOutcome, RETRY_DELAY};
pub use fallback::FallbackMenuStrategy;
pub use native::NativeMenuStrategy;

/// Fixed id of the summary entry.
pub const MENU_ID: &str = "aiflow-summary";
pub const MENU_TITLE: &str = "Summarize selection";
pub const MENU_TITLE_ZH: &str = "总结选中文本";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuContext {
    Selection,
    Page,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub title: String,
    pub contexts: Vec<MenuContext>,
    pub document_url_patterns: Vec<String>,
}

impl MenuItem {
    pub fn summary() -> Self {
        Self::summary_for(None)
    }

    /// The summary entry titled for `language` (a `settings.language` value).
    pub fn summary_for(language: Option<&str>) -> Self {
        let title = match language {
            Some(lang) if lang.starts_with("zh") => MENU_TITLE_ZH,
            _ => MENU_TITLE,
        };
        Self {
            id: MENU_ID.to_string(),
            title: title.to_string(),
            contexts: vec![MenuContext::Selection],
            document_url_patterns: vec!["http://*/*".to_string(), "https://*/*".to_string()],
        }
    }

    /// Would the host show this entry for `selection` on `url`?
    pub fn applies_to(&self, url: &str, selection: &str) -> bool {
        if self.contexts.contains(&MenuContext::Selection) && selection.trim().is_empty() {
            return false;
        }
        let Ok(url) = Url::parse(url) else {
            return false;
        };
        self.document_url_patterns
            .iter()
            .any(|pattern| pattern_matches(pattern, &url))
    }
}

/// `scheme://host/path` match where `*` is a wildcard scheme, `*` or
/// `*.suffix` a wildcard host, and a trailing `*` a path prefix.
fn pattern_matches(pattern: &str, url: &Url) -> bool {
    let Some((scheme, rest)) = pattern.split_once("://") else {
        return false;
    };
    if scheme != "*" && scheme != url.scheme() {
        return false;
    }
    let (host_pattern, path_pattern) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, "/*"),
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let host_ok = match host_pattern {
        "*" => true,
        p if p.starts_with("*.") => host.ends_with(&p[1..]) || host == &p[2..],
        p => p == host,
    };
    let path_ok = match path_pattern.strip_suffix('*') {
        Some(prefix) => url.path().starts_with(prefix),
        None => url.path() == path_pattern,
    };
    host_ok && path_ok
}

/// A click on the entry as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuClick {
    pub menu_item_id: String,
    #[serde(default)]
    pub selection_text: String,
    #[serde(default)]
    pub page: Option<PageInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MenuKind {
    Native,
    Fallback,
}

#[async_trait]
pub trait MenuStrategy: Send + Sync {
    fn kind(&self) -> MenuKind;
    async fn register(&self, item: &MenuItem) -> Result<(), HostError>;
    async fn unregister(&self) -> Result<(), HostError>;
}

pub struct MenuResourceManager {
    strategy: Arc<dyn MenuStrategy>,
    directory: ExecutorDirectory,
    injector: Option<Arc<dyn ExecutorInjector>>,
    item: MenuItem,
    registered: bool,
    settings: SettingsMap,
}

impl MenuResourceManager {
    pub fn new(
        api: Option<Arc<dyn MenuApi>>,
        directory: ExecutorDirectory,
        injector: Option<Arc<dyn ExecutorInjector>>,
    ) -> Self {
        let strategy: Arc<dyn MenuStrategy> = match api {
            Some(api) => Arc::new(NativeMenuStrategy::new(api)),
            None => {
                info!("no host menu API, using the in-page affordance");
                Arc::new(FallbackMenuStrategy::new(directory.clone()))
            }
        };
        Self {
            strategy,
            directory,
            injector,
            item: MenuItem::summary(),
            registered: false,
            settings: SettingsMap::new(),
        }
    }

    pub fn kind(&self) -> MenuKind {
        self.strategy.kind()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn item(&self) -> &MenuItem {
        &self.item
    }

    /// Safe to call repeatedly; each strategy clears before it creates.
    pub async fn register(&mut self) -> MenuKind {
        match self.strategy.register(&self.item).await {
            Ok(()) => {
                self.registered = true;
                info!(kind = %self.kind(), "menu entry `{}` registered", self.item.id);
            }
            Err(err) if self.kind() == MenuKind::Native => {
                warn!(error = %err, "native menu registration failed, switching to the in-page affordance");
                self.strategy = Arc::new(FallbackMenuStrategy::new(self.directory.clone()));
                match self.strategy.register(&self.item).await {
                    Ok(()) => self.registered = true,
                    Err(err) => error!(error = %err, "fallback menu registration failed"),
                }
            }
            Err(err) => error!(error = %err, "menu registration failed"),
        }
        self.kind()
    }

    /// Idempotent; nothing to remove is not an error.
    pub async fn unregister(&mut self) {
        if let Err(err) = self.strategy.unregister().await {
            warn!(error = %err, "menu unregister failed");
        }
        if self.registered {
            debug!("menu entry `{}` unregistered", self.item.id);
        }
        self.registered = false;
    }

    /// Merge `partial`; a new `language` retitles the entry, re-registering it if needed.
    pub async fn update_settings(&mut self, partial: SettingsMap) {
        self.settings.extend(partial);
        let item = MenuItem::summary_for(self.settings.get("language").and_then(Value::as_str));
        if item == self.item {
            return;
        }
        debug!("menu entry retitled to `{}`", item.title);
        self.item = item;
        if self.registered {
            self.register().await;
        }
    }

    pub fn settings(&self) -> &SettingsMap {
        &self.settings
    }

    pub fn dispatcher(&self) -> ClickDispatcher {
        ClickDispatcher::new(self.directory.clone(), self.injector.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryMenuApi;
    use feature_plugin::message::ExecutorMessage;

    #[test]
    fn test_menu_scope() {
        let item = MenuItem::summary();
        assert!(item.applies_to("https://example.com/a/b", "some text"));
        assert!(item.applies_to("http://localhost:8080/", "x"));
        assert!(!item.applies_to("https://example.com/", "   "));
        assert!(!item.applies_to("file:///etc/hosts", "text"));
        assert!(!item.applies_to("chrome://extensions", "text"));
        assert!(!item.applies_to("not a url", "text"));
    }

    #[test]
    fn test_host_wildcards() {
        let url = Url::parse("https://docs.example.com/guide").unwrap();
        assert!(pattern_matches("https://*.example.com/*", &url));
        assert!(!pattern_matches("https://*.example.org/*", &url));
        assert!(pattern_matches("*://docs.example.com/guide", &url));
        assert!(!pattern_matches("https://docs.example.com/other", &url));
    }

    #[tokio::test]
    async fn test_register_twice_leaves_one_entry() {
        let api = InMemoryMenuApi::new();
        let mut menu = MenuResourceManager::new(Some(api.clone()), ExecutorDirectory::new(), None);

        assert_eq!(menu.register().await, MenuKind::Native);
        assert_eq!(menu.register().await, MenuKind::Native);
        assert_eq!(api.len(), 1);
        assert_eq!(api.items()[0].id, MENU_ID);

        menu.unregister().await;
        menu.unregister().await;
        assert!(api.is_empty());
        assert!(!menu.is_registered());
    }

    #[tokio::test]
    async fn test_native_failure_switches_to_fallback_for_good() {
        let directory = ExecutorDirectory::new();
        let (_handle, mut rx) = directory.attach(1);
        let mut menu = MenuResourceManager::new(Some(InMemoryMenuApi::unavailable()), directory.clone(), None);

        assert_eq!(menu.register().await, MenuKind::Fallback);
        assert!(menu.is_registered());
        assert!(directory.affordance_enabled());
        assert_eq!(rx.recv().await.unwrap().0, ExecutorMessage::ShowSelectionAffordance);

        menu.unregister().await;
        assert_eq!(menu.register().await, MenuKind::Fallback);
    }

    #[tokio::test]
    async fn test_settings_merge_retitles_entry() {
        let api = InMemoryMenuApi::new();
        let mut menu = MenuResourceManager::new(Some(api.clone()), ExecutorDirectory::new(), None);
        menu.register().await;
        assert_eq!(api.items()[0].title, MENU_TITLE);

        let mut first = SettingsMap::new();
        first.insert("language".into(), "en".into());
        first.insert("maxLength".into(), 100.into());
        menu.update_settings(first).await;
        assert_eq!(api.items()[0].title, MENU_TITLE);

        let mut second = SettingsMap::new();
        second.insert("maxLength".into(), 50.into());
        second.insert("language".into(), "zh-CN".into());
        menu.update_settings(second).await;

        assert_eq!(menu.settings()["maxLength"], 50);
        assert_eq!(menu.item().title, MENU_TITLE_ZH);
        assert_eq!(api.len(), 1);
        assert_eq!(api.items()[0].title, MENU_TITLE_ZH);
    }
}
