// tests/coordinator_test.rs
use std::{sync::Arc, time::Duration};

use aiflow::{
    apps::App,
    channel::{ExecutorDirectory, PageInfo},
    executor::{AFFORDANCE_TIMEOUT, NoticeLevel, RecordingSurface, SurfaceEvent, TOO_SHORT_NOTICE},
    history::HISTORY_CAPACITY,
    host::{InMemoryMenuApi, MenuApi},
    menu::{MENU_ID, MenuClick, MenuResourceManager},
    plugin::PluginRegistry,
    text_summary::{FEATURE_ID, TextSummaryPlugin},
};
use feature_plugin::{
    ConfigStore, ExecutionContext, Plugin,
    message::{ContextPayload, ExecutionResult, ExecutorMessage, SettingsMap},
    plugin_test_util::FailingConfigStore,
};
use serde_json::{Value, json};
use tokio::time::Instant;

const WAIT: Duration = Duration::from_secs(5);

fn summary_plugin() -> Arc<dyn Plugin> {
    Arc::new(TextSummaryPlugin::new().unwrap())
}

fn context(text: &str) -> ContextPayload {
    let mut settings = SettingsMap::new();
    settings.insert("selectedText".into(), Value::String(text.into()));
    ContextPayload {
        settings,
        url: "https://example.com/article".into(),
        ..Default::default()
    }
}

fn click(page: &PageInfo, text: &str) -> MenuClick {
    MenuClick {
        menu_item_id: MENU_ID.to_string(),
        selection_text: text.to_string(),
        page: Some(page.clone()),
    }
}

async fn app_with(
    store: ConfigStore,
    menu_api: Option<Arc<dyn MenuApi>>,
    surface: Arc<RecordingSurface>,
) -> App {
    App::bootstrap(store, menu_api, surface, vec![summary_plugin()], Duration::from_secs(5))
        .await
        .unwrap()
}

async fn app(surface: Arc<RecordingSurface>) -> App {
    let menu_api: Arc<dyn MenuApi> = InMemoryMenuApi::new();
    app_with(ConfigStore::in_memory(), Some(menu_api), surface).await
}

#[tokio::test]
async fn test_registering_the_same_plugin_twice_keeps_one() {
    let app = App::bootstrap(
        ConfigStore::in_memory(),
        None,
        Arc::new(RecordingSurface::new()),
        vec![summary_plugin(), summary_plugin()],
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let status = app.coordinator().get_plugin_status().await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].active_features, 1);
    app.shutdown().await;
}

#[tokio::test]
async fn test_execute_before_activation_fails() {
    let store = ConfigStore::in_memory();
    let directory = ExecutorDirectory::new();
    let mut registry = PluginRegistry::new(store.clone(), MenuResourceManager::new(None, directory, None));
    registry.initialize().await.unwrap();
    registry.register_plugin(summary_plugin()).await.unwrap();

    let ctx = ExecutionContext::new(context("Long enough text to summarize."), store);
    let result = registry.execute_feature(FEATURE_ID, ctx).await;
    assert!(!result.is_success());
}

#[tokio::test]
async fn test_short_selection_fails_and_long_one_succeeds() {
    let app = app(Arc::new(RecordingSurface::new())).await;

    let short = app.coordinator().execute_feature(FEATURE_ID, context("ab")).await.unwrap();
    assert!(!short.is_success());

    let text = "The quick brown fox jumps over the lazy dog twice.";
    assert_eq!(text.chars().count(), 50);
    match app.coordinator().execute_feature(FEATURE_ID, context(text)).await.unwrap() {
        ExecutionResult::Success { value } => {
            assert_eq!(value["originalLength"], json!(50));
            assert_eq!(value["summary"], json!(text));
        }
        other => panic!("unexpected {other:?}"),
    }
    app.shutdown().await;
}

#[tokio::test]
async fn test_history_is_capped_newest_first() {
    let app = app(Arc::new(RecordingSurface::new())).await;

    for i in 0..HISTORY_CAPACITY + 5 {
        let text = format!("Selection number {i} is long enough.");
        let res = app.coordinator().execute_feature(FEATURE_ID, context(&text)).await.unwrap();
        assert!(res.is_success());
    }

    let history = app.coordinator().get_summary_history().await.unwrap();
    assert_eq!(history.len(), HISTORY_CAPACITY);
    assert!(history[0].truncated_input.contains("number 54"));
    assert!(history[HISTORY_CAPACITY - 1].truncated_input.contains("number 5 "));

    let stats = app.coordinator().get_stats().await.unwrap();
    assert_eq!(stats.total_summaries, HISTORY_CAPACITY);
    assert_eq!(stats.last_used, Some(history[0].timestamp));

    app.coordinator().clear_summary_history().await.unwrap();
    assert!(app.coordinator().get_summary_history().await.unwrap().is_empty());
    app.shutdown().await;
}

#[tokio::test]
async fn test_menu_registered_once() {
    let api = InMemoryMenuApi::new();
    let menu_api: Arc<dyn MenuApi> = api.clone();
    let mut menu = MenuResourceManager::new(Some(menu_api), ExecutorDirectory::new(), None);

    menu.register().await;
    menu.register().await;
    assert_eq!(api.len(), 1);
    assert_eq!(api.items()[0].id, MENU_ID);
}

#[tokio::test]
async fn test_update_settings_merges_and_reaches_live_executors() {
    let app = app(Arc::new(RecordingSurface::new())).await;
    let (_a, mut rx_a) = app.directory().attach(1);
    let (_b, mut rx_b) = app.directory().attach(2);
    let (_c, rx_c) = app.directory().attach(3);
    drop(rx_c);

    let mut patch = SettingsMap::new();
    patch.insert("apiKey".into(), json!("secret"));
    app.coordinator().update_settings(patch).await.unwrap();

    let settings = app.coordinator().get_settings().await.unwrap();
    assert_eq!(settings.api_key, "secret");
    assert_eq!(settings.max_length, 200);

    for rx in [&mut rx_a, &mut rx_b] {
        match rx.recv().await.unwrap().0 {
            ExecutorMessage::UpdateConfig { config } => assert_eq!(config["apiKey"], json!("secret")),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(app.directory().len(), 2);
    assert!(app.coordinator().get_stats().await.unwrap().is_configured);
    app.shutdown().await;
}

#[tokio::test]
async fn test_menu_click_reaches_open_page() {
    let surface = Arc::new(RecordingSurface::new());
    let app = app(surface.clone()).await;
    let page = PageInfo::new(11, "https://example.com/news");
    let task = app.open_page(page.clone());

    app.menu_clicked(click(&page, "A selection that is clearly long enough."))
        .await
        .unwrap();

    let found = surface
        .wait_for(WAIT, |e| matches!(e, SurfaceEvent::Result(_)))
        .await;
    assert_eq!(
        found,
        Some(SurfaceEvent::Result("A selection that is clearly long enough.".into()))
    );
    task.close().await;
    app.shutdown().await;
}

#[tokio::test]
async fn test_menu_click_reinjects_missing_executor() {
    let surface = Arc::new(RecordingSurface::new());
    let app = app(surface.clone()).await;
    let page = PageInfo::new(12, "https://example.com/blog");
    assert!(app.directory().get(page.id).is_none());

    app.menu_clicked(click(&page, "Nobody listened here before the click."))
        .await
        .unwrap();

    let found = surface
        .wait_for(WAIT, |e| matches!(e, SurfaceEvent::Result(_)))
        .await;
    assert!(found.is_some(), "{:?}", surface.events());
    assert!(app.directory().get(page.id).is_some());
    app.shutdown().await;
}

#[tokio::test]
async fn test_short_menu_selection_warns_locally() {
    let surface = Arc::new(RecordingSurface::new());
    let app = app(surface.clone()).await;
    let page = PageInfo::new(13, "https://example.com");
    let task = app.open_page(page.clone());

    app.menu_clicked(click(&page, "short")).await.unwrap();

    let found = surface
        .wait_for(WAIT, |e| matches!(e, SurfaceEvent::Notice(NoticeLevel::Warning, _)))
        .await;
    assert_eq!(
        found,
        Some(SurfaceEvent::Notice(NoticeLevel::Warning, TOO_SHORT_NOTICE.into()))
    );
    assert!(app.coordinator().get_summary_history().await.unwrap().is_empty());
    task.close().await;
    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_fallback_affordance_click_summarizes() {
    let surface = Arc::new(RecordingSurface::new());
    let app = app_with(ConfigStore::in_memory(), None, surface.clone()).await;
    let task = app.open_page(PageInfo::new(21, "https://example.com/doc"));

    task.select("Without a menu the affordance does the job.").await.unwrap();
    assert!(surface
        .wait_for(WAIT, |e| *e == SurfaceEvent::AffordanceShown)
        .await
        .is_some());

    task.click_affordance().await.unwrap();
    let found = surface
        .wait_for(WAIT, |e| matches!(e, SurfaceEvent::Result(_)))
        .await;
    assert!(found.is_some(), "{:?}", surface.events());
    task.close().await;
    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_fallback_affordance_dismisses_itself() {
    let surface = Arc::new(RecordingSurface::new());
    let app = app_with(ConfigStore::in_memory(), None, surface.clone()).await;
    let task = app.open_page(PageInfo::new(22, "https://example.com/doc"));

    task.select("Selected but never clicked on.").await.unwrap();
    assert!(surface
        .wait_for(WAIT, |e| *e == SurfaceEvent::AffordanceShown)
        .await
        .is_some());
    let shown = Instant::now();

    assert!(surface
        .wait_for(Duration::from_secs(10), |e| *e == SurfaceEvent::AffordanceHidden)
        .await
        .is_some());
    assert!(shown.elapsed() >= AFFORDANCE_TIMEOUT - Duration::from_millis(50));
    task.close().await;
    app.shutdown().await;
}

#[tokio::test]
async fn test_read_only_store_still_summarizes() {
    let store = ConfigStore::new(FailingConfigStore::read_only());
    let menu_api: Arc<dyn MenuApi> = InMemoryMenuApi::new();
    let app = app_with(store, Some(menu_api), Arc::new(RecordingSurface::new())).await;

    let res = app
        .coordinator()
        .execute_feature(FEATURE_ID, context("Still works when nothing can be saved."))
        .await
        .unwrap();
    assert!(res.is_success());

    let mut patch = SettingsMap::new();
    patch.insert("language".into(), json!("en"));
    assert!(app.coordinator().update_settings(patch).await.is_err());
    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_fallback_affordance_respects_menu_scope() {
    let surface = Arc::new(RecordingSurface::new());
    let app = app_with(ConfigStore::in_memory(), None, surface.clone()).await;

    let local = app.open_page(PageInfo::new(23, "file:///home/user/notes.txt"));
    let internal = app.open_page(PageInfo::new(24, "chrome://settings"));
    local.select("A local file is not a web page.").await.unwrap();
    internal.select("Browser settings are not either.").await.unwrap();

    assert!(surface
        .wait_for(Duration::from_secs(1), |e| *e == SurfaceEvent::AffordanceShown)
        .await
        .is_none());

    local.close().await;
    internal.close().await;
    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_fallback_affordance_hides_on_outside_click() {
    let surface = Arc::new(RecordingSurface::new());
    let app = app_with(ConfigStore::in_memory(), None, surface.clone()).await;
    let task = app.open_page(PageInfo::new(25, "https://example.com/doc"));

    task.select("Selected, then clicked somewhere else.").await.unwrap();
    assert!(surface
        .wait_for(WAIT, |e| *e == SurfaceEvent::AffordanceShown)
        .await
        .is_some());
    let shown = Instant::now();

    task.click_outside().await.unwrap();
    assert!(surface
        .wait_for(WAIT, |e| *e == SurfaceEvent::AffordanceHidden)
        .await
        .is_some());
    assert!(shown.elapsed() < AFFORDANCE_TIMEOUT);

    task.click_affordance().await.unwrap();
    assert!(surface
        .wait_for(Duration::from_secs(1), |e| matches!(e, SurfaceEvent::Result(_)))
        .await
        .is_none());
    assert!(app.coordinator().get_summary_history().await.unwrap().is_empty());

    task.close().await;
    app.shutdown().await;
}
