use std::sync::Arc;

use feature_plugin::{
    ConfigStore, ExecutionContext,
    message::{
        ContextPayload, ExecuteFeatureParams, ExecutionResult, ExecutorMessage, HistoryResponse,
        Request, Response, SettingsMap, SettingsResponse, StatsResponse, StatusResponse, SummaryStats,
    },
};
use tracing::{info, warn};

use super::ExecutorDirectory;
use crate::{
    history::SummaryHistory,
    logger::RequestMetrics,
    menu::ClickDispatcher,
    plugin::PluginRegistry,
    settings::{load_settings, update_settings},
};

/// Turns each [`Request`] into exactly one [`Response`].
pub struct MessageRouter {
    registry: PluginRegistry,
    store: ConfigStore,
    directory: ExecutorDirectory,
    history: SummaryHistory,
    metrics: RequestMetrics,
}

impl MessageRouter {
    pub fn new(registry: PluginRegistry, store: ConfigStore, directory: ExecutorDirectory) -> Self {
        Self {
            registry,
            history: SummaryHistory::new(store.clone()),
            store,
            directory,
            metrics: RequestMetrics::new(),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn click_dispatcher(&self) -> ClickDispatcher {
        self.registry.click_dispatcher()
    }

    pub async fn dispatch(&mut self, request: Request) -> Response {
        let metrics = self.metrics.clone();
        metrics.instrument_request(request.kind(), self.route(request)).await
    }

    async fn route(&mut self, request: Request) -> Response {
        match request {
            Request::ExecuteFeature(params) => Response::Execution(self.execute_feature(params).await),
            Request::GetPluginStatus => Response::Status(StatusResponse {
                success: true,
                status: self.registry.get_all_status(),
            }),
            Request::GetSettings => match load_settings(&self.store).await {
                Ok(settings) => Response::Settings(SettingsResponse { success: true, settings }),
                Err(err) => {
                    warn!(error = %err, "settings unreadable");
                    Response::fail(err.to_string())
                }
            },
            Request::UpdateSettings(params) => self.update_settings(params.settings).await,
            Request::GetSummaryHistory => match self.history.entries().await {
                Ok(history) => Response::History(HistoryResponse { success: true, history }),
                Err(err) => Response::fail(err.to_string()),
            },
            Request::ClearSummaryHistory => match self.history.clear().await {
                Ok(()) => Response::ack(),
                Err(err) => Response::fail(err.to_string()),
            },
            Request::GetStats => self.stats().await,
            Request::SetPluginConfig(params) => {
                match self.registry.set_plugin_config(&params.plugin_id, params.config).await {
                    Ok(()) => Response::ack(),
                    Err(err) => Response::fail(err.to_string()),
                }
            }
        }
    }

    /// Stored settings sit underneath whatever the executor sent. When the
    /// request names a page with a live executor, its handle rides along as
    /// the context's page state.
    async fn execute_feature(&mut self, params: ExecuteFeatureParams) -> ExecutionResult {
        let mut settings = match load_settings(&self.store).await {
            Ok(stored) => stored.to_map(),
            Err(err) => {
                warn!(error = %err, "settings unreadable, using the request context only");
                SettingsMap::new()
            }
        };
        settings.extend(params.context.settings);

        let page_id = params.context.page_id;
        let mut ctx = ExecutionContext::new(
            ContextPayload {
                settings,
                url: params.context.url,
                page_id,
            },
            self.store.clone(),
        );
        if let Some(handle) = page_id.and_then(|id| self.directory.get(id)) {
            ctx = ctx.with_page_state(Arc::new(handle));
        }
        self.registry.execute_feature(&params.feature_id, ctx).await
    }

    async fn update_settings(&mut self, patch: SettingsMap) -> Response {
        match update_settings(&self.store, patch).await {
            Ok(merged) => {
                let report = self.directory.broadcast(ExecutorMessage::UpdateConfig {
                    config: merged.to_map(),
                });
                info!(
                    delivered = report.delivered,
                    failed = report.failed,
                    "settings updated"
                );
                Response::ack()
            }
            Err(err) => {
                warn!(error = %err, "settings not updated");
                Response::fail(err.to_string())
            }
        }
    }

    async fn stats(&self) -> Response {
        let history = match self.history.entries().await {
            Ok(history) => history,
            Err(err) => return Response::fail(err.to_string()),
        };
        let is_configured = load_settings(&self.store)
            .await
            .map(|s| s.is_configured())
            .unwrap_or(false);
        Response::Stats(StatsResponse {
            success: true,
            stats: SummaryStats {
                total_summaries: history.len(),
                is_configured,
                last_used: history.first().map(|e| e.timestamp),
            },
        })
    }

    /// Dispose the registry. Nothing runs after this.
    pub async fn shutdown(&mut self) {
        if let Err(err) = self.registry.dispose().await {
            warn!(error = %err, "registry did not dispose cleanly");
        }
    }
}
