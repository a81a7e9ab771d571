use std::time::Duration;

use feature_plugin::{
    FeatureError,
    message::{
        ContextPayload, ExecutionResult, HistoryEntry, PluginStatusInfo, Request, Response, Settings,
        SettingsMap, SummaryStats, UpdateSettingsParams,
    },
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info};

use super::MessageRouter;
use crate::menu::MenuClick;

pub const COMMAND_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum Command {
    Call(Request, oneshot::Sender<Response>),
    MenuClicked(MenuClick),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable address of the coordinator task.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    /// The handle and the inbox [`spawn_coordinator`] will drain.
    pub fn channel() -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        (Self { tx }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// One request, one reply.
    pub async fn call(&self, req: Request) -> Result<Response, FeatureError> {
        let (tx_resp, rx_resp) = oneshot::channel();
        self.tx
            .send(Command::Call(req, tx_resp))
            .await
            .map_err(|_| FeatureError::ChannelUnreachable("coordinator is gone".into()))?;
        rx_resp
            .await
            .map_err(|_| FeatureError::ChannelUnreachable("coordinator dropped the reply".into()))
    }

    /// [`call`](Self::call) bounded by `limit`; a late reply is discarded.
    pub async fn call_with_timeout(&self, req: Request, limit: Duration) -> Result<Response, FeatureError> {
        match timeout(limit, self.call(req)).await {
            Ok(res) => res,
            Err(_) => Err(FeatureError::Timeout(limit.as_millis() as u64)),
        }
    }

    // ---------------------------------------------------------------------
    // Convenience wrappers
    // ---------------------------------------------------------------------

    pub async fn execute_feature(
        &self,
        feature_id: &str,
        context: ContextPayload,
    ) -> Result<ExecutionResult, FeatureError> {
        match self.call(Request::execute_feature(feature_id, context)).await? {
            Response::Execution(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_plugin_status(&self) -> Result<Vec<PluginStatusInfo>, FeatureError> {
        match self.call(Request::GetPluginStatus).await? {
            Response::Status(r) => Ok(r.status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_settings(&self) -> Result<Settings, FeatureError> {
        match self.call(Request::GetSettings).await? {
            Response::Settings(r) => Ok(r.settings),
            other => Err(unexpected(other)),
        }
    }

    pub async fn update_settings(&self, settings: SettingsMap) -> Result<(), FeatureError> {
        let res = self
            .call(Request::UpdateSettings(UpdateSettingsParams { settings }))
            .await?;
        expect_ack(res)
    }

    pub async fn get_summary_history(&self) -> Result<Vec<HistoryEntry>, FeatureError> {
        match self.call(Request::GetSummaryHistory).await? {
            Response::History(r) => Ok(r.history),
            other => Err(unexpected(other)),
        }
    }

    pub async fn clear_summary_history(&self) -> Result<(), FeatureError> {
        expect_ack(self.call(Request::ClearSummaryHistory).await?)
    }

    pub async fn get_stats(&self) -> Result<SummaryStats, FeatureError> {
        match self.call(Request::GetStats).await? {
            Response::Stats(r) => Ok(r.stats),
            other => Err(unexpected(other)),
        }
    }

    /// Hand a host menu click to the coordinator. Dispatch happens off its turn.
    pub async fn menu_clicked(&self, click: MenuClick) -> Result<(), FeatureError> {
        self.tx
            .send(Command::MenuClicked(click))
            .await
            .map_err(|_| FeatureError::ChannelUnreachable("coordinator is gone".into()))
    }

    /// Dispose the registry and stop the task. Resolves once it is done.
    pub async fn shutdown(&self) -> Result<(), FeatureError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(done_tx))
            .await
            .map_err(|_| FeatureError::ChannelUnreachable("coordinator is gone".into()))?;
        done_rx
            .await
            .map_err(|_| FeatureError::ChannelUnreachable("coordinator stopped before confirming".into()))
    }
}

fn unexpected(res: Response) -> FeatureError {
    match res {
        Response::Ack(ack) if !ack.success => {
            FeatureError::ExternalCall(ack.error.unwrap_or_else(|| "request failed".into()))
        }
        other => FeatureError::ExternalCall(format!("unexpected reply {other:?}")),
    }
}

fn expect_ack(res: Response) -> Result<(), FeatureError> {
    match res {
        Response::Ack(ack) if ack.success => Ok(()),
        other => Err(unexpected(other)),
    }
}

/// Run `router` on its own task. Requests are handled one at a time, so the
/// registry only ever changes on this task's turn.
pub fn spawn_coordinator(mut router: MessageRouter, mut inbox: mpsc::Receiver<Command>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("coordinator running");
        let mut disposed = false;
        while let Some(cmd) = inbox.recv().await {
            match cmd {
                Command::Call(req, reply) => {
                    let res = router.dispatch(req).await;
                    if reply.send(res).is_err() {
                        debug!("caller went away before the reply");
                    }
                }
                Command::MenuClicked(click) => {
                    let dispatcher = router.click_dispatcher();
                    tokio::spawn(async move {
                        let outcome = dispatcher.dispatch(click).await;
                        debug!(?outcome, "menu click handled");
                    });
                }
                Command::Shutdown(done) => {
                    router.shutdown().await;
                    disposed = true;
                    let _ = done.send(());
                    break;
                }
            }
        }
        if !disposed {
            router.shutdown().await;
        }
        info!("coordinator stopped");
    })
}
