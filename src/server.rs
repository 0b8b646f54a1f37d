//! HTTP trigger endpoint and the per-process loop supervisor.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::ClientFactory;
use crate::error::{GmailError, Result};
use crate::poller::{LoopPhase, LoopStatus, PollController, PollSettings, StatusSender};
use crate::state::ReplyLedger;

/// Single owner of the poll loop for this process
///
/// The first trigger spawns the loop and returns at once. Further triggers
/// are rejected while that loop is alive; once it has stopped or failed a new
/// trigger starts a fresh one.
pub struct LoopSupervisor {
    factory: Arc<dyn ClientFactory>,
    settings: PollSettings,
    ledger_path: Option<PathBuf>,
    status: StatusSender,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl LoopSupervisor {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        settings: PollSettings,
        ledger_path: Option<PathBuf>,
    ) -> Self {
        let (status, _) = watch::channel(LoopStatus::default());
        let (shutdown, _) = watch::channel(false);
        Self {
            factory,
            settings,
            ledger_path,
            status: Arc::new(status),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Start the poll loop in the background
    pub async fn trigger(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return Err(GmailError::LoopAlreadyRunning);
            }
        }

        self.status.send_modify(|s| {
            s.phase = LoopPhase::Idle;
            s.last_error = None;
        });

        let factory = Arc::clone(&self.factory);
        let settings = self.settings.clone();
        let ledger_path = self.ledger_path.clone();
        let status = Arc::clone(&self.status);
        // A request to stop only applies to the loop that was running
        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();

        *task = Some(tokio::spawn(async move {
            let result =
                run_loop(factory.as_ref(), &settings, ledger_path, Arc::clone(&status), shutdown)
                    .await;
            if let Err(e) = &result {
                error!("Poll loop terminated: {}", e);
                let message = e.to_string();
                status.send_modify(|s| {
                    s.phase = LoopPhase::Failed;
                    s.last_error = Some(message);
                });
            }
            result
        }));

        info!("Poll loop started");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn status(&self) -> LoopStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopStatus> {
        self.status.subscribe()
    }

    /// Ask the loop to stop at its next wait point
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for the current loop task, returning its outcome
    pub async fn join(&self) -> Result<()> {
        let handle = self.task.lock().await.take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| GmailError::ApiError(format!("Poll loop task aborted: {}", e)))?,
            None => Ok(()),
        }
    }
}

async fn run_loop(
    factory: &dyn ClientFactory,
    settings: &PollSettings,
    ledger_path: Option<PathBuf>,
    status: StatusSender,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let ledger = match ledger_path {
        Some(path) => ReplyLedger::load(&path).await?,
        None => ReplyLedger::in_memory(),
    };
    PollController::connect(factory, settings, ledger, status)
        .await?
        .run(shutdown)
        .await
}

#[derive(Clone)]
struct AppState {
    supervisor: Arc<LoopSupervisor>,
    success_body: Arc<str>,
}

/// `GET /` starts the loop, `GET /status` reports on it
pub fn routes(supervisor: Arc<LoopSupervisor>, success_body: impl Into<String>) -> Router {
    let state = AppState {
        supervisor,
        success_body: Arc::from(success_body.into()),
    };

    Router::new()
        .route("/", get(trigger))
        .route("/status", get(status))
        .with_state(state)
}

async fn trigger(State(state): State<AppState>) -> Response {
    match state.supervisor.trigger().await {
        Ok(()) => (StatusCode::OK, state.success_body.to_string()).into_response(),
        Err(GmailError::LoopAlreadyRunning) => {
            warn!("Trigger rejected: poll loop already running");
            (StatusCode::CONFLICT, "Poll loop already running").into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn status(State(state): State<AppState>) -> Json<LoopStatus> {
    Json(state.supervisor.status())
}

/// Serve the router until `shutdown` resolves
pub async fn serve<F>(bind: &str, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Listening at: http://{}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
