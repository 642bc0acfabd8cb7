mod handlers;
mod router;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::core::lifecycle::LifecycleComponent;
use crate::core::orchestrator::{RunCoordinator, StatusReconciler};
use crate::core::store::SqliteStore;

pub use router::build_api_router;

pub struct ApiServer {
    state: AppState,
    host: String,
}

pub struct ApiServerConfig {
    pub store: Arc<SqliteStore>,
    pub coordinator: Arc<RunCoordinator>,
    pub reconciler: Arc<StatusReconciler>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct AppState {
    pub(crate) store: Arc<SqliteStore>,
    pub(crate) coordinator: Arc<RunCoordinator>,
    pub(crate) reconciler: Arc<StatusReconciler>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) api_port: u16,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: AppState {
                store: config.store,
                coordinator: config.coordinator,
                reconciler: config.reconciler,
                log_tx: config.log_tx,
                api_port: config.port,
            },
            host: config.host,
        }
    }
}

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.state.api_port);
        // Bind before spawning so a taken port fails startup.
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let app = build_api_router(self.state.clone());

        tokio::spawn(async move {
            info!("API Server running at http://{addr}");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API Server crashed: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server shutting down...");
        Ok(())
    }
}
