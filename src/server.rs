//! HTTP surface over the scanner and the insight service.
//!
//! Handlers are thin: the blocking scan and model calls run on tokio's
//! blocking pool, the scan fan-out itself stays on the coordinator's rayon
//! pool.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::error::{InsightError, ScanError, StoreError};
use crate::insight::{self, InsightService, QueryTarget};
use crate::scan::coordinator::{AccountContext, Coordinator};
use crate::scan::ProviderKind;
use crate::store::Store;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "detail": self.message }));
        (self.status, body).into_response()
    }
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::UnknownService { .. } => Self::bad_request(err.to_string()),
            ScanError::ScopeDiscovery { .. } => Self::internal(err.to_string()),
        }
    }
}

impl From<InsightError> for AppError {
    fn from(err: InsightError) -> Self {
        match err {
            InsightError::NoSnapshot { .. } => Self::not_found(err.to_string()),
            InsightError::EmptyQuestion => Self::bad_request("Question is required"),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        error!(error = %err, "snapshot store operation failed");
        Self::internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        error!(error = %err, "blocking task failed");
        Self::internal("internal task failed")
    }
}

/// Accounts the server scans when a request does not override them.
#[derive(Clone)]
pub struct Accounts {
    pub aws: AccountContext,
    pub azure: AccountContext,
}

struct Inner {
    coordinator: Coordinator,
    accounts: Accounts,
    store: Mutex<Store>,
    insight: Option<InsightService>,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

impl AppState {
    /// `insight` is `None` when no language model is configured; queries
    /// then fail with 500.
    pub fn new(
        coordinator: Coordinator,
        accounts: Accounts,
        store: Store,
        insight: Option<InsightService>,
    ) -> Self {
        AppState {
            inner: Arc::new(Inner {
                coordinator,
                accounts,
                store: Mutex::new(store),
                insight,
            }),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scan/aws", post(scan_aws))
        .route("/scan/azure", post(scan_azure))
        .route("/query/aws", post(query_aws))
        .route("/query/azure", post(query_azure))
        .route("/query", post(query_all))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// Repeated `services` parameters and comma-separated lists both work.
fn query_values(params: &[(String, String)], name: &str) -> Vec<String> {
    params
        .iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
        .collect()
}

async fn scan_aws(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Value>> {
    let account = state.inner.accounts.aws.clone();
    run_scan(state, account, query_values(&params, "services")).await
}

async fn scan_azure(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Value>> {
    let mut account = state.inner.accounts.azure.clone();
    let subscription = query_values(&params, "subscription_id")
        .into_iter()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty());
    if subscription.is_some() {
        account.account = subscription;
    }
    run_scan(state, account, query_values(&params, "services")).await
}

async fn run_scan(state: AppState, account: AccountContext, services: Vec<String>) -> AppResult<Json<Value>> {
    let kind = account.provider.kind();

    let (outcome, snapshot_id) = tokio::task::spawn_blocking(move || -> AppResult<_> {
        let outcome = state.inner.coordinator.scan(&account, &services)?;
        let snapshot_id = if outcome.cached {
            None
        } else {
            Some(state.inner.store.lock().put(kind, &outcome.result)?)
        };
        Ok((outcome, snapshot_id))
    })
    .await??;

    Ok(Json(json!({
        "message": format!("{} infrastructure scan completed", kind.display_name()),
        "cached": outcome.cached,
        "snapshot_id": snapshot_id,
        "data": outcome.result.as_ref(),
    })))
}

#[derive(Debug, Default, Deserialize)]
struct QueryRequest {
    #[serde(default)]
    question: String,
}

async fn query_aws(State(state): State<AppState>, Json(request): Json<QueryRequest>) -> AppResult<Json<Value>> {
    run_query(state, request, QueryTarget::Provider(ProviderKind::Aws)).await
}

async fn query_azure(State(state): State<AppState>, Json(request): Json<QueryRequest>) -> AppResult<Json<Value>> {
    run_query(state, request, QueryTarget::Provider(ProviderKind::Azure)).await
}

async fn query_all(State(state): State<AppState>, Json(request): Json<QueryRequest>) -> AppResult<Json<Value>> {
    run_query(state, request, QueryTarget::All).await
}

async fn run_query(state: AppState, request: QueryRequest, target: QueryTarget) -> AppResult<Json<Value>> {
    let answer = tokio::task::spawn_blocking(move || -> AppResult<_> {
        let question = insight::validate_question(&request.question)?;
        // the lock is released before the model call
        let snapshots = insight::latest_snapshots(&state.inner.store.lock(), target)?;

        let service = state
            .inner
            .insight
            .as_ref()
            .ok_or_else(|| AppError::internal("language model is not configured"))?;
        Ok(service.ask_with(question, target, &snapshots)?)
    })
    .await??;

    Ok(Json(serde_json::to_value(answer).map_err(|e| AppError::internal(e.to_string()))?))
}
