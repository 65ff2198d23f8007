//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint. Handlers run the
//! store's blocking operations through its async variants.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::requests::validate_key;
use crate::models::{
    DeleteResponse, HealthResponse, RefreshResponse, SetParams, SetResponse, StatsResponse,
};

/// Application state shared across all handlers.
///
/// The store is internally shared and synchronised, so no outer lock is needed.
#[derive(Clone)]
pub struct AppState {
    pub cache: CacheStore,
}

impl AppState {
    /// Creates a new AppState with the given cache store.
    pub fn new(cache: CacheStore) -> Self {
        Self { cache }
    }

    /// Creates a new AppState from configuration.
    ///
    /// Opens the connection pool described by the Config.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(CacheStore::from_config(config)?))
    }
}

fn checked_key(key: &str) -> Result<()> {
    match validate_key(key) {
        Some(error_msg) => Err(CacheError::InvalidRequest(error_msg)),
        None => Ok(()),
    }
}

/// Handler for PUT /set/:key
///
/// Stores the raw request body under `key` with the expiration given in the
/// query string.
pub async fn set_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<SetParams>,
    body: Bytes,
) -> Result<Json<SetResponse>> {
    checked_key(&key)?;

    state
        .cache
        .set_async(&key, body.to_vec(), params.to_options())
        .await?;

    Ok(Json(SetResponse::new(key)))
}

/// Handler for GET /get/:key
///
/// Returns the stored bytes, extending a sliding expiration when due.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response> {
    checked_key(&key)?;

    match state.cache.get_async(&key).await? {
        Some(value) => Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            value,
        )
            .into_response()),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /del/:key
///
/// Deleting an absent key succeeds.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    checked_key(&key)?;
    state.cache.remove_async(&key).await?;

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for POST /refresh/:key
pub async fn refresh_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<RefreshResponse>> {
    checked_key(&key)?;
    state.cache.refresh_async(&key).await?;

    Ok(Json(RefreshResponse::new(key)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /health
///
/// Probes the store; an unreachable store reports 503 rather than failing.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.cache.connect_async().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse::healthy())),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::unavailable()),
        ),
    }
}
