//! API Handlers
//!
//! HTTP request handlers for each diagnostics endpoint.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde_json::Value;
use tracing::warn;

use crate::cache::{CacheEngine, CacheStats, EntrySnapshot};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    ClearRequest, ClearResponse, DeleteResponse, GetResponse, HealthResponse, KeysResponse,
    RevalidateResponse, SetRequest, SetResponse,
};
use crate::storage::{FileStorage, MemoryStorage, StorageBackend};
use crate::timespec;

/// Application state shared across all handlers.
///
/// The engine is internally synchronized, so handlers share it by cloning.
#[derive(Clone)]
pub struct AppState {
    pub engine: CacheEngine<Value>,
}

impl AppState {
    /// Creates a new AppState around an existing engine.
    pub fn new(engine: CacheEngine<Value>) -> Self {
        Self { engine }
    }

    /// Creates a new AppState from configuration.
    ///
    /// Persists to `storage_dir` when set, otherwise to process memory. A
    /// directory that cannot be opened degrades to memory storage.
    pub fn from_config(config: &Config) -> Self {
        let backend: Arc<dyn StorageBackend> = match &config.storage_dir {
            Some(dir) => match FileStorage::open(dir) {
                Ok(storage) => Arc::new(storage),
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "falling back to memory storage");
                    Arc::new(MemoryStorage::new())
                }
            },
            None => Arc::new(MemoryStorage::new()),
        };

        Self::new(CacheEngine::with_storage(config.cache.clone(), backend))
    }
}

/// Handler for PUT /set
///
/// Stores a JSON value with an optional TTL. Oversized values are rejected
/// with 413 and leave the cache unchanged.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl_ms = match &req.ttl {
        Some(ttl) => timespec::parse(ttl)?,
        None => state.engine.config().default_ttl_ms,
    };
    state.engine.try_set(&req.key, req.value, ttl_ms)?;

    Ok(Json(SetResponse::new(req.key, ttl_ms)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let value = state
        .engine
        .get(&key)
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for GET /inspect/:key
///
/// Returns the entry's data and metadata without counting an access.
pub async fn inspect_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<EntrySnapshot<Value>>> {
    state
        .engine
        .inspect(&key)
        .map(Json)
        .ok_or(CacheError::NotFound(key))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<DeleteResponse> {
    let removed = state.engine.remove(&key);
    Json(DeleteResponse::new(key, removed))
}

/// Handler for GET /keys
pub async fn keys_handler(State(state): State<AppState>) -> Json<KeysResponse> {
    Json(KeysResponse::new(state.engine.keys()))
}

/// Handler for POST /clear
///
/// An empty body or a body without `pattern` clears everything. A body
/// that is not valid JSON is rejected rather than read as a full clear.
pub async fn clear_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ClearResponse>> {
    let req: ClearRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ClearRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| CacheError::InvalidRequest(err.to_string()))?
    };

    let removed = match &req.pattern {
        Some(pattern) => state.engine.clear_matching(pattern)?,
        None => state.engine.clear(),
    };

    Ok(Json(ClearResponse {
        removed,
        pattern: req.pattern,
    }))
}

/// Handler for POST /revalidate
pub async fn revalidate_all_handler(State(state): State<AppState>) -> Json<RevalidateResponse> {
    Json(RevalidateResponse {
        key: None,
        notified: state.engine.revalidation().notify_all(),
    })
}

/// Handler for POST /revalidate/:key
pub async fn revalidate_key_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<RevalidateResponse> {
    let notified = state.engine.revalidation().notify(&key);
    Json(RevalidateResponse {
        key: Some(key),
        notified,
    })
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.engine.stats())
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
