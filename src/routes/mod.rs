//! HTTP surface
//!
//! Each resource family lives in its own `*Routes` type that builds an axum
//! `Router` over the shared [`AppState`]. Handlers authenticate from the
//! `Authorization` header, then run their store work on the blocking pool.

pub mod health;
pub mod recommendations;
pub mod sets;
pub mod users;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::auth::TokenVerifier;
use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::database::Database;
use crate::error::{LiftError, Result};
use crate::logging::log_failure;

/// Shared handles for every request
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub clock: Arc<dyn Clock>,
    pub verifier: Arc<TokenVerifier>,
    pub settings: Arc<EngineSettings>,
}

impl AppState {
    pub fn new(db: Database, clock: Arc<dyn Clock>, verifier: TokenVerifier, settings: EngineSettings) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            clock,
            verifier: Arc::new(verifier),
            settings: Arc::new(settings),
        }
    }

    /// Resolve the caller from the bearer token
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<i64> {
        self.verifier.authenticate(headers)
    }

    /// Run `work` against the store on the blocking pool.
    ///
    /// The lock guard is dropped on every exit path of `work`, and a
    /// transaction left uncommitted by an early return rolls back.
    pub async fn with_db<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database, &dyn Clock, &EngineSettings) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let clock = Arc::clone(&self.clock);
        let settings = Arc::clone(&self.settings);
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|_| LiftError::Internal("database lock poisoned".to_string()))?;
            work(&mut *guard, clock.as_ref(), settings.as_ref())
        })
        .await
        .map_err(|e| LiftError::Internal(format!("store task failed: {e}")))?
    }
}

/// Build the full application router
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .merge(health::HealthRoutes::routes())
        .merge(recommendations::RecommendationRoutes::routes(state.clone()))
        .merge(sets::SetRoutes::routes(state.clone()))
        .merge(users::UserRoutes::routes(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// Map a JSON body rejection onto a validation error
pub(crate) fn json_body<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| LiftError::validation(rejection.body_text()))
}

/// Map a path rejection (e.g. a non-numeric id) onto a validation error
pub(crate) fn path_params<T>(path: std::result::Result<Path<T>, PathRejection>) -> Result<T> {
    path.map(|Path(value)| value)
        .map_err(|rejection| LiftError::validation(rejection.body_text()))
}

/// Map a query-string rejection onto a validation error
pub(crate) fn query_params<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| LiftError::validation(rejection.body_text()))
}

/// Parse an optional JSON body; an empty body yields the default value
pub(crate) fn optional_json_body<T: DeserializeOwned + Default>(bytes: &[u8]) -> Result<T> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|e| LiftError::validation(format!("invalid JSON body: {e}")))
}

impl IntoResponse for LiftError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        log_failure("http_request", &self);
        let body = json!({
            "error": kind.code(),
            "message": self.user_message(),
        });
        (status, Json(body)).into_response()
    }
}
