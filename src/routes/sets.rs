//! Set logging, editing and workout completion routes

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{patch, post},
    Json, Router,
};
use serde_json::Value;

use super::{json_body, path_params, AppState};
use crate::auth::ensure_owner;
use crate::error::LiftError;
use crate::set_logging::{self, CompleteWorkoutRequest, LogSetRequest};

pub struct SetRoutes;

impl SetRoutes {
    pub fn routes(state: AppState) -> Router {
        Router::new()
            .route(
                "/v1/users/:user_id/exercises/:exercise_id/log-set",
                post(Self::handle_log_set),
            )
            .route(
                "/v1/sets/:set_id",
                patch(Self::handle_patch_set).delete(Self::handle_delete_set),
            )
            .route("/v1/workouts/:workout_id/complete", post(Self::handle_complete_workout))
            .with_state(state)
    }

    /// Log a completed set; the body is `{weight_kg, reps, rir, notes?, completed_at?}`
    async fn handle_log_set(
        State(state): State<AppState>,
        headers: HeaderMap,
        path: Result<Path<(i64, i64)>, PathRejection>,
        body: Result<Json<LogSetRequest>, JsonRejection>,
    ) -> Result<Response, LiftError> {
        let (user_id, exercise_id) = path_params(path)?;
        let caller = state.authenticate(&headers)?;
        ensure_owner(caller, user_id)?;
        let request = json_body(body)?;

        let logged = state
            .with_db(move |db, clock, _| set_logging::log_set(db, clock, user_id, exercise_id, request))
            .await?;
        Ok((StatusCode::CREATED, Json(logged)).into_response())
    }

    async fn handle_patch_set(
        State(state): State<AppState>,
        headers: HeaderMap,
        path: Result<Path<i64>, PathRejection>,
        body: Result<Json<Value>, JsonRejection>,
    ) -> Result<Response, LiftError> {
        let set_id = path_params(path)?;
        let caller = state.authenticate(&headers)?;
        let fields = json_body(body)?;

        let patched = state
            .with_db(move |db, _, _| set_logging::patch_set(db, caller, set_id, &fields))
            .await?;
        Ok((StatusCode::OK, Json(patched)).into_response())
    }

    async fn handle_delete_set(
        State(state): State<AppState>,
        headers: HeaderMap,
        path: Result<Path<i64>, PathRejection>,
    ) -> Result<Response, LiftError> {
        let set_id = path_params(path)?;
        let caller = state.authenticate(&headers)?;

        state
            .with_db(move |db, _, _| set_logging::delete_set(db, caller, set_id))
            .await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_complete_workout(
        State(state): State<AppState>,
        headers: HeaderMap,
        path: Result<Path<i64>, PathRejection>,
        body: Result<Json<CompleteWorkoutRequest>, JsonRejection>,
    ) -> Result<Response, LiftError> {
        let workout_id = path_params(path)?;
        let caller = state.authenticate(&headers)?;
        let request = json_body(body)?;

        let workout = state
            .with_db(move |db, clock, _| set_logging::complete_workout(db, clock, caller, workout_id, &request))
            .await?;
        Ok((StatusCode::OK, Json(workout)).into_response())
    }
}
