//! Recommendation, plateau and fatigue routes
//!
//! All handlers require a bearer token whose subject matches the user in the
//! path; plateau events are addressed by id and matched against the caller.

use axum::{
    body::Bytes,
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::{optional_json_body, path_params, query_params, AppState};
use crate::auth::ensure_owner;
use crate::error::LiftError;
use crate::recommendation::{self, RecommendRequest};

#[derive(Debug, Default, Deserialize)]
struct PlateauAnalysisQuery {
    #[serde(default)]
    min_duration: Option<usize>,
    #[serde(default)]
    deload_weeks: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FatigueQuery {
    #[serde(default)]
    muscle_group: Option<String>,
}

pub struct RecommendationRoutes;

impl RecommendationRoutes {
    pub fn routes(state: AppState) -> Router {
        Router::new()
            .route(
                "/v1/users/:user_id/exercises/:exercise_id/recommend-set-parameters",
                get(Self::handle_recommend).post(Self::handle_recommend_with_metrics),
            )
            .route(
                "/v1/users/:user_id/exercises/:exercise_id/plateau-analysis",
                get(Self::handle_plateau_analysis),
            )
            .route(
                "/v1/users/:user_id/plateau-notifications",
                get(Self::handle_plateau_notifications),
            )
            .route(
                "/v1/plateau-events/:event_id/acknowledge",
                post(Self::handle_acknowledge),
            )
            .route("/v1/user/:user_id/fatigue-status", get(Self::handle_fatigue_status))
            .with_state(state)
    }

    async fn handle_recommend(
        State(state): State<AppState>,
        headers: HeaderMap,
        path: Result<Path<(i64, i64)>, PathRejection>,
    ) -> Result<Response, LiftError> {
        let (user_id, exercise_id) = path_params(path)?;
        Self::recommend(state, headers, user_id, exercise_id, RecommendRequest::default()).await
    }

    async fn handle_recommend_with_metrics(
        State(state): State<AppState>,
        headers: HeaderMap,
        path: Result<Path<(i64, i64)>, PathRejection>,
        body: Bytes,
    ) -> Result<Response, LiftError> {
        let (user_id, exercise_id) = path_params(path)?;
        let request: RecommendRequest = optional_json_body(&body)?;
        Self::recommend(state, headers, user_id, exercise_id, request).await
    }

    async fn recommend(
        state: AppState,
        headers: HeaderMap,
        user_id: i64,
        exercise_id: i64,
        request: RecommendRequest,
    ) -> Result<Response, LiftError> {
        let caller = state.authenticate(&headers)?;
        ensure_owner(caller, user_id)?;

        let result = state
            .with_db(move |db, clock, settings| {
                recommendation::recommend(
                    db,
                    clock,
                    settings,
                    user_id,
                    exercise_id,
                    request.previous_set_metrics.as_ref(),
                )
            })
            .await?;
        Ok((StatusCode::OK, Json(result)).into_response())
    }

    async fn handle_plateau_analysis(
        State(state): State<AppState>,
        headers: HeaderMap,
        path: Result<Path<(i64, i64)>, PathRejection>,
        query: Result<Query<PlateauAnalysisQuery>, QueryRejection>,
    ) -> Result<Response, LiftError> {
        let (user_id, exercise_id) = path_params(path)?;
        let query = query_params(query)?;
        let caller = state.authenticate(&headers)?;
        ensure_owner(caller, user_id)?;

        let report = state
            .with_db(move |db, clock, settings| {
                recommendation::plateau_analysis(
                    db,
                    clock,
                    settings,
                    user_id,
                    exercise_id,
                    query.min_duration,
                    query.deload_weeks,
                )
            })
            .await?;
        Ok((StatusCode::OK, Json(report)).into_response())
    }

    async fn handle_plateau_notifications(
        State(state): State<AppState>,
        headers: HeaderMap,
        path: Result<Path<i64>, PathRejection>,
    ) -> Result<Response, LiftError> {
        let user_id = path_params(path)?;
        let caller = state.authenticate(&headers)?;
        ensure_owner(caller, user_id)?;

        let events = state
            .with_db(move |db, _, _| recommendation::plateau_notifications(db, user_id))
            .await?;
        Ok((StatusCode::OK, Json(events)).into_response())
    }

    async fn handle_acknowledge(
        State(state): State<AppState>,
        headers: HeaderMap,
        path: Result<Path<i64>, PathRejection>,
    ) -> Result<Response, LiftError> {
        let event_id = path_params(path)?;
        let caller = state.authenticate(&headers)?;

        let event = state
            .with_db(move |db, clock, _| recommendation::acknowledge_plateau_event(db, clock, caller, event_id))
            .await?;
        Ok((StatusCode::OK, Json(event)).into_response())
    }

    async fn handle_fatigue_status(
        State(state): State<AppState>,
        headers: HeaderMap,
        path: Result<Path<i64>, PathRejection>,
        query: Result<Query<FatigueQuery>, QueryRejection>,
    ) -> Result<Response, LiftError> {
        let user_id = path_params(path)?;
        let query = query_params(query)?;
        let caller = state.authenticate(&headers)?;
        ensure_owner(caller, user_id)?;

        let entries = state
            .with_db(move |db, clock, settings| {
                recommendation::fatigue_status(db, clock, settings, user_id, query.muscle_group.as_deref())
            })
            .await?;
        Ok((StatusCode::OK, Json(entries)).into_response())
    }
}
