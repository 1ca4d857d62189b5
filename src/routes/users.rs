//! Lifter profile routes

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use super::{json_body, path_params, AppState};
use crate::auth::ensure_owner;
use crate::error::LiftError;
use crate::models::UserProfileUpdate;
use crate::{recommendation, set_logging};

pub struct UserRoutes;

impl UserRoutes {
    pub fn routes(state: AppState) -> Router {
        Router::new()
            .route(
                "/v1/users/:user_id/profile",
                get(Self::handle_get_profile).patch(Self::handle_update_profile),
            )
            .with_state(state)
    }

    async fn handle_get_profile(
        State(state): State<AppState>,
        headers: HeaderMap,
        path: Result<Path<i64>, PathRejection>,
    ) -> Result<Response, LiftError> {
        let user_id = path_params(path)?;
        let caller = state.authenticate(&headers)?;
        ensure_owner(caller, user_id)?;

        let user = state
            .with_db(move |db, _, _| recommendation::load_profile(db, user_id))
            .await?;
        Ok((StatusCode::OK, Json(user)).into_response())
    }

    /// Partial update of goal, plates, equipment and recovery settings
    async fn handle_update_profile(
        State(state): State<AppState>,
        headers: HeaderMap,
        path: Result<Path<i64>, PathRejection>,
        body: Result<Json<UserProfileUpdate>, JsonRejection>,
    ) -> Result<Response, LiftError> {
        let user_id = path_params(path)?;
        let caller = state.authenticate(&headers)?;
        ensure_owner(caller, user_id)?;
        let update = json_body(body)?;

        let user = state
            .with_db(move |db, _, _| set_logging::update_profile(db, user_id, &update))
            .await?;
        Ok((StatusCode::OK, Json(user)).into_response())
    }
}
