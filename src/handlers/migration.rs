use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crate::db::AppState;
use crate::models::{
    MigrationRequest, ProgressSnapshot, RollbackResponse, StartMigrationResponse, ValidationResult,
};
use crate::services::migration::MigrationError;

pub async fn validate_migration(
    State(state): State<AppState>,
    Json(payload): Json<MigrationRequest>,
) -> Result<Json<ValidationResult>, AppError> {
    let result = state
        .migrations
        .validate(
            &payload.source_pool_id,
            &payload.target_pool_id,
            &payload.profile_id,
        )
        .await?;
    Ok(Json(result))
}

pub async fn start_migration(
    State(state): State<AppState>,
    Json(payload): Json<MigrationRequest>,
) -> Result<Json<StartMigrationResponse>, AppError> {
    let migration_id = state
        .migrations
        .start(
            &payload.source_pool_id,
            &payload.target_pool_id,
            &payload.profile_id,
        )
        .await?;
    Ok(Json(StartMigrationResponse { migration_id }))
}

pub async fn get_progress(
    State(state): State<AppState>,
    Path(migration_id): Path<String>,
) -> Result<Json<ProgressSnapshot>, AppError> {
    let snapshot = state.migrations.get_progress(&migration_id).await?;
    Ok(Json(snapshot))
}

pub async fn list_migrations(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProgressSnapshot>>, AppError> {
    let history = state.migrations.history().await?;
    Ok(Json(history))
}

pub async fn rollback_migration(
    State(state): State<AppState>,
    Path(migration_id): Path<String>,
) -> Result<Json<RollbackResponse>, AppError> {
    let response = state.rollback.rollback(&migration_id).await?;
    Ok(Json(response))
}

#[derive(Debug)]
pub enum AppError {
    ValidationError(String),
    Conflict(String),
    NotFound(String),
    InternalError(String),
}

impl From<MigrationError> for AppError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::Validation(msg) => AppError::ValidationError(msg),
            MigrationError::Conflict(msg) => AppError::Conflict(msg),
            MigrationError::NotFound(id) => {
                AppError::NotFound(format!("Migration {} not found", id))
            }
            MigrationError::InvalidState { .. } => AppError::Conflict(err.to_string()),
            MigrationError::Internal(e) => AppError::InternalError(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, message).into_response()
    }
}
