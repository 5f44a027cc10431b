use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tally_shared::ErrorBody;
use thiserror::Error;

/// Failures of the post store and metrics provider.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("request dropped before the query ran")]
    Cancelled,
}

/// Rejected request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("page must be at least 1, got {0}")]
    Page(i64),

    #[error("limit must be at least 1, got {0}")]
    Limit(i64),

    #[error("limit must be at most {max}, got {limit}")]
    LimitTooLarge { limit: i64, max: u64 },

    #[error("invalid community id: {0}")]
    CommunityId(String),

    #[error("invalid query string: {0}")]
    Query(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            AppError::Store(err) => {
                tracing::error!(error = %err, "feed store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}
