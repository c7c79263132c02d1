use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::repository::RepositoryError;

/// Failures surfaced by the approval and booking engines.
///
/// Authorization and validation variants are raised before any write. `ConcurrentModification`
/// is raised after a conditional write matched zero rows and is always safe to retry against
/// freshly fetched state.
#[derive(Debug, thiserror::Error)]
pub enum MarketplaceError {
    #[error("missing or invalid caller identity")]
    Unauthenticated,
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("cannot {action} a booking that is {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },
    #[error("property is already {0}")]
    AlreadyInState(&'static str),
    #[error("{entity} {id} was modified concurrently; fetch it again before retrying")]
    ConcurrentModification { entity: &'static str, id: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("property {0} is not open for bookings")]
    PropertyUnavailable(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl MarketplaceError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn concurrent(entity: &'static str, id: impl ToString) -> Self {
        Self::ConcurrentModification {
            entity,
            id: id.to_string(),
        }
    }

    /// Machine readable error kind returned to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketplaceError::Unauthenticated => "unauthenticated",
            MarketplaceError::NotFound { .. } => "not_found",
            MarketplaceError::Forbidden(_) => "forbidden",
            MarketplaceError::InvalidTransition { .. } => "invalid_transition",
            MarketplaceError::AlreadyInState(_) => "already_in_state",
            MarketplaceError::ConcurrentModification { .. } => "concurrent_modification",
            MarketplaceError::Validation(_) => "validation_error",
            MarketplaceError::PropertyUnavailable(_) => "property_unavailable",
            MarketplaceError::Repository(RepositoryError::NotFound) => "not_found",
            MarketplaceError::Repository(RepositoryError::Conflict) => "conflict",
            MarketplaceError::Repository(RepositoryError::Unavailable(_)) => "store_unavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            MarketplaceError::Unauthenticated => StatusCode::UNAUTHORIZED,
            MarketplaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            MarketplaceError::Forbidden(_) => StatusCode::FORBIDDEN,
            MarketplaceError::InvalidTransition { .. }
            | MarketplaceError::ConcurrentModification { .. } => StatusCode::CONFLICT,
            MarketplaceError::AlreadyInState(_)
            | MarketplaceError::Validation(_)
            | MarketplaceError::PropertyUnavailable(_) => StatusCode::BAD_REQUEST,
            MarketplaceError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            MarketplaceError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
            MarketplaceError::Repository(RepositoryError::Unavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for MarketplaceError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}
