/**
 * Error Types
 * One taxonomy for every failure the API reports, with the HTTP mapping
 * in a single place.
 */
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// JSON body every error renders to.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Which uniqueness constraint a write collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    Username,
    Email,
    Slug,
    AuthorTitle,
}

impl std::fmt::Display for CollisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollisionKind::Username => write!(f, "a user with this username already exists"),
            CollisionKind::Email => write!(f, "a user with this email already exists"),
            CollisionKind::Slug => write!(f, "an entry with this slug already exists"),
            CollisionKind::AuthorTitle => {
                write!(f, "a review for this title from this author already exists")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or forbidden field value.
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// Uniqueness violation, either pre-checked or reported by the store.
    #[error("{0}")]
    Collision(CollisionKind),

    /// Anonymous actor attempted an operation that needs an identity.
    #[error("authentication required")]
    AuthRequired,

    /// Authenticated actor lacking the role or ownership for the operation.
    #[error("you do not have permission to perform this action")]
    Forbidden,

    /// Target or parent entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The connection pool has not been initialized.
    #[error("database not available")]
    Unavailable,

    /// Unrecognized storage fault. Details are logged, not exposed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } | ApiError::Collision(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthRequired => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            ApiError::Validation { field, message } => ErrorBody {
                error: message.clone(),
                field: Some((*field).to_string()),
            },
            ApiError::Database(e) => {
                tracing::error!("database error: {}", e);
                ErrorBody {
                    error: "Internal server error".to_string(),
                    field: None,
                }
            }
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                ErrorBody {
                    error: "Internal server error".to_string(),
                    field: None,
                }
            }
            other => ErrorBody {
                error: other.to_string(),
                field: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Translate a unique-constraint violation raised during a write into the
/// matching collision error. The store is the authoritative guard for
/// uniqueness, so concurrent duplicate writers land here rather than
/// corrupting state. Anything else passes through as a storage fault.
pub fn translate_constraint(err: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() {
            let constraint = db.constraint().unwrap_or_default();
            if constraint.contains("author") {
                return ApiError::Collision(CollisionKind::AuthorTitle);
            }
            if constraint.contains("username") {
                return ApiError::Collision(CollisionKind::Username);
            }
            if constraint.contains("email") {
                return ApiError::Collision(CollisionKind::Email);
            }
            if constraint.contains("slug") {
                return ApiError::Collision(CollisionKind::Slug);
            }
        }
    }
    ApiError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let validation = ApiError::Validation {
            field: "username",
            message: "bad".to_string(),
        };
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Collision(CollisionKind::AuthorTitle).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::AuthRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("title").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Unavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_validation_body_carries_field() {
        let err = ApiError::Validation {
            field: "year",
            message: "year cannot be greater than the current year".to_string(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_collision_messages_distinguish_kinds() {
        let username = ApiError::Collision(CollisionKind::Username).to_string();
        let email = ApiError::Collision(CollisionKind::Email).to_string();
        assert!(username.contains("username"));
        assert!(email.contains("email"));
        assert_ne!(username, email);
    }

    #[test]
    fn test_non_unique_db_error_stays_database() {
        let err = translate_constraint(sqlx::Error::RowNotFound);
        assert!(matches!(err, ApiError::Database(_)));
    }
}
