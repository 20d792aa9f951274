/**
 * Comment Routes
 * Comments live under /titles/{title_id}/reviews/{review_id}/comments.
 * The parent is the review addressed by `review_id`; the title segment is
 * routing context only.
 */
use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::db::{self, models::CommentRow};
use crate::error::ApiError;
use crate::permissions::{author_or_staff_or_read_only, authenticated, write_requires_auth, Action};
use crate::routes::auth::current_actor;
use crate::validation::validate_text;

const COMMENT_SELECT: &str = "SELECT c.id, c.text, u.username AS author, c.pub_date \
     FROM comments c JOIN users u ON u.id = c.author_id";

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateCommentRequest {
    pub text: String,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct UpdateCommentRequest {
    pub text: Option<String>,
}

/// Parent check: requests against a nonexistent review stop here.
async fn review_exists(pool: &PgPool, review_id: i64) -> Result<(), ApiError> {
    let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM reviews WHERE id = $1")
        .bind(review_id)
        .fetch_optional(pool)
        .await?;
    if found.is_none() {
        return Err(ApiError::NotFound("review"));
    }
    Ok(())
}

async fn fetch_comment(
    pool: &PgPool,
    review_id: i64,
    comment_id: i64,
) -> Result<CommentRow, ApiError> {
    sqlx::query_as(&format!(
        "{} WHERE c.id = $1 AND c.review_id = $2",
        COMMENT_SELECT
    ))
    .bind(comment_id)
    .bind(review_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ApiError::NotFound("comment"))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET .../reviews/{review_id}/comments - newest first
pub async fn list_comments(
    Path((_title_id, review_id)): Path<(i64, i64)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let _actor = current_actor(&headers)?;

    let pool = db::pool()?;
    review_exists(pool.as_ref(), review_id).await?;

    let comments: Vec<CommentRow> = sqlx::query_as(&format!(
        "{} WHERE c.review_id = $1 ORDER BY c.pub_date DESC",
        COMMENT_SELECT
    ))
    .bind(review_id)
    .fetch_all(pool.as_ref())
    .await?;

    Ok(Json(comments))
}

/// POST .../reviews/{review_id}/comments - any authenticated actor
pub async fn create_comment(
    Path((_title_id, review_id)): Path<(i64, i64)>,
    headers: HeaderMap,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&headers)?;
    write_requires_auth(actor.as_ref(), Action::Write).into_result()?;
    let actor = authenticated(actor.as_ref())?;

    validate_text("text", &payload.text)?;

    let pool = db::pool()?;
    review_exists(pool.as_ref(), review_id).await?;

    let (id, pub_date): (i64, DateTime<Utc>) = sqlx::query_as(
        "INSERT INTO comments (review_id, author_id, text) \
         VALUES ($1, $2, $3) RETURNING id, pub_date",
    )
    .bind(review_id)
    .bind(actor.id)
    .bind(&payload.text)
    .fetch_one(pool.as_ref())
    .await?;

    tracing::info!("comment {} on review {} by {}", id, review_id, actor.username);
    Ok((
        StatusCode::CREATED,
        Json(CommentRow {
            id,
            text: payload.text,
            author: actor.username.clone(),
            pub_date,
        }),
    ))
}

/// GET .../comments/{comment_id}
pub async fn get_comment(
    Path((_title_id, review_id, comment_id)): Path<(i64, i64, i64)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let _actor = current_actor(&headers)?;

    let pool = db::pool()?;
    review_exists(pool.as_ref(), review_id).await?;
    let comment = fetch_comment(pool.as_ref(), review_id, comment_id).await?;

    Ok(Json(comment))
}

/// PATCH .../comments/{comment_id} - author, moderator or admin
pub async fn update_comment(
    Path((_title_id, review_id, comment_id)): Path<(i64, i64, i64)>,
    headers: HeaderMap,
    Json(payload): Json<UpdateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&headers)?;
    write_requires_auth(actor.as_ref(), Action::Write).into_result()?;

    let pool = db::pool()?;
    review_exists(pool.as_ref(), review_id).await?;

    let (author_id,): (uuid::Uuid,) =
        sqlx::query_as("SELECT author_id FROM comments WHERE id = $1 AND review_id = $2")
            .bind(comment_id)
            .bind(review_id)
            .fetch_optional(pool.as_ref())
            .await?
            .ok_or(ApiError::NotFound("comment"))?;
    author_or_staff_or_read_only(actor.as_ref(), Action::Write, author_id).into_result()?;

    if let Some(text) = &payload.text {
        validate_text("text", text)?;
    }

    sqlx::query("UPDATE comments SET text = COALESCE($2, text) WHERE id = $1")
        .bind(comment_id)
        .bind(&payload.text)
        .execute(pool.as_ref())
        .await?;

    let comment = fetch_comment(pool.as_ref(), review_id, comment_id).await?;
    Ok(Json(comment))
}

/// DELETE .../comments/{comment_id}
pub async fn delete_comment(
    Path((_title_id, review_id, comment_id)): Path<(i64, i64, i64)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&headers)?;
    write_requires_auth(actor.as_ref(), Action::Write).into_result()?;

    let pool = db::pool()?;
    review_exists(pool.as_ref(), review_id).await?;

    let (author_id,): (uuid::Uuid,) =
        sqlx::query_as("SELECT author_id FROM comments WHERE id = $1 AND review_id = $2")
            .bind(comment_id)
            .bind(review_id)
            .fetch_optional(pool.as_ref())
            .await?
            .ok_or(ApiError::NotFound("comment"))?;
    author_or_staff_or_read_only(actor.as_ref(), Action::Write, author_id).into_result()?;

    sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(comment_id)
        .execute(pool.as_ref())
        .await?;

    tracing::info!("comment {} on review {} deleted", comment_id, review_id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;
    use crate::routes::auth::test_access_token;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn comments_router() -> Router {
        Router::new()
            .route(
                "/api/v1/titles/{title_id}/reviews/{review_id}/comments",
                get(list_comments).post(create_comment),
            )
            .route(
                "/api/v1/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
                get(get_comment)
                    .patch(update_comment)
                    .delete(delete_comment),
            )
    }

    async fn send(
        app: Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        json: Option<serde_json::Value>,
    ) -> StatusCode {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let body = match json {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        let req = builder.body(body).unwrap();
        app.oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_list_comments_is_open_but_needs_db() {
        let status = send(
            comments_router(),
            "GET",
            "/api/v1/titles/1/reviews/2/comments",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_create_comment_anonymous_returns_unauthorized() {
        let status = send(
            comments_router(),
            "POST",
            "/api/v1/titles/1/reviews/2/comments",
            None,
            Some(serde_json::json!({"text": "agreed"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_comment_empty_text_returns_bad_request() {
        let token = test_access_token(Role::User, false);
        let status = send(
            comments_router(),
            "POST",
            "/api/v1/titles/1/reviews/2/comments",
            Some(&token),
            Some(serde_json::json!({"text": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_comment_valid_without_db_returns_unavailable() {
        let token = test_access_token(Role::User, false);
        let status = send(
            comments_router(),
            "POST",
            "/api/v1/titles/1/reviews/2/comments",
            Some(&token),
            Some(serde_json::json!({"text": "agreed"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_mutations_anonymous_return_unauthorized() {
        let status = send(
            comments_router(),
            "PATCH",
            "/api/v1/titles/1/reviews/2/comments/3",
            None,
            Some(serde_json::json!({"text": "edit"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let status = send(
            comments_router(),
            "DELETE",
            "/api/v1/titles/1/reviews/2/comments/3",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
