/**
 * Review Routes
 * Reviews live under /titles/{title_id}/reviews. One review per author per
 * title; the unique constraint in the store is the authoritative guard,
 * the pre-check just gives the common case a clean error.
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

use crate::db::{self, models::ReviewRow};
use crate::error::{translate_constraint, ApiError, CollisionKind};
use crate::permissions::{author_or_staff_or_read_only, authenticated, write_requires_auth, Action};
use crate::routes::auth::current_actor;
use crate::validation::{validate_score, validate_text};

const REVIEW_SELECT: &str = "SELECT r.id, r.text, u.username AS author, r.score, r.pub_date \
     FROM reviews r JOIN users u ON u.id = r.author_id";

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateReviewRequest {
    pub text: String,
    pub score: i32,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct UpdateReviewRequest {
    pub text: Option<String>,
    pub score: Option<i32>,
}

/// Parent check: requests against a nonexistent title stop here.
pub(crate) async fn title_exists(pool: &PgPool, title_id: i64) -> Result<(), ApiError> {
    let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM titles WHERE id = $1")
        .bind(title_id)
        .fetch_optional(pool)
        .await?;
    if found.is_none() {
        return Err(ApiError::NotFound("title"));
    }
    Ok(())
}

async fn fetch_review(
    pool: &PgPool,
    title_id: i64,
    review_id: i64,
) -> Result<ReviewRow, ApiError> {
    sqlx::query_as(&format!(
        "{} WHERE r.id = $1 AND r.title_id = $2",
        REVIEW_SELECT
    ))
    .bind(review_id)
    .bind(title_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ApiError::NotFound("review"))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/titles/{title_id}/reviews - newest first
pub async fn list_reviews(
    Path(title_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let _actor = current_actor(&headers)?;

    let pool = db::pool()?;
    title_exists(pool.as_ref(), title_id).await?;

    let reviews: Vec<ReviewRow> = sqlx::query_as(&format!(
        "{} WHERE r.title_id = $1 ORDER BY r.pub_date DESC",
        REVIEW_SELECT
    ))
    .bind(title_id)
    .fetch_all(pool.as_ref())
    .await?;

    Ok(Json(reviews))
}

/// POST /api/v1/titles/{title_id}/reviews - any authenticated actor, at
/// most once per title
pub async fn create_review(
    Path(title_id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<CreateReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&headers)?;
    write_requires_auth(actor.as_ref(), Action::Write).into_result()?;
    let actor = authenticated(actor.as_ref())?;

    validate_text("text", &payload.text)?;
    validate_score(payload.score)?;

    let pool = db::pool()?;
    title_exists(pool.as_ref(), title_id).await?;

    // Fast path; the unique constraint below still decides races.
    let (already_reviewed,): (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM reviews WHERE title_id = $1 AND author_id = $2)",
    )
    .bind(title_id)
    .bind(actor.id)
    .fetch_one(pool.as_ref())
    .await?;
    if already_reviewed {
        return Err(ApiError::Collision(CollisionKind::AuthorTitle));
    }

    let (id, pub_date): (i64, DateTime<Utc>) = sqlx::query_as(
        "INSERT INTO reviews (title_id, author_id, text, score) \
         VALUES ($1, $2, $3, $4) RETURNING id, pub_date",
    )
    .bind(title_id)
    .bind(actor.id)
    .bind(&payload.text)
    .bind(payload.score)
    .fetch_one(pool.as_ref())
    .await
    .map_err(translate_constraint)?;

    tracing::info!("review {} on title {} by {}", id, title_id, actor.username);
    Ok((
        StatusCode::CREATED,
        Json(ReviewRow {
            id,
            text: payload.text,
            author: actor.username.clone(),
            score: payload.score,
            pub_date,
        }),
    ))
}

/// GET /api/v1/titles/{title_id}/reviews/{review_id}
pub async fn get_review(
    Path((title_id, review_id)): Path<(i64, i64)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let _actor = current_actor(&headers)?;

    let pool = db::pool()?;
    title_exists(pool.as_ref(), title_id).await?;
    let review = fetch_review(pool.as_ref(), title_id, review_id).await?;

    Ok(Json(review))
}

/// PATCH /api/v1/titles/{title_id}/reviews/{review_id} - author, moderator
/// or admin. No duplicate check here: updating can't create a second review.
pub async fn update_review(
    Path((title_id, review_id)): Path<(i64, i64)>,
    headers: HeaderMap,
    Json(payload): Json<UpdateReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&headers)?;
    write_requires_auth(actor.as_ref(), Action::Write).into_result()?;

    let pool = db::pool()?;
    title_exists(pool.as_ref(), title_id).await?;

    let (author_id,): (uuid::Uuid,) =
        sqlx::query_as("SELECT author_id FROM reviews WHERE id = $1 AND title_id = $2")
            .bind(review_id)
            .bind(title_id)
            .fetch_optional(pool.as_ref())
            .await?
            .ok_or(ApiError::NotFound("review"))?;
    author_or_staff_or_read_only(actor.as_ref(), Action::Write, author_id).into_result()?;

    if let Some(text) = &payload.text {
        validate_text("text", text)?;
    }
    if let Some(score) = payload.score {
        validate_score(score)?;
    }

    sqlx::query(
        "UPDATE reviews SET text = COALESCE($2, text), score = COALESCE($3, score) \
         WHERE id = $1",
    )
    .bind(review_id)
    .bind(&payload.text)
    .bind(payload.score)
    .execute(pool.as_ref())
    .await?;

    let review = fetch_review(pool.as_ref(), title_id, review_id).await?;
    Ok(Json(review))
}

/// DELETE /api/v1/titles/{title_id}/reviews/{review_id} - comments cascade
pub async fn delete_review(
    Path((title_id, review_id)): Path<(i64, i64)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&headers)?;
    write_requires_auth(actor.as_ref(), Action::Write).into_result()?;

    let pool = db::pool()?;
    title_exists(pool.as_ref(), title_id).await?;

    let (author_id,): (uuid::Uuid,) =
        sqlx::query_as("SELECT author_id FROM reviews WHERE id = $1 AND title_id = $2")
            .bind(review_id)
            .bind(title_id)
            .fetch_optional(pool.as_ref())
            .await?
            .ok_or(ApiError::NotFound("review"))?;
    author_or_staff_or_read_only(actor.as_ref(), Action::Write, author_id).into_result()?;

    sqlx::query("DELETE FROM reviews WHERE id = $1")
        .bind(review_id)
        .execute(pool.as_ref())
        .await?;

    tracing::info!("review {} on title {} deleted", review_id, title_id);
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

    fn reviews_router() -> Router {
        Router::new()
            .route(
                "/api/v1/titles/{title_id}/reviews",
                get(list_reviews).post(create_review),
            )
            .route(
                "/api/v1/titles/{title_id}/reviews/{review_id}",
                get(get_review).patch(update_review).delete(delete_review),
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
    async fn test_list_reviews_is_open_but_needs_db() {
        let status = send(reviews_router(), "GET", "/api/v1/titles/1/reviews", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_create_review_anonymous_returns_unauthorized() {
        let status = send(
            reviews_router(),
            "POST",
            "/api/v1/titles/1/reviews",
            None,
            Some(serde_json::json!({"text": "great", "score": 9})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_review_score_out_of_range_returns_bad_request() {
        let token = test_access_token(Role::User, false);
        for score in [0, 11, -3] {
            let status = send(
                reviews_router(),
                "POST",
                "/api/v1/titles/1/reviews",
                Some(&token),
                Some(serde_json::json!({"text": "great", "score": score})),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "score {score}");
        }
    }

    #[tokio::test]
    async fn test_create_review_empty_text_returns_bad_request() {
        let token = test_access_token(Role::User, false);
        let status = send(
            reviews_router(),
            "POST",
            "/api/v1/titles/1/reviews",
            Some(&token),
            Some(serde_json::json!({"text": "", "score": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_review_valid_without_db_returns_unavailable() {
        let token = test_access_token(Role::User, false);
        let status = send(
            reviews_router(),
            "POST",
            "/api/v1/titles/1/reviews",
            Some(&token),
            Some(serde_json::json!({"text": "great", "score": 9})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_update_review_anonymous_returns_unauthorized() {
        let status = send(
            reviews_router(),
            "PATCH",
            "/api/v1/titles/1/reviews/2",
            None,
            Some(serde_json::json!({"score": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_delete_review_anonymous_returns_unauthorized() {
        let status = send(
            reviews_router(),
            "DELETE",
            "/api/v1/titles/1/reviews/2",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
