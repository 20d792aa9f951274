/**
 * Dictionary Routes
 * Categories and genres share one shape: name + unique slug, list with
 * partial name search, admin-only create and delete-by-slug. One core,
 * two bindings.
 */
use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::{self, models::DictEntry};
use crate::error::{translate_constraint, ApiError};
use crate::permissions::{read_only_or_admin, Action};
use crate::routes::auth::current_actor;
use crate::validation::{validate_dict_name, validate_slug};

/// A dictionary table. `table` is interpolated into SQL and must be one of
/// the fixed constants below, never request data.
#[derive(Debug, Clone, Copy)]
struct Dictionary {
    table: &'static str,
    what: &'static str,
}

const CATEGORIES: Dictionary = Dictionary {
    table: "categories",
    what: "category",
};

const GENRES: Dictionary = Dictionary {
    table: "genres",
    what: "genre",
};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateDictEntry {
    pub name: String,
    pub slug: String,
}

// ============================================================================
// Core
// ============================================================================

async fn list(
    dict: Dictionary,
    headers: &HeaderMap,
    query: SearchQuery,
) -> Result<Json<Vec<DictEntry>>, ApiError> {
    let actor = current_actor(headers)?;
    read_only_or_admin(actor.as_ref(), Action::Read).into_result()?;

    let pool = db::pool()?;
    let entries: Vec<DictEntry> = match query.search {
        Some(search) => {
            sqlx::query_as(&format!(
                "SELECT name, slug FROM {} WHERE name ILIKE '%' || $1 || '%' ORDER BY name",
                dict.table
            ))
            .bind(search)
            .fetch_all(pool.as_ref())
            .await?
        }
        None => {
            sqlx::query_as(&format!(
                "SELECT name, slug FROM {} ORDER BY name",
                dict.table
            ))
            .fetch_all(pool.as_ref())
            .await?
        }
    };

    Ok(Json(entries))
}

async fn create(
    dict: Dictionary,
    headers: &HeaderMap,
    payload: CreateDictEntry,
) -> Result<(StatusCode, Json<DictEntry>), ApiError> {
    let actor = current_actor(headers)?;
    read_only_or_admin(actor.as_ref(), Action::Write).into_result()?;

    validate_dict_name(&payload.name)?;
    validate_slug(&payload.slug)?;

    let pool = db::pool()?;
    let entry: DictEntry = sqlx::query_as(&format!(
        "INSERT INTO {} (name, slug) VALUES ($1, $2) RETURNING name, slug",
        dict.table
    ))
    .bind(&payload.name)
    .bind(&payload.slug)
    .fetch_one(pool.as_ref())
    .await
    .map_err(translate_constraint)?;

    tracing::info!("{} '{}' created", dict.what, entry.slug);
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn destroy(
    dict: Dictionary,
    headers: &HeaderMap,
    slug: String,
) -> Result<StatusCode, ApiError> {
    let actor = current_actor(headers)?;
    read_only_or_admin(actor.as_ref(), Action::Write).into_result()?;

    let pool = db::pool()?;
    let deleted: Option<(String,)> = sqlx::query_as(&format!(
        "DELETE FROM {} WHERE slug = $1 RETURNING slug",
        dict.table
    ))
    .bind(&slug)
    .fetch_optional(pool.as_ref())
    .await?;

    if deleted.is_none() {
        return Err(ApiError::NotFound(dict.what));
    }
    tracing::info!("{} '{}' deleted", dict.what, slug);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/categories
pub async fn list_categories(
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    list(CATEGORIES, &headers, query).await
}

/// POST /api/v1/categories
pub async fn create_category(
    headers: HeaderMap,
    Json(payload): Json<CreateDictEntry>,
) -> Result<impl IntoResponse, ApiError> {
    create(CATEGORIES, &headers, payload).await
}

/// DELETE /api/v1/categories/{slug} - dependent titles survive with their
/// category reference cleared
pub async fn delete_category(
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    destroy(CATEGORIES, &headers, slug).await
}

/// GET /api/v1/genres
pub async fn list_genres(
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    list(GENRES, &headers, query).await
}

/// POST /api/v1/genres
pub async fn create_genre(
    headers: HeaderMap,
    Json(payload): Json<CreateDictEntry>,
) -> Result<impl IntoResponse, ApiError> {
    create(GENRES, &headers, payload).await
}

/// DELETE /api/v1/genres/{slug} - join rows cascade, titles stay
pub async fn delete_genre(
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    destroy(GENRES, &headers, slug).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;
    use crate::routes::auth::test_access_token;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::{delete, get};
    use axum::Router;
    use tower::ServiceExt;

    fn dict_router() -> Router {
        Router::new()
            .route(
                "/api/v1/categories",
                get(list_categories).post(create_category),
            )
            .route("/api/v1/categories/{slug}", delete(delete_category))
            .route("/api/v1/genres", get(list_genres).post(create_genre))
            .route("/api/v1/genres/{slug}", delete(delete_genre))
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
    async fn test_list_is_open_but_needs_db() {
        let status = send(dict_router(), "GET", "/api/v1/categories", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let status = send(dict_router(), "GET", "/api/v1/genres?search=ro", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_create_anonymous_returns_unauthorized() {
        let status = send(
            dict_router(),
            "POST",
            "/api/v1/categories",
            None,
            Some(serde_json::json!({"name": "Books", "slug": "books"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_plain_user_returns_forbidden() {
        let token = test_access_token(Role::User, false);
        let status = send(
            dict_router(),
            "POST",
            "/api/v1/genres",
            Some(&token),
            Some(serde_json::json!({"name": "Rock", "slug": "rock"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_create_admin_invalid_slug_returns_bad_request() {
        let token = test_access_token(Role::Admin, false);
        let status = send(
            dict_router(),
            "POST",
            "/api/v1/categories",
            Some(&token),
            Some(serde_json::json!({"name": "Books", "slug": "not a slug"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_admin_empty_name_returns_bad_request() {
        let token = test_access_token(Role::Admin, false);
        let status = send(
            dict_router(),
            "POST",
            "/api/v1/categories",
            Some(&token),
            Some(serde_json::json!({"name": "", "slug": "books"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_anonymous_returns_unauthorized() {
        let status = send(dict_router(), "DELETE", "/api/v1/genres/rock", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_delete_admin_without_db_returns_unavailable() {
        let token = test_access_token(Role::Admin, false);
        let status = send(
            dict_router(),
            "DELETE",
            "/api/v1/categories/books",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
