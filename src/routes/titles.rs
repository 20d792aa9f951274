/**
 * Title Routes
 * CRUD for reviewable works. Reads nest the category/genre objects and the
 * aggregated rating; writes reference category and genres by slug.
 */
use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use std::collections::HashMap;

use crate::db::{self, models::DictEntry, models::TitleRow};
use crate::error::ApiError;
use crate::permissions::{read_only_or_admin, Action};
use crate::routes::auth::current_actor;
use crate::validation::{validate_text, validate_year};

/// Base read query. The rating subselect yields NULL for a title without
/// reviews, which serializes as `null`, never as zero.
const TITLE_SELECT: &str = "SELECT t.id, t.name, t.year, t.description, \
     c.name AS category_name, c.slug AS category_slug, \
     (SELECT AVG(r.score)::float8 FROM reviews r WHERE r.title_id = t.id) AS rating \
     FROM titles t \
     LEFT JOIN categories c ON c.id = t.category_id";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for GET /api/v1/titles
#[derive(Debug, Deserialize, Default)]
pub struct TitleFilter {
    pub category: Option<String>,
    pub genre: Option<String>,
    pub name: Option<String>,
    pub year: Option<i32>,
}

/// Read representation with nested category/genre objects
#[derive(Debug, Serialize)]
pub struct TitleRead {
    pub id: i64,
    pub name: String,
    pub year: i32,
    pub rating: Option<f64>,
    pub description: String,
    pub category: Option<DictEntry>,
    pub genre: Vec<DictEntry>,
}

/// Request body for POST /api/v1/titles
#[derive(Debug, Deserialize, Serialize)]
pub struct CreateTitleRequest {
    pub name: String,
    pub year: i32,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub genre: Vec<String>,
}

/// Request body for PATCH /api/v1/titles/{title_id}
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct UpdateTitleRequest {
    pub name: Option<String>,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub genre: Option<Vec<String>>,
}

/// Write representation echoed back from create/update: category and
/// genres as slugs, no rating.
#[derive(Debug, Serialize)]
pub struct TitleWritten {
    pub id: i64,
    pub name: String,
    pub year: i32,
    pub description: String,
    pub category: Option<String>,
    pub genre: Vec<String>,
}

// ============================================================================
// Helpers
// ============================================================================

fn to_read(row: TitleRow, genre: Vec<DictEntry>) -> TitleRead {
    let category = match (row.category_name, row.category_slug) {
        (Some(name), Some(slug)) => Some(DictEntry { name, slug }),
        _ => None,
    };
    TitleRead {
        id: row.id,
        name: row.name,
        year: row.year,
        rating: row.rating,
        description: row.description,
        category,
        genre,
    }
}

/// Genres for a set of titles, ordered by name within each title.
async fn genres_for_titles(
    pool: &sqlx::PgPool,
    title_ids: &[i64],
) -> Result<HashMap<i64, Vec<DictEntry>>, ApiError> {
    if title_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(i64, String, String)> = sqlx::query_as(
        "SELECT tg.title_id, g.name, g.slug \
         FROM title_genres tg \
         JOIN genres g ON g.id = tg.genre_id \
         WHERE tg.title_id = ANY($1) \
         ORDER BY g.name",
    )
    .bind(title_ids)
    .fetch_all(pool)
    .await?;

    let mut by_title: HashMap<i64, Vec<DictEntry>> = HashMap::new();
    for (title_id, name, slug) in rows {
        by_title
            .entry(title_id)
            .or_default()
            .push(DictEntry { name, slug });
    }
    Ok(by_title)
}

async fn resolve_category(conn: &mut PgConnection, slug: &str) -> Result<i64, ApiError> {
    let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM categories WHERE slug = $1")
        .bind(slug)
        .fetch_optional(conn)
        .await?;
    match found {
        Some((id,)) => Ok(id),
        None => Err(ApiError::Validation {
            field: "category",
            message: format!("category with slug '{}' does not exist", slug),
        }),
    }
}

/// Resolve genre slugs to ids, deduplicated, rejecting unknown slugs.
async fn resolve_genres(
    conn: &mut PgConnection,
    slugs: &[String],
) -> Result<Vec<(i64, String)>, ApiError> {
    let mut deduped: Vec<String> = Vec::new();
    for slug in slugs {
        if !deduped.contains(slug) {
            deduped.push(slug.clone());
        }
    }

    let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, slug FROM genres WHERE slug = ANY($1)")
        .bind(&deduped)
        .fetch_all(conn)
        .await?;
    let by_slug: HashMap<String, i64> = rows.into_iter().map(|(id, slug)| (slug, id)).collect();

    deduped
        .into_iter()
        .map(|slug| match by_slug.get(&slug) {
            Some(id) => Ok((*id, slug)),
            None => Err(ApiError::Validation {
                field: "genre",
                message: format!("genre with slug '{}' does not exist", slug),
            }),
        })
        .collect()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/titles - list with optional category/genre/name/year filters
pub async fn list_titles(
    headers: HeaderMap,
    Query(filter): Query<TitleFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&headers)?;
    read_only_or_admin(actor.as_ref(), Action::Read).into_result()?;

    let pool = db::pool()?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(TITLE_SELECT);
    qb.push(" WHERE TRUE");
    if let Some(slug) = &filter.category {
        qb.push(" AND c.slug = ").push_bind(slug);
    }
    if let Some(slug) = &filter.genre {
        qb.push(
            " AND EXISTS (SELECT 1 FROM title_genres tg \
             JOIN genres g ON g.id = tg.genre_id \
             WHERE tg.title_id = t.id AND g.slug = ",
        )
        .push_bind(slug)
        .push(")");
    }
    if let Some(name) = &filter.name {
        qb.push(" AND t.name ILIKE '%' || ").push_bind(name).push(" || '%'");
    }
    if let Some(year) = filter.year {
        qb.push(" AND t.year = ").push_bind(year);
    }
    qb.push(" ORDER BY t.id");

    let rows: Vec<TitleRow> = qb.build_query_as().fetch_all(pool.as_ref()).await?;

    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut genres = genres_for_titles(pool.as_ref(), &ids).await?;

    let titles: Vec<TitleRead> = rows
        .into_iter()
        .map(|row| {
            let genre = genres.remove(&row.id).unwrap_or_default();
            to_read(row, genre)
        })
        .collect();

    Ok(Json(titles))
}

/// GET /api/v1/titles/{title_id}
pub async fn get_title(
    Path(title_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&headers)?;
    read_only_or_admin(actor.as_ref(), Action::Read).into_result()?;

    let pool = db::pool()?;
    let row: TitleRow = sqlx::query_as(&format!("{} WHERE t.id = $1", TITLE_SELECT))
        .bind(title_id)
        .fetch_optional(pool.as_ref())
        .await?
        .ok_or(ApiError::NotFound("title"))?;

    let mut genres = genres_for_titles(pool.as_ref(), &[title_id]).await?;
    let genre = genres.remove(&title_id).unwrap_or_default();

    Ok(Json(to_read(row, genre)))
}

/// POST /api/v1/titles - category and genres referenced by slug
pub async fn create_title(
    headers: HeaderMap,
    Json(payload): Json<CreateTitleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&headers)?;
    read_only_or_admin(actor.as_ref(), Action::Write).into_result()?;

    validate_text("name", &payload.name)?;
    validate_year(payload.year)?;

    let pool = db::pool()?;
    let mut tx = pool.begin().await?;

    let category_id = resolve_category(&mut tx, &payload.category).await?;
    let genres = resolve_genres(&mut tx, &payload.genre).await?;

    let (title_id,): (i64,) = sqlx::query_as(
        "INSERT INTO titles (name, year, description, category_id) \
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(&payload.name)
    .bind(payload.year)
    .bind(&payload.description)
    .bind(category_id)
    .fetch_one(&mut *tx)
    .await?;

    for (genre_id, _) in &genres {
        sqlx::query("INSERT INTO title_genres (title_id, genre_id) VALUES ($1, $2)")
            .bind(title_id)
            .bind(genre_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    tracing::info!("title '{}' created (id {})", payload.name, title_id);

    Ok((
        StatusCode::CREATED,
        Json(TitleWritten {
            id: title_id,
            name: payload.name,
            year: payload.year,
            description: payload.description,
            category: Some(payload.category),
            genre: genres.into_iter().map(|(_, slug)| slug).collect(),
        }),
    ))
}

/// PATCH /api/v1/titles/{title_id} - partial update; a genre list replaces
/// the existing join rows wholesale
pub async fn update_title(
    Path(title_id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<UpdateTitleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&headers)?;
    read_only_or_admin(actor.as_ref(), Action::Write).into_result()?;

    if let Some(name) = &payload.name {
        validate_text("name", name)?;
    }
    if let Some(year) = payload.year {
        validate_year(year)?;
    }

    let pool = db::pool()?;
    let mut tx = pool.begin().await?;

    let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM titles WHERE id = $1")
        .bind(title_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(ApiError::NotFound("title"));
    }

    let category_id = match &payload.category {
        Some(slug) => Some(resolve_category(&mut tx, slug).await?),
        None => None,
    };

    sqlx::query(
        "UPDATE titles SET \
             name = COALESCE($2, name), \
             year = COALESCE($3, year), \
             description = COALESCE($4, description), \
             category_id = COALESCE($5, category_id) \
         WHERE id = $1",
    )
    .bind(title_id)
    .bind(&payload.name)
    .bind(payload.year)
    .bind(&payload.description)
    .bind(category_id)
    .execute(&mut *tx)
    .await?;

    if let Some(slugs) = &payload.genre {
        let genres = resolve_genres(&mut tx, slugs).await?;
        sqlx::query("DELETE FROM title_genres WHERE title_id = $1")
            .bind(title_id)
            .execute(&mut *tx)
            .await?;
        for (genre_id, _) in &genres {
            sqlx::query("INSERT INTO title_genres (title_id, genre_id) VALUES ($1, $2)")
                .bind(title_id)
                .bind(genre_id)
                .execute(&mut *tx)
                .await?;
        }
    }

    let (name, year, description, category): (String, i32, String, Option<String>) =
        sqlx::query_as(
            "SELECT t.name, t.year, t.description, c.slug \
             FROM titles t LEFT JOIN categories c ON c.id = t.category_id \
             WHERE t.id = $1",
        )
        .bind(title_id)
        .fetch_one(&mut *tx)
        .await?;
    let genre: Vec<(String,)> = sqlx::query_as(
        "SELECT g.slug FROM title_genres tg \
         JOIN genres g ON g.id = tg.genre_id \
         WHERE tg.title_id = $1 ORDER BY g.name",
    )
    .bind(title_id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(TitleWritten {
        id: title_id,
        name,
        year,
        description,
        category,
        genre: genre.into_iter().map(|(slug,)| slug).collect(),
    }))
}

/// DELETE /api/v1/titles/{title_id} - reviews (and their comments) cascade
pub async fn delete_title(
    Path(title_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = current_actor(&headers)?;
    read_only_or_admin(actor.as_ref(), Action::Write).into_result()?;

    let pool = db::pool()?;
    let deleted: Option<(i64,)> = sqlx::query_as("DELETE FROM titles WHERE id = $1 RETURNING id")
        .bind(title_id)
        .fetch_optional(pool.as_ref())
        .await?;

    if deleted.is_none() {
        return Err(ApiError::NotFound("title"));
    }
    tracing::info!("title {} deleted", title_id);
    Ok(StatusCode::NO_CONTENT)
}
