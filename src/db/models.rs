//! Database Models - structs representing database tables (used by sqlx/serde).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User role. Stored as lowercase text in the `users` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

/// User model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub role: Role,
    /// Elevated-staff flag. Grants admin powers regardless of role.
    pub is_staff: bool,
    /// Secret mailed out at signup; blank until issued.
    #[serde(skip_serializing)]
    pub confirmation_code: String,
    pub created_at: DateTime<Utc>,
}

/// Category/Genre entry as exposed over the API (ids stay internal).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DictEntry {
    pub name: String,
    pub slug: String,
}

/// Title row as read from the store, with the aggregated rating and the
/// joined category columns. `rating` is NULL when the title has no reviews.
#[derive(Debug, Clone, FromRow)]
pub struct TitleRow {
    pub id: i64,
    pub name: String,
    pub year: i32,
    pub description: String,
    pub rating: Option<f64>,
    pub category_name: Option<String>,
    pub category_slug: Option<String>,
}

/// Review row with the author resolved to a username.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReviewRow {
    pub id: i64,
    pub text: String,
    pub author: String,
    pub score: i32,
    pub pub_date: DateTime<Utc>,
}

/// Comment row with the author resolved to a username.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CommentRow {
    pub id: i64,
    pub text: String,
    pub author: String,
    pub pub_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Moderator).unwrap(),
            "\"moderator\""
        );
    }

    #[test]
    fn test_role_rejects_unknown_value() {
        assert!(serde_json::from_str::<Role>("\"owner\"").is_err());
    }

    #[test]
    fn test_default_role_is_user() {
        assert_eq!(Role::default(), Role::User);
    }
}
