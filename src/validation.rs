/**
 * Validation Engine
 * Field-level checks shared by the auth workflow and the entity routes.
 */
use chrono::{Datelike, Utc};
use regex::Regex;

use crate::error::ApiError;

pub const USERNAME_MAX_LEN: usize = 150;
pub const EMAIL_MAX_LEN: usize = 254;
pub const PERSON_NAME_MAX_LEN: usize = 150;
pub const DICT_NAME_MAX_LEN: usize = 256;
pub const SLUG_MAX_LEN: usize = 50;
pub const CONFIRMATION_CODE_MAX_LEN: usize = 50;

lazy_static::lazy_static! {
    /// Word characters plus `.`, `@`, `+`, `-`.
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[\w.@+-]+$").unwrap();

    /// Valid slug pattern: letters, numbers, hyphens and underscores
    static ref SLUG_REGEX: Regex = Regex::new(r"^[-a-zA-Z0-9_]+$").unwrap();
}

fn invalid(field: &'static str, message: impl Into<String>) -> ApiError {
    ApiError::Validation {
        field,
        message: message.into(),
    }
}

/// Current calendar year, computed at call time.
pub fn current_year() -> i32 {
    Utc::now().year()
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.is_empty() {
        return Err(invalid("username", "username is required"));
    }
    if username.len() > USERNAME_MAX_LEN {
        return Err(invalid(
            "username",
            format!("username cannot exceed {} characters", USERNAME_MAX_LEN),
        ));
    }
    if !USERNAME_REGEX.is_match(username) {
        return Err(invalid("username", "username contains forbidden characters"));
    }
    // "me" is the self-reference path segment and can never be a username.
    if username.eq_ignore_ascii_case("me") {
        return Err(invalid("username", "username \"me\" is reserved"));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    if email.is_empty() {
        return Err(invalid("email", "email is required"));
    }
    if email.len() > EMAIL_MAX_LEN {
        return Err(invalid(
            "email",
            format!("email cannot exceed {} characters", EMAIL_MAX_LEN),
        ));
    }
    if !email.contains('@') {
        return Err(invalid("email", "invalid email format"));
    }
    Ok(())
}

pub fn validate_person_name(field: &'static str, value: &str) -> Result<(), ApiError> {
    if value.len() > PERSON_NAME_MAX_LEN {
        return Err(invalid(
            field,
            format!("{} cannot exceed {} characters", field, PERSON_NAME_MAX_LEN),
        ));
    }
    Ok(())
}

pub fn validate_dict_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(invalid("name", "name is required"));
    }
    if name.len() > DICT_NAME_MAX_LEN {
        return Err(invalid(
            "name",
            format!("name cannot exceed {} characters", DICT_NAME_MAX_LEN),
        ));
    }
    Ok(())
}

pub fn validate_slug(slug: &str) -> Result<(), ApiError> {
    if slug.is_empty() {
        return Err(invalid("slug", "slug is required"));
    }
    if slug.len() > SLUG_MAX_LEN {
        return Err(invalid(
            "slug",
            format!("slug cannot exceed {} characters", SLUG_MAX_LEN),
        ));
    }
    if !SLUG_REGEX.is_match(slug) {
        return Err(invalid("slug", "slug contains forbidden characters"));
    }
    Ok(())
}

/// Titles cannot be dated in the future or before year 0.
pub fn validate_year(year: i32) -> Result<(), ApiError> {
    if year < 0 {
        return Err(invalid("year", "year cannot be negative"));
    }
    if year > current_year() {
        return Err(invalid(
            "year",
            "year cannot be greater than the current year",
        ));
    }
    Ok(())
}

pub fn validate_score(score: i32) -> Result<(), ApiError> {
    if !(1..=10).contains(&score) {
        return Err(invalid("score", "score must be between 1 and 10"));
    }
    Ok(())
}

pub fn validate_text(field: &'static str, text: &str) -> Result<(), ApiError> {
    if text.is_empty() {
        return Err(invalid(field, format!("{} is required", field)));
    }
    Ok(())
}

pub fn validate_confirmation_code(code: &str) -> Result<(), ApiError> {
    if code.len() > CONFIRMATION_CODE_MAX_LEN {
        return Err(invalid(
            "confirmation_code",
            format!(
                "confirmation_code cannot exceed {} characters",
                CONFIRMATION_CODE_MAX_LEN
            ),
        ));
    }
    Ok(())
}
