/**
 * Authorization Engine
 * Pure (actor, action, resource) -> verdict policies, built from small
 * predicates. No request framework involved; routes convert verdicts
 * into responses through `Verdict::into_result`.
 */
use uuid::Uuid;

use crate::db::models::Role;
use crate::error::ApiError;

/// The identity attached to a request, built from verified token claims.
/// Anonymous requests carry no actor (`Option<&Actor>` is `None`).
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub is_staff: bool,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin || self.is_staff
    }

    pub fn is_moderator(&self) -> bool {
        self.role == Role::Moderator
    }
}

/// Whether the operation only reads state or mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// Anonymous actor on an operation that needs an identity -> 401.
    AuthRequired,
    /// Known actor lacking role or ownership -> 403.
    Forbidden,
}

impl Verdict {
    pub fn into_result(self) -> Result<(), ApiError> {
        match self {
            Verdict::Allow => Ok(()),
            Verdict::AuthRequired => Err(ApiError::AuthRequired),
            Verdict::Forbidden => Err(ApiError::Forbidden),
        }
    }
}

fn is_safe(action: Action) -> bool {
    action == Action::Read
}

fn is_owner(actor: &Actor, author_id: Uuid) -> bool {
    actor.id == author_id
}

/// Anyone may read; only admins may write. Categories, genres and titles.
pub fn read_only_or_admin(actor: Option<&Actor>, action: Action) -> Verdict {
    if is_safe(action) {
        return Verdict::Allow;
    }
    match actor {
        None => Verdict::AuthRequired,
        Some(a) if a.is_admin() => Verdict::Allow,
        Some(_) => Verdict::Forbidden,
    }
}

/// Request-level gate for nested create: reads are open, writes need any
/// authenticated actor. Object-level ownership is checked separately.
pub fn write_requires_auth(actor: Option<&Actor>, action: Action) -> Verdict {
    if is_safe(action) || actor.is_some() {
        Verdict::Allow
    } else {
        Verdict::AuthRequired
    }
}

/// Object-level policy for reviews and comments: reads are open, writes
/// are allowed to the resource's author, moderators and admins.
pub fn author_or_staff_or_read_only(
    actor: Option<&Actor>,
    action: Action,
    author_id: Uuid,
) -> Verdict {
    if is_safe(action) {
        return Verdict::Allow;
    }
    match actor {
        None => Verdict::AuthRequired,
        Some(a) if is_owner(a, author_id) || a.is_admin() || a.is_moderator() => Verdict::Allow,
        Some(_) => Verdict::Forbidden,
    }
}

/// User collection management.
pub fn admin_only(actor: Option<&Actor>) -> Verdict {
    match actor {
        None => Verdict::AuthRequired,
        Some(a) if a.is_admin() => Verdict::Allow,
        Some(_) => Verdict::Forbidden,
    }
}

/// The self-profile endpoint: any non-anonymous actor, own record only.
pub fn authenticated(actor: Option<&Actor>) -> Result<&Actor, ApiError> {
    actor.ok_or(ApiError::AuthRequired)
}
