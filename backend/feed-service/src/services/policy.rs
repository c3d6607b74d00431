//! Permission policy
//!
//! A permission is a pure predicate over `(requester, object_owner)`; each
//! resource lists the permissions every action must pass. `object_owner` is
//! `None` for actions that do not target a single object, and owner checks
//! pass trivially there.

use crate::error::{AppError, Result};
use uuid::Uuid;

pub const DENIED_MESSAGE: &str = "You do not have permission to access this object";
pub const UNAUTHENTICATED_MESSAGE: &str = "Authentication credentials were not provided";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    List,
    Retrieve,
    Create,
    Update,
    Destroy,
}

pub type Predicate = fn(Option<Uuid>, Option<Uuid>) -> bool;

#[derive(Clone, Copy)]
pub struct Permission {
    pub name: &'static str,
    pub check: Predicate,
    /// Failing this permission means "who are you" rather than "not yours"
    pub requires_identity: bool,
}

pub fn allow_any(_requester: Option<Uuid>, _owner: Option<Uuid>) -> bool {
    true
}

pub fn is_authenticated(requester: Option<Uuid>, _owner: Option<Uuid>) -> bool {
    requester.is_some()
}

pub fn is_object_owner(requester: Option<Uuid>, owner: Option<Uuid>) -> bool {
    match (requester, owner) {
        (_, None) => true,
        (Some(requester), Some(owner)) => requester == owner,
        (None, Some(_)) => false,
    }
}

pub const ALLOW_ANY: Permission = Permission {
    name: "allow_any",
    check: allow_any,
    requires_identity: false,
};

pub const IS_AUTHENTICATED: Permission = Permission {
    name: "is_authenticated",
    check: is_authenticated,
    requires_identity: true,
};

pub const IS_OBJECT_OWNER: Permission = Permission {
    name: "is_object_owner",
    check: is_object_owner,
    requires_identity: false,
};

/// Per-action permission sets for one resource
#[derive(Clone, Copy)]
pub struct Policy {
    pub resource: &'static str,
    rules: fn(Action) -> &'static [Permission],
}

impl Policy {
    pub const fn new(resource: &'static str, rules: fn(Action) -> &'static [Permission]) -> Self {
        Self { resource, rules }
    }

    pub fn permissions(&self, action: Action) -> &'static [Permission] {
        (self.rules)(action)
    }

    pub fn check(&self, action: Action, requester: Option<Uuid>, owner: Option<Uuid>) -> Result<()> {
        for permission in self.permissions(action) {
            if (permission.check)(requester, owner) {
                continue;
            }
            tracing::debug!(
                resource = self.resource,
                ?action,
                permission = permission.name,
                "Permission denied"
            );
            return Err(if permission.requires_identity {
                AppError::Unauthorized(UNAUTHENTICATED_MESSAGE.to_string())
            } else {
                AppError::Forbidden(DENIED_MESSAGE.to_string())
            });
        }
        Ok(())
    }
}

fn tweet_rules(action: Action) -> &'static [Permission] {
    match action {
        Action::List | Action::Retrieve => &[ALLOW_ANY],
        Action::Create => &[IS_AUTHENTICATED],
        Action::Update | Action::Destroy => &[IS_AUTHENTICATED, IS_OBJECT_OWNER],
    }
}

fn comment_rules(action: Action) -> &'static [Permission] {
    match action {
        Action::List | Action::Retrieve => &[ALLOW_ANY],
        Action::Create => &[IS_AUTHENTICATED],
        Action::Update | Action::Destroy => &[IS_AUTHENTICATED, IS_OBJECT_OWNER],
    }
}

fn like_rules(action: Action) -> &'static [Permission] {
    match action {
        Action::List | Action::Retrieve => &[ALLOW_ANY],
        Action::Create | Action::Update | Action::Destroy => &[IS_AUTHENTICATED],
    }
}

fn friendship_rules(action: Action) -> &'static [Permission] {
    match action {
        Action::List | Action::Retrieve => &[ALLOW_ANY],
        Action::Create | Action::Update | Action::Destroy => &[IS_AUTHENTICATED],
    }
}

fn newsfeed_rules(_action: Action) -> &'static [Permission] {
    &[IS_AUTHENTICATED]
}

pub const TWEETS: Policy = Policy::new("tweets", tweet_rules);
pub const FRIENDSHIPS: Policy = Policy::new("friendships", friendship_rules);
pub const NEWSFEEDS: Policy = Policy::new("newsfeeds", newsfeed_rules);
pub const COMMENTS: Policy = Policy::new("comments", comment_rules);
pub const LIKES: Policy = Policy::new("likes", like_rules);
