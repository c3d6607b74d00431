//! User directory: the authoritative store of user and profile records

mod postgres;

pub use postgres::{run_migrations, PgUserDirectory};

use crate::error::{AccountError, Result};
use crate::models::{ProfileChanges, User, UserChanges, UserProfile};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>>;

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>>;

    /// Creates the user together with an empty profile
    async fn insert_user(&self, username: &str, email: &str) -> Result<User>;

    /// Returns `None` if the user does not exist
    async fn update_user(&self, user_id: Uuid, changes: &UserChanges) -> Result<Option<User>>;

    /// Returns `None` if the user does not exist
    async fn update_profile(
        &self,
        user_id: Uuid,
        changes: &ProfileChanges,
    ) -> Result<Option<UserProfile>>;
}

/// In-process directory, partitioned by user id
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: DashMap<Uuid, User>,
    profiles: DashMap<Uuid, UserProfile>,
    reads: AtomicU64,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get_user` / `get_profile` calls served so far
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.users.get(&user_id).map(|u| u.clone()))
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.profiles.get(&user_id).map(|p| p.clone()))
    }

    async fn insert_user(&self, username: &str, email: &str) -> Result<User> {
        if self.users.iter().any(|u| u.username == username) {
            return Err(AccountError::Conflict(format!(
                "username {} already taken",
                username
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        self.profiles.insert(user.id, UserProfile::empty(user.id));
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, user_id: Uuid, changes: &UserChanges) -> Result<Option<User>> {
        if let Some(username) = &changes.username {
            if self
                .users
                .iter()
                .any(|u| u.id != user_id && &u.username == username)
            {
                return Err(AccountError::Conflict(format!(
                    "username {} already taken",
                    username
                )));
            }
        }

        Ok(self.users.get_mut(&user_id).map(|mut user| {
            changes.apply(&mut user);
            user.clone()
        }))
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        changes: &ProfileChanges,
    ) -> Result<Option<UserProfile>> {
        if !self.users.contains_key(&user_id) {
            return Ok(None);
        }
        let mut profile = self
            .profiles
            .entry(user_id)
            .or_insert_with(|| UserProfile::empty(user_id));
        changes.apply(&mut profile);
        Ok(Some(profile.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_creates_user_and_profile() {
        let directory = MemoryUserDirectory::new();
        let user = directory.insert_user("linghu", "linghu@chirp.dev").await.unwrap();

        assert_eq!(directory.get_user(user.id).await.unwrap(), Some(user.clone()));
        let profile = directory.get_profile(user.id).await.unwrap().unwrap();
        assert_eq!(profile.user_id, user.id);
        assert_eq!(profile.nickname, None);
        assert_eq!(directory.reads(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let directory = MemoryUserDirectory::new();
        directory.insert_user("dong", "").await.unwrap();
        let err = directory.insert_user("dong", "").await.unwrap_err();
        assert!(matches!(err, AccountError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_updates_on_missing_user_return_none() {
        let directory = MemoryUserDirectory::new();
        let missing = Uuid::new_v4();
        assert!(directory
            .update_user(missing, &UserChanges::default())
            .await
            .unwrap()
            .is_none());
        assert!(directory
            .update_profile(missing, &ProfileChanges::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_profile_applies_changes() {
        let directory = MemoryUserDirectory::new();
        let user = directory.insert_user("rui", "").await.unwrap();
        let changes = ProfileChanges {
            nickname: Some("Rui".into()),
            avatar_url: None,
        };

        let profile = directory.update_profile(user.id, &changes).await.unwrap().unwrap();
        assert_eq!(profile.nickname.as_deref(), Some("Rui"));
        assert_eq!(profile.avatar_url, None);
    }
}
