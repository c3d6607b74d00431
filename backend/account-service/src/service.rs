//! Account mutations
//!
//! Every successful write is followed by a change notification so caches in
//! other processes drop their copy.

use crate::directory::UserDirectory;
use crate::error::{AccountError, Result};
use crate::models::{ProfileChanges, User, UserChanges, UserProfile};
use cache_invalidation::InvalidationSink;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const MAX_USERNAME_LEN: usize = 150;

#[derive(Clone)]
pub struct AccountService {
    directory: Arc<dyn UserDirectory>,
    sink: Arc<dyn InvalidationSink>,
}

impl AccountService {
    pub fn new(directory: Arc<dyn UserDirectory>, sink: Arc<dyn InvalidationSink>) -> Self {
        Self { directory, sink }
    }

    pub async fn create_user(&self, username: &str, email: &str) -> Result<User> {
        let username = username.trim();
        validate_username(username)?;

        let user = self.directory.insert_user(username, email.trim()).await?;
        self.sink.user_changed(user.id).await?;

        info!(user_id = %user.id, username = %user.username, "User created");
        Ok(user)
    }

    pub async fn update_user(&self, user_id: Uuid, changes: UserChanges) -> Result<User> {
        if let Some(username) = changes.username.as_deref() {
            validate_username(username)?;
        }

        let user = self
            .directory
            .update_user(user_id, &changes)
            .await?
            .ok_or(AccountError::NotFound(user_id))?;
        self.sink.user_changed(user_id).await?;

        info!(user_id = %user_id, "User updated");
        Ok(user)
    }

    pub async fn update_profile(
        &self,
        user_id: Uuid,
        changes: ProfileChanges,
    ) -> Result<UserProfile> {
        let profile = self
            .directory
            .update_profile(user_id, &changes)
            .await?
            .ok_or(AccountError::NotFound(user_id))?;
        self.sink.profile_changed(user_id).await?;

        info!(user_id = %user_id, "Profile updated");
        Ok(profile)
    }
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(AccountError::Validation("username must not be empty".into()));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(AccountError::Validation(format!(
            "username longer than {} characters",
            MAX_USERNAME_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryUserDirectory;
    use cache_invalidation::{AccountEvent, LocalInvalidationBus};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn service() -> (AccountService, LocalInvalidationBus) {
        let bus = LocalInvalidationBus::new("account-service");
        let service = AccountService::new(
            Arc::new(MemoryUserDirectory::new()),
            Arc::new(bus.clone()),
        );
        (service, bus)
    }

    #[tokio::test]
    async fn test_mutations_publish_matching_events() {
        let (service, bus) = service();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = bus.subscribe(move |msg| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.extend(AccountEvent::from_message(&msg)?);
                Ok(())
            }
        });

        let user = service.create_user("linghu", "").await.unwrap();
        service
            .update_user(
                user.id,
                UserChanges {
                    email: Some("l@chirp.dev".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        service
            .update_profile(
                user.id,
                ProfileChanges {
                    nickname: Some("Linghu".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            *seen.lock().await,
            vec![
                AccountEvent::UserChanged { user_id: user.id },
                AccountEvent::UserChanged { user_id: user.id },
                AccountEvent::ProfileChanged { user_id: user.id },
            ]
        );
        handle.abort();
    }

    #[tokio::test]
    async fn test_update_missing_user_is_not_found_and_silent() {
        let (service, bus) = service();
        let err = service
            .update_user(Uuid::new_v4(), UserChanges::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(bus.stats().published, 0);
    }

    #[tokio::test]
    async fn test_blank_username_is_rejected() {
        let (service, _bus) = service();
        let err = service.create_user("   ", "").await.unwrap_err();
        assert!(matches!(err, AccountError::Validation(_)));
    }
}
