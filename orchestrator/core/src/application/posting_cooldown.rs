// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-account platform cooldown checks, reading `PLATFORM_COOLDOWN_HOURS` live.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::measurement::{calculate_next_available, calculate_remaining_minutes, Platform};
use crate::domain::repository::{MeasurementRepository, RepositoryError};
use crate::domain::settings::{keys, SettingsError, SettingsProvider};
use crate::domain::stage::PlatformAvailability;

#[derive(Debug, thiserror::Error)]
pub enum CooldownError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CooldownStatus {
    pub account_id: String,
    pub platform: Platform,
    pub cooldown_hours: f64,
    pub last_posted_at: Option<DateTime<Utc>>,
    pub next_available_at: Option<DateTime<Utc>>,
    pub remaining_minutes: i64,
    pub can_post: bool,
}

pub struct PostingCooldown {
    publications: Arc<dyn MeasurementRepository>,
    settings: Arc<dyn SettingsProvider>,
}

impl PostingCooldown {
    pub fn new(publications: Arc<dyn MeasurementRepository>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self { publications, settings }
    }

    pub async fn check(&self, account_id: &str, platform: Platform) -> Result<CooldownStatus, CooldownError> {
        self.check_at(account_id, platform, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        account_id: &str,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<CooldownStatus, CooldownError> {
        let cooldown_hours = self.settings.get_number(keys::PLATFORM_COOLDOWN_HOURS).await?;
        let last_posted_at = self.publications.last_posted_at(account_id, platform).await?;

        let next_available_at = match last_posted_at {
            Some(last) => Some(calculate_next_available(last, cooldown_hours).ok_or_else(|| {
                SettingsError::InvalidType {
                    key: keys::PLATFORM_COOLDOWN_HOURS.to_string(),
                    expected: "cooldown within the calendar range",
                }
            })?),
            None => None,
        };
        let remaining_minutes = next_available_at
            .map(|next| calculate_remaining_minutes(next, now))
            .unwrap_or(0);

        Ok(CooldownStatus {
            account_id: account_id.to_string(),
            platform,
            cooldown_hours,
            last_posted_at,
            next_available_at,
            remaining_minutes,
            can_post: remaining_minutes == 0,
        })
    }

    /// Availability of every account that has posted before, for the `post` stage.
    pub async fn availability(&self) -> Result<Vec<PlatformAvailability>, CooldownError> {
        let now = Utc::now();
        let mut out = Vec::new();
        for (account_id, platform) in self.publications.known_accounts().await? {
            let status = self.check_at(&account_id, platform, now).await?;
            out.push(PlatformAvailability {
                account_id,
                platform,
                can_post: status.can_post,
                remaining_minutes: status.remaining_minutes,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::measurement::{MeasurementTarget, Publication};
    use crate::infrastructure::repositories::InMemoryMeasurementRepository;
    use crate::infrastructure::settings::InMemorySettingsProvider;
    use chrono::Duration;
    use serde_json::json;

    async fn posted(repo: &InMemoryMeasurementRepository, at: DateTime<Utc>) {
        let publication = Publication {
            id: uuid::Uuid::new_v4(),
            cycle_id: None,
            content_id: "CNT-1".into(),
            account_id: "ACC-1".into(),
            platform: Platform::Youtube,
            platform_post_id: "yt-1".into(),
            posted_at: at,
        };
        repo.record_publication(&publication, &MeasurementTarget::schedule(&publication))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_posted_can_post() {
        let repo = Arc::new(InMemoryMeasurementRepository::new());
        let cooldown = PostingCooldown::new(repo, Arc::new(InMemorySettingsProvider::with_defaults()));
        let status = cooldown.check("ACC-1", Platform::Youtube).await.unwrap();
        assert!(status.can_post);
        assert_eq!(status.next_available_at, None);
    }

    #[tokio::test]
    async fn test_recent_post_blocks_until_cooldown_elapses() {
        let repo = Arc::new(InMemoryMeasurementRepository::new());
        let settings = Arc::new(InMemorySettingsProvider::with_defaults());
        let now = Utc::now();
        posted(&repo, now - Duration::hours(1)).await;

        let cooldown = PostingCooldown::new(repo, settings.clone());
        let status = cooldown.check_at("ACC-1", Platform::Youtube, now).await.unwrap();
        assert!(!status.can_post);
        assert_eq!(status.remaining_minutes, 180);

        settings.set(keys::PLATFORM_COOLDOWN_HOURS, json!(0));
        let status = cooldown.check_at("ACC-1", Platform::Youtube, now).await.unwrap();
        assert!(status.can_post);

        let other = cooldown.check_at("ACC-1", Platform::Tiktok, now).await.unwrap();
        assert!(other.can_post);
    }

    #[tokio::test]
    async fn test_out_of_range_cooldown_is_a_settings_error() {
        let repo = Arc::new(InMemoryMeasurementRepository::new());
        let settings = Arc::new(InMemorySettingsProvider::with_defaults());
        posted(&repo, Utc::now() - Duration::hours(1)).await;
        let cooldown = PostingCooldown::new(repo, settings.clone());

        for value in [json!(" 1e10 "), json!("inf")] {
            settings.set(keys::PLATFORM_COOLDOWN_HOURS, value);
            assert!(matches!(
                cooldown.check("ACC-1", Platform::Youtube).await,
                Err(CooldownError::Settings(SettingsError::InvalidType { .. }))
            ));
            assert!(cooldown.availability().await.is_err());
        }
    }
}
