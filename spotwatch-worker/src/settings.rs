//! Price settings persistence.
//!
//! The service only needs the narrow [`SettingsStore`] capability. The
//! in-memory implementation keeps the same contract as a database-backed one:
//! user ids are unique, and a missing id is reported as not found.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Error, Result};
use crate::price::PriceSettings;

/// Capability to read and write per-user price settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_price_settings(&self, user_id: &str) -> Result<PriceSettings>;

    /// Insert new settings. Fails with [`Error::Conflict`] if the user
    /// already has settings.
    async fn insert_price_settings(&self, settings: PriceSettings) -> Result<()>;

    /// Update existing settings. Fails with [`Error::NotFound`] if the user
    /// has none.
    async fn patch_price_settings(&self, settings: PriceSettings) -> Result<()>;

    async fn delete_price_settings(&self, user_id: &str) -> Result<()>;
}

fn require_user(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(Error::Unauthorized(
            "price settings require an authenticated user id".to_string(),
        ));
    }
    Ok(())
}

/// Process-local [`SettingsStore`].
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: RwLock<HashMap<String, PriceSettings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get_price_settings(&self, user_id: &str) -> Result<PriceSettings> {
        require_user(user_id)?;
        self.settings
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no price settings for user '{user_id}'")))
    }

    async fn insert_price_settings(&self, settings: PriceSettings) -> Result<()> {
        require_user(&settings.user_id)?;
        let mut stored = self.settings.write().await;
        if stored.contains_key(&settings.user_id) {
            return Err(Error::Conflict(format!(
                "price settings for user '{}' already exist",
                settings.user_id
            )));
        }

        info!(user_id = %settings.user_id, "price_settings_inserted");
        stored.insert(settings.user_id.clone(), settings);
        Ok(())
    }

    async fn patch_price_settings(&self, settings: PriceSettings) -> Result<()> {
        require_user(&settings.user_id)?;
        let mut stored = self.settings.write().await;
        let Some(existing) = stored.get_mut(&settings.user_id) else {
            return Err(Error::NotFound(format!(
                "no price settings for user '{}'",
                settings.user_id
            )));
        };

        existing.vat_included = settings.vat_included;
        existing.marginal = settings.marginal;
        info!(user_id = %settings.user_id, "price_settings_patched");
        Ok(())
    }

    async fn delete_price_settings(&self, user_id: &str) -> Result<()> {
        require_user(user_id)?;
        if self.settings.write().await.remove(user_id).is_none() {
            return Err(Error::NotFound(format!("no price settings for user '{user_id}'")));
        }

        info!(user_id = %user_id, "price_settings_deleted");
        Ok(())
    }
}
