/// User roster.
///
/// The engine treats the roster as read-mostly: the orchestrator asks
/// for the active set once per pool event and for a single user when a
/// monitor needs signing config. The trait seam keeps the engine
/// ignorant of where users actually live.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use crate::core::types::UserConfig;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Every enabled user, eligible for new buys.
    async fn active_users(&self) -> Result<Vec<UserConfig>>;

    /// Look one user up by wallet, enabled or not.
    async fn user(&self, wallet: &str) -> Result<Option<UserConfig>>;
}

/// Roster held in memory, seeded from a JSON file at startup.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<String, UserConfig>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = UserConfig>) -> Self {
        let directory = Self::new();
        for user in users {
            directory.upsert(user);
        }
        directory
    }

    /// Load the roster from a JSON array of user configs. A missing
    /// file yields an empty roster so a fresh deployment can boot.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("User roster {} not found, starting empty", path.display());
            return Ok(Self::new());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read user roster {}", path.display()))?;
        let users: Vec<UserConfig> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse user roster {}", path.display()))?;

        info!(count = users.len(), "User roster loaded from {}", path.display());
        Ok(Self::with_users(users))
    }

    pub fn upsert(&self, user: UserConfig) {
        self.users.insert(user.wallet.clone(), user);
    }

    pub fn remove(&self, wallet: &str) {
        self.users.remove(wallet);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn active_users(&self) -> Result<Vec<UserConfig>> {
        Ok(self
            .users
            .iter()
            .filter(|entry| entry.value().enabled)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn user(&self, wallet: &str) -> Result<Option<UserConfig>> {
        Ok(self.users.get(wallet).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn active_set_excludes_disabled_users() {
        let directory = InMemoryUserDirectory::new();
        directory.upsert(UserConfig::standard("w1", "k1"));
        let mut benched = UserConfig::standard("w2", "k2");
        benched.enabled = false;
        directory.upsert(benched);

        let active = directory.active_users().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].wallet, "w1");

        // Disabled users are still resolvable for position management
        assert!(directory.user("w2").await.unwrap().is_some());
        assert!(directory.user("w3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_existing_config() {
        let directory = InMemoryUserDirectory::new();
        directory.upsert(UserConfig::standard("w1", "k1"));

        let mut updated = UserConfig::standard("w1", "k1");
        updated.buy_amount_sol = 0.5;
        directory.upsert(updated);

        assert_eq!(directory.len(), 1);
        let user = directory.user("w1").await.unwrap().unwrap();
        assert_eq!(user.buy_amount_sol, 0.5);
    }

    #[test]
    fn loads_roster_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let roster = vec![
            UserConfig::standard("w1", "k1"),
            UserConfig::standard("w2", "k2"),
        ];
        std::fs::write(&path, serde_json::to_string(&roster).unwrap()).unwrap();

        let directory = InMemoryUserDirectory::load(&path).unwrap();
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn missing_roster_file_starts_empty() {
        let directory = InMemoryUserDirectory::load("/nonexistent/users.json").unwrap();
        assert!(directory.is_empty());
    }
}
