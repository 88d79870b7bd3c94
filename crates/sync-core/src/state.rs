//! Persistence for per-account/category sync state.
//!
//! State is stored in `.sync/<account>/<category>.json` within the data
//! directory, outside every record directory so it is never mistaken for a
//! record file.

use crate::fs::{FileSystem, FsError};
use crate::record::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to access sync state {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: FsError,
    },

    #[error("Corrupt sync state {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize sync state: {0}")]
    Serialization(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Persisted sync state for one account/category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Opaque resume token from the last fully applied delta batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_cursor: Option<String>,
    /// When the last successful pass finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

/// Storage for sync state.
pub struct SyncStateStore<F> {
    fs: F,
    root: String,
}

impl<F: FileSystem> SyncStateStore<F> {
    /// Store rooted at `.sync` in the filesystem.
    pub fn new(fs: F) -> Self {
        Self::with_root(fs, ".sync")
    }

    pub fn with_root(fs: F, root: impl Into<String>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    fn path(&self, account: &str, category: Category) -> String {
        format!("{}/{}/{}.json", self.root, account, category.dir_name())
    }

    /// Load state; a missing file is the empty state.
    pub async fn load(&self, account: &str, category: Category) -> Result<SyncState> {
        let path = self.path(account, category);
        let raw = match self.fs.read(&path).await {
            Ok(raw) => raw,
            Err(FsError::NotFound(_)) => {
                debug!("No sync state at {}", path);
                return Ok(SyncState::default());
            }
            Err(source) => return Err(StateError::Io { path, source }),
        };

        serde_json::from_slice(&raw).map_err(|source| StateError::Corrupt { path, source })
    }

    /// Replace the stored state.
    pub async fn save(&self, account: &str, category: Category, state: &SyncState) -> Result<()> {
        let path = self.path(account, category);
        let json = serde_json::to_vec_pretty(state).map_err(StateError::Serialization)?;

        self.fs
            .write(&path, &json)
            .await
            .map_err(|source| StateError::Io { path: path.clone(), source })?;

        debug!("Saved sync state to {}", path);
        Ok(())
    }

    /// Record a successful full-window pass. Any stored cursor is kept.
    pub async fn commit_full_window(
        &self,
        account: &str,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<SyncState> {
        let mut state = self.load_or_default(account, category).await;
        state.last_sync = Some(now);
        self.save(account, category, &state).await?;
        Ok(state)
    }

    /// Record a fully applied delta batch and the cursor that follows it.
    pub async fn commit_delta(
        &self,
        account: &str,
        category: Category,
        cursor: String,
        now: DateTime<Utc>,
    ) -> Result<SyncState> {
        let state = SyncState {
            delta_cursor: Some(cursor),
            last_sync: Some(now),
        };
        self.save(account, category, &state).await?;
        Ok(state)
    }

    /// Forget the delta cursor so the next pass re-enumerates from scratch.
    pub async fn clear_cursor(&self, account: &str, category: Category) -> Result<()> {
        let mut state = self.load_or_default(account, category).await;
        if state.delta_cursor.take().is_some() {
            self.save(account, category, &state).await?;
        }
        Ok(())
    }

    async fn load_or_default(&self, account: &str, category: Category) -> SyncState {
        match self.load(account, category).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Replacing unreadable sync state for {}/{}: {}", account, category, e);
                SyncState::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-14T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_load_missing_is_default() {
        let store = SyncStateStore::new(InMemoryFs::new());
        let state = store.load("work", Category::Contacts).await.unwrap();
        assert_eq!(state, SyncState::default());
    }

    #[tokio::test]
    async fn test_commit_delta_then_load() {
        let fs = Arc::new(InMemoryFs::new());
        let store = SyncStateStore::new(fs.clone());

        store
            .commit_delta("work", Category::Contacts, "cursor-1".to_string(), now())
            .await
            .unwrap();

        assert!(fs.exists(".sync/work/contacts.json").await.unwrap());
        let state = store.load("work", Category::Contacts).await.unwrap();
        assert_eq!(state.delta_cursor.as_deref(), Some("cursor-1"));
        assert_eq!(state.last_sync, Some(now()));

        // Categories do not share state
        let other = store.load("work", Category::Calendar).await.unwrap();
        assert_eq!(other, SyncState::default());
    }

    #[tokio::test]
    async fn test_commit_full_window_keeps_cursor() {
        let store = SyncStateStore::new(InMemoryFs::new());
        store
            .commit_delta("work", Category::Calendar, "c".to_string(), now())
            .await
            .unwrap();
        let later = now() + chrono::Duration::hours(1);

        let state = store
            .commit_full_window("work", Category::Calendar, later)
            .await
            .unwrap();
        assert_eq!(state.delta_cursor.as_deref(), Some("c"));
        assert_eq!(state.last_sync, Some(later));
    }

    #[tokio::test]
    async fn test_clear_cursor() {
        let store = SyncStateStore::new(InMemoryFs::new());
        store
            .commit_delta("work", Category::Contacts, "stale".to_string(), now())
            .await
            .unwrap();

        store.clear_cursor("work", Category::Contacts).await.unwrap();
        let state = store.load("work", Category::Contacts).await.unwrap();
        assert_eq!(state.delta_cursor, None);
        assert_eq!(state.last_sync, Some(now()));
    }

    #[tokio::test]
    async fn test_corrupt_state_is_an_error() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write(".sync/work/contacts.json", b"{not json").await.unwrap();
        let store = SyncStateStore::new(fs);

        assert!(matches!(
            store.load("work", Category::Contacts).await,
            Err(StateError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_commit_replaces_corrupt_state() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write(".sync/work/calendar.json", b"{not json").await.unwrap();
        let store = SyncStateStore::new(fs);

        let state = store
            .commit_full_window("work", Category::Calendar, now())
            .await
            .unwrap();
        assert_eq!(state.delta_cursor, None);
        assert_eq!(store.load("work", Category::Calendar).await.unwrap(), state);
    }
}
