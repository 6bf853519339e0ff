//! The credential/profile store backing `auth` requests.
//!
//! Credentials are opaque strings compared verbatim; hashing policy is an
//! external concern. Statuses persisted here are the durable shadow of
//! the registry's live statuses: updated on login, explicit status
//! change, and disconnect. Guests never appear in this document.

use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{debug, info};

use parley_shared::UserStatus;

use crate::documents::{DocumentFile, UserDocument, UserProfile};
use crate::error::{Result, StoreError};

/// Owner of the user-profile document.
pub struct UserStore {
    file: DocumentFile<UserDocument>,
    doc: Mutex<UserDocument>,
}

impl UserStore {
    /// Open the store, loading the document (empty if absent).
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let file = DocumentFile::new(path);
        let doc: UserDocument = file.load().await;
        info!(users = doc.users.len(), path = %file.path().display(), "user store opened");
        Self {
            file,
            doc: Mutex::new(doc),
        }
    }

    /// Reset every persisted status to `offline`.
    ///
    /// Run once at server start so stale `online` entries from an unclean
    /// shutdown do not survive a restart.
    pub async fn mark_all_offline(&self) -> Result<()> {
        let mut doc = self.doc.lock().await;
        for profile in doc.users.values_mut() {
            profile.status = UserStatus::Offline;
        }
        self.file.save(&doc).await
    }

    /// Check a credential pair. On success the user's persisted status
    /// becomes `online`.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let mut doc = self.doc.lock().await;
        match doc.users.get_mut(username) {
            Some(profile) if profile.password == password => {
                profile.status = UserStatus::Online;
                self.file.save(&doc).await?;
                Ok(())
            }
            _ => Err(StoreError::BadCredentials),
        }
    }

    /// Create a new account with status `offline`. Does not log the user
    /// in.
    pub async fn register(&self, username: &str, password: &str) -> Result<()> {
        if username.is_empty() || password.is_empty() {
            return Err(StoreError::BadCredentials);
        }

        let mut doc = self.doc.lock().await;
        if doc.users.contains_key(username) {
            return Err(StoreError::UserExists);
        }
        doc.users.insert(
            username.to_string(),
            UserProfile {
                password: password.to_string(),
                status: UserStatus::Offline,
            },
        );
        self.file.save(&doc).await?;
        info!(username, "user registered");
        Ok(())
    }

    /// Persist a status transition. Returns `false` when the username has
    /// no record (guests), which is not an error.
    pub async fn persist_status(&self, username: &str, status: UserStatus) -> Result<bool> {
        let mut doc = self.doc.lock().await;
        match doc.users.get_mut(username) {
            Some(profile) => {
                if profile.status != status {
                    profile.status = status;
                    self.file.save(&doc).await?;
                }
                Ok(true)
            }
            None => {
                debug!(username, "no persisted record for status update");
                Ok(false)
            }
        }
    }
}
