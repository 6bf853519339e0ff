//! Persisted document shapes and the atomic JSON document file.
//!
//! Both server documents — the user-profile document and the channel
//! document — are whole-document read/replace units. There is no
//! row-level persistence; every save rewrites the file via a temp file
//! plus rename so a crash never leaves a half-written document behind.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::fs;
use tracing::{info, warn};

use parley_shared::{Message, UserStatus};

use crate::error::Result;

/// Persisted per-user profile: opaque credential plus last known status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub password: String,
    pub status: UserStatus,
}

/// The user-profile document: username → profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    #[serde(default)]
    pub users: BTreeMap<String, UserProfile>,
}

/// One channel as persisted: immutable host, participant set, and the
/// timestamp-ordered message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub host: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ChannelRecord {
    /// A channel freshly created by `host`, who is its first participant.
    pub fn created_by(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            participants: vec![host.clone()],
            host,
            messages: Vec::new(),
        }
    }

    /// The implicitly existing "General" channel: system-hosted, empty.
    pub fn general() -> Self {
        Self {
            host: "system".to_string(),
            participants: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Restore the log ordering invariant after a mutation. Stable, so
    /// entries sharing a timestamp keep their insertion order.
    pub fn sort_log(&mut self) {
        self.messages.sort_by_key(|m| m.timestamp);
    }
}

/// The channel document: channel name → record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelDocument {
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelRecord>,
}

/// Atomic load/save of one JSON document.
#[derive(Debug)]
pub struct DocumentFile<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T> DocumentFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, falling back to the empty document when the
    /// file is missing or unreadable. Corruption is logged, never fatal.
    pub async fn load(&self) -> T {
        match fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e,
                        "document is corrupt, starting from empty");
                    T::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "document not found, starting from empty");
                T::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e,
                    "failed to read document, starting from empty");
                T::default()
            }
        }
    }

    /// Replace the document on disk: write a sibling temp file, then
    /// rename it over the target.
    pub async fn save(&self, doc: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(doc)?;
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file: DocumentFile<ChannelDocument> = DocumentFile::new(dir.path().join("none.json"));
        let doc = file.load().await;
        assert!(doc.channels.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let file: DocumentFile<ChannelDocument> = DocumentFile::new(path);
        let doc = file.load().await;
        assert!(doc.channels.is_empty());
    }

    #[tokio::test]
    async fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file: DocumentFile<ChannelDocument> =
            DocumentFile::new(dir.path().join("channels.json"));

        let mut doc = ChannelDocument::default();
        doc.channels
            .insert("dev".to_string(), ChannelRecord::created_by("alice"));
        file.save(&doc).await.unwrap();

        let reloaded = file.load().await;
        assert_eq!(reloaded, doc);
        // No temp file left behind.
        assert!(!dir.path().join("channels.tmp").exists());
    }

    #[test]
    fn sort_log_is_stable_for_equal_timestamps() {
        use chrono::Utc;
        let now = Utc::now();
        let mut record = ChannelRecord::created_by("alice");
        record.messages.push(Message::user("alice", "first", now));
        record.messages.push(Message::user("alice", "second", now));
        record.sort_log();
        assert_eq!(record.messages[0].message, "first");
        assert_eq!(record.messages[1].message, "second");
    }
}
