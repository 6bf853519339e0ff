//! Durable offline queue.
//!
//! Messages composed while the server is unreachable are appended to a
//! per-channel queue in a single JSON file and stay there until the
//! server confirms a merge. Saved after every mutation; an unreadable
//! file on startup is treated as an empty cache (logged), never a fatal
//! error.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use parley_shared::Message;

use crate::error::Result;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChannelQueue {
    messages: Vec<Message>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    channels: HashMap<String, ChannelQueue>,
}

/// The on-disk offline queue.
pub struct LocalCache {
    path: PathBuf,
    doc: CacheDocument,
}

impl LocalCache {
    /// Open the cache at `path`, loading any existing queue.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cache file unreadable, starting empty");
                    CacheDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheDocument::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache file unreadable, starting empty");
                CacheDocument::default()
            }
        };
        info!(path = %path.display(), channels = doc.channels.len(), "local cache opened");
        Self { path, doc }
    }

    /// Platform default location for the cache file.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "parley")
            .map(|dirs| dirs.data_dir().join("outbox.json"))
            .unwrap_or_else(|| PathBuf::from("outbox.json"))
    }

    /// Queue a message for later delivery. A queued entry with the same
    /// timestamp, author, and text is treated as the same message and not
    /// duplicated.
    pub async fn enqueue(&mut self, channel: &str, message: Message) -> Result<()> {
        let queue = self.doc.channels.entry(channel.to_string()).or_default();
        let duplicate = queue.messages.iter().any(|m| {
            m.timestamp == message.timestamp
                && m.username == message.username
                && m.message == message.message
        });
        if duplicate {
            return Ok(());
        }
        queue.messages.push(message);
        self.save().await
    }

    /// Currently queued messages for a channel.
    pub fn queued(&self, channel: &str) -> Vec<Message> {
        self.doc
            .channels
            .get(channel)
            .map(|q| q.messages.clone())
            .unwrap_or_default()
    }

    pub fn is_empty(&self, channel: &str) -> bool {
        self.doc
            .channels
            .get(channel)
            .map(|q| q.messages.is_empty())
            .unwrap_or(true)
    }

    /// Drop a channel's queue after the server confirmed the merge.
    pub async fn clear(&mut self, channel: &str) -> Result<()> {
        if self.doc.channels.remove(channel).is_some() {
            self.save().await?;
        }
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(&self.doc)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
