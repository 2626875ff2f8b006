//! Single-slot-per-channel playlist store
//!
//! The refresh loop parks the latest playlist here; the next player request
//! for that channel consumes it. A hit is never served twice.

use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct PlaylistCache {
    entries: Mutex<HashMap<String, String>>,
}

impl PlaylistCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending playlist of a channel
    pub async fn store(&self, channel_id: impl Into<String>, playlist: impl Into<String>) {
        self.entries
            .lock()
            .await
            .insert(channel_id.into(), playlist.into());
    }

    /// Remove and return the pending playlist of a channel
    pub async fn take(&self, channel_id: &str) -> Option<String> {
        self.entries.lock().await.remove(channel_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
