//! Upstream API seam
//!
//! The proxy never talks HTTP to SiriusXM directly: every upstream call goes
//! through [`SiriusXmApi`]. [`crate::SiriusXmClient`] is the production
//! implementation; tests plug in scripted implementations.

use crate::error::Result;
use crate::models::{find_channel, Channel};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

/// Operations the proxy needs from the SiriusXM service
#[async_trait]
pub trait SiriusXmApi: Send + Sync {
    /// Log in (if needed) and open a session. Returns `false` when rejected.
    async fn authenticate(&self) -> Result<bool>;

    /// Release the transport resources of the current session
    async fn close_session(&self);

    /// Forget all session state so the next `authenticate` starts fresh
    async fn reset_session(&self);

    /// Fetch the HLS playlist for a channel, `None` when unavailable
    async fn get_playlist(&self, channel_id: &str) -> Result<Option<String>>;

    /// Fetch one audio segment
    ///
    /// Fails with [`crate::Error::SegmentRetrieval`] when the upstream
    /// session is no longer valid.
    async fn get_segment(&self, path: &str) -> Result<Option<Bytes>>;

    /// Raw channel objects, exactly as returned by the service
    async fn get_channels(&self) -> Result<Vec<Value>>;

    /// Resolve a channel by id, name or number
    async fn get_channel(&self, identifier: &str) -> Result<Option<Channel>> {
        let channels: Vec<Channel> = self
            .get_channels()
            .await?
            .into_iter()
            .filter_map(|raw| serde_json::from_value(raw).ok())
            .collect();

        Ok(find_channel(&channels, identifier).cloned())
    }

    /// Raw now-playing response envelope for a channel
    async fn get_now_playing(&self, channel: &Channel) -> Result<Option<Value>>;
}
