//! Proxy context shared by the request router and the refresh loops
//!
//! [`ProxyContext`] owns every piece of mutable proxy state: the segment
//! cache, the playlist cache and the active channel. One context is created
//! per router; refresh loops receive a clone of its `Arc`.

use crate::active_channel::{Activation, ActiveChannel};
use crate::api::SiriusXmApi;
use crate::error::Result;
use crate::fetcher::SegmentFetcher;
use crate::playlist_cache::PlaylistCache;
use crate::refresh::RefreshLoop;
use crate::segment_cache::{SegmentCache, DEFAULT_BACKPRESSURE_POLL, DEFAULT_SEGMENT_CACHE_CAPACITY};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Tunables of the caching engine
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Start a refresh loop when a channel becomes active
    pub precache: bool,
    pub segment_cache_capacity: usize,
    /// Interval between two capacity checks while the segment cache is full
    pub backpressure_poll: Duration,
    /// Pause after each pre-fetched segment
    pub pacing_interval: Duration,
    /// How long a refresh cycle pre-fetches before polling a new playlist
    pub cycle_budget: Duration,
    /// Head start removed from the budget of the very first cycle
    pub initial_lead: Duration,
    /// Upper bound of the delay between two failed playlist polls
    pub max_playlist_backoff: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            precache: true,
            segment_cache_capacity: DEFAULT_SEGMENT_CACHE_CAPACITY,
            backpressure_poll: DEFAULT_BACKPRESSURE_POLL,
            pacing_interval: Duration::from_secs(1),
            cycle_budget: Duration::from_secs(5),
            initial_lead: Duration::from_secs(3),
            max_playlist_backoff: Duration::from_secs(30),
        }
    }
}

pub struct ProxyContext {
    api: Arc<dyn SiriusXmApi>,
    fetcher: SegmentFetcher,
    segments: SegmentCache,
    playlists: PlaylistCache,
    active: ActiveChannel,
    settings: ProxySettings,
}

impl ProxyContext {
    pub fn new(api: Arc<dyn SiriusXmApi>, settings: ProxySettings) -> Arc<Self> {
        Arc::new(Self {
            fetcher: SegmentFetcher::new(Arc::clone(&api)),
            segments: SegmentCache::new(settings.segment_cache_capacity, settings.backpressure_poll),
            playlists: PlaylistCache::new(),
            active: ActiveChannel::new(),
            api,
            settings,
        })
    }

    pub fn api(&self) -> &Arc<dyn SiriusXmApi> {
        &self.api
    }

    pub fn fetcher(&self) -> &SegmentFetcher {
        &self.fetcher
    }

    pub fn segments(&self) -> &SegmentCache {
        &self.segments
    }

    pub fn playlists(&self) -> &PlaylistCache {
        &self.playlists
    }

    pub fn active(&self) -> &ActiveChannel {
        &self.active
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Record the active channel, starting a refresh loop when possible
    ///
    /// Passing `None` deactivates without starting anything. The loop that
    /// was running before retires on its next cycle check.
    pub async fn set_active(
        self: &Arc<Self>,
        channel_id: Option<&str>,
        initial_playlist: Option<&str>,
    ) -> Option<JoinHandle<()>> {
        let generation = self.active.set(channel_id).await;
        debug!(channel = ?channel_id, generation, "Active channel changed");

        match (channel_id, initial_playlist) {
            (Some(channel_id), Some(playlist)) => self.start_refresh(
                Activation {
                    channel_id: channel_id.to_string(),
                    generation,
                },
                playlist,
            ),
            _ => None,
        }
    }

    fn start_refresh(self: &Arc<Self>, activation: Activation, playlist: &str) -> Option<JoinHandle<()>> {
        if !self.settings.precache {
            return None;
        }

        info!(channel = %activation.channel_id, "Starting playlist refresh loop");
        let refresh = RefreshLoop::new(Arc::clone(self), activation, playlist);
        Some(tokio::spawn(refresh.run()))
    }

    /// Playlist for a channel, from the cache or straight from upstream
    ///
    /// A successful resolution activates the channel if it was not already
    /// active. Empty playlists count as unavailable.
    pub async fn get_playlist(self: &Arc<Self>, channel_id: &str) -> Result<Option<String>> {
        let playlist = match self.playlists.take(channel_id).await {
            Some(playlist) => {
                debug!(channel = %channel_id, "Playlist served from cache");
                Some(playlist)
            }
            None => self.api.get_playlist(channel_id).await?,
        };

        let Some(playlist) = playlist.filter(|p| !p.is_empty()) else {
            return Ok(None);
        };

        if let Some(activation) = self.active.claim(channel_id).await {
            self.start_refresh(activation, &playlist);
        }

        Ok(Some(playlist))
    }

    /// Segment bytes, from the cache or through the fetcher
    pub async fn get_segment(&self, path: &str) -> Result<Option<Bytes>> {
        if let Some(data) = self.segments.take(path).await {
            debug!(segment = %path, "Segment served from cache");
            return Ok(Some(data));
        }

        self.fetcher.fetch(path).await
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> ProxySettings {
    ProxySettings {
        precache: true,
        segment_cache_capacity: DEFAULT_SEGMENT_CACHE_CAPACITY,
        backpressure_poll: Duration::from_millis(2),
        pacing_interval: Duration::from_millis(1),
        cycle_budget: Duration::from_millis(40),
        initial_lead: Duration::ZERO,
        max_playlist_backoff: Duration::from_millis(5),
    }
}
