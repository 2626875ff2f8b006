//! Per-channel playlist refresh loop
//!
//! While its channel stays active, the loop alternates between two phases:
//! pre-fetching the segments named in the current playlist into the segment
//! cache (within a time budget, one fetch per pacing interval) and polling
//! upstream for the next playlist, which it parks in the playlist cache.
//!
//! The loop is never cancelled. It checks its [`Activation`] at the top of
//! every cycle and returns as soon as a newer activation has replaced it.

use crate::active_channel::Activation;
use crate::proxy::ProxyContext;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, trace, warn};

/// Leading path component of every audio segment line
pub const AUDIO_SEGMENT_PREFIX: &str = "AAC_Data";

/// Split a playlist into its lines
pub fn split_playlist(playlist: &str) -> Vec<String> {
    playlist.split('\n').map(str::to_string).collect()
}

/// True for lines naming a fetchable audio segment
pub fn is_segment_line(line: &str) -> bool {
    line.starts_with(AUDIO_SEGMENT_PREFIX)
}

pub struct RefreshLoop {
    context: Arc<ProxyContext>,
    activation: Activation,
    lines: Vec<String>,
    /// Segments of the current playlist already pre-fetched by this loop.
    /// Keeps segments the player has since consumed from being fetched again.
    fetched: HashSet<String>,
}

impl RefreshLoop {
    pub fn new(context: Arc<ProxyContext>, activation: Activation, playlist: &str) -> Self {
        Self {
            context,
            activation,
            lines: split_playlist(playlist),
            fetched: HashSet::new(),
        }
    }

    fn channel_id(&self) -> &str {
        &self.activation.channel_id
    }

    async fn is_running(&self) -> bool {
        self.context.active().is_current(&self.activation).await
    }

    pub async fn run(mut self) {
        let settings = self.context.settings().clone();
        let now = Instant::now();
        let mut cycle_start = now.checked_sub(settings.initial_lead).unwrap_or(now);

        while self.is_running().await {
            let deadline = cycle_start + settings.cycle_budget;
            self.precache(deadline).await;
            sleep_until(deadline).await;

            let Some(playlist) = self.poll_playlist().await else {
                break;
            };

            self.context
                .playlists()
                .store(self.channel_id(), playlist.as_str())
                .await;
            self.lines = split_playlist(&playlist);
            let current: HashSet<&String> = self.lines.iter().collect();
            self.fetched.retain(|segment| current.contains(segment));
            cycle_start = Instant::now();
        }

        info!(
            channel = %self.channel_id(),
            generation = self.activation.generation,
            "Playlist refresh loop retired"
        );
    }

    /// Pre-fetch segments of the current playlist until `deadline`
    async fn precache(&mut self, deadline: Instant) {
        let lines = std::mem::take(&mut self.lines);

        for line in lines.iter().filter(|line| is_segment_line(line)) {
            if Instant::now() >= deadline {
                break;
            }
            if self.fetched.contains(line) || self.context.segments().contains(line).await {
                continue;
            }

            match self.context.fetcher().fetch(line).await {
                Ok(Some(data)) => {
                    if !self.store(line, data).await {
                        break;
                    }
                    trace!(channel = %self.channel_id(), segment = %line, "Segment pre-fetched");
                    self.fetched.insert(line.clone());
                }
                Ok(None) => debug!(segment = %line, "Segment unavailable upstream"),
                Err(e) => warn!(segment = %line, "Failed to pre-fetch segment: {}", e),
            }

            sleep(self.context.settings().pacing_interval).await;
        }

        self.lines = lines;
    }

    /// Insert into the segment cache, waiting for room while still running
    ///
    /// Returns `false` if the loop was retired while waiting.
    async fn store(&self, path: &str, data: Bytes) -> bool {
        self.context
            .segments()
            .put(path, data, move || self.is_running())
            .await
    }

    /// Poll upstream until a playlist is returned or the loop is retired
    ///
    /// Failed polls back off exponentially, starting at the pacing interval
    /// and capped at `max_playlist_backoff`.
    async fn poll_playlist(&self) -> Option<String> {
        let settings = self.context.settings();
        let mut delay = settings.pacing_interval.max(Duration::from_millis(1));

        loop {
            if !self.is_running().await {
                return None;
            }

            match self.context.api().get_playlist(self.channel_id()).await {
                Ok(Some(playlist)) if !playlist.is_empty() => return Some(playlist),
                Ok(_) => debug!(channel = %self.channel_id(), "Playlist not available yet"),
                Err(e) => warn!(channel = %self.channel_id(), "Playlist refresh failed: {}", e),
            }

            sleep(delay).await;
            delay = (delay * 2).min(settings.max_playlist_backoff);
        }
    }
}
