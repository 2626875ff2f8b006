//! Scripted upstream used by the unit tests

use crate::api::SiriusXmApi;
use crate::error::{Error, Result};
use crate::models::Channel;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

#[derive(Default)]
pub struct MockApi {
    pub authenticate_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub reset_calls: AtomicUsize,
    pub playlist_calls: AtomicUsize,
    pub segment_calls: AtomicUsize,
    /// Playlists returned in order; once drained, `default_playlist` is used
    pub playlists: Mutex<VecDeque<Option<String>>>,
    pub default_playlist: Mutex<Option<String>>,
    pub segments: Mutex<HashMap<String, Bytes>>,
    /// Number of upcoming `get_segment` calls that fail with an expired session
    pub expired_segment_failures: AtomicUsize,
    pub fetched_segments: Mutex<Vec<String>>,
    /// When each `get_segment` call started
    pub segment_call_times: Mutex<Vec<Instant>>,
    pub channels: Mutex<Vec<Value>>,
    pub now_playing: Mutex<Option<Value>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_playlist(self, playlist: &str) -> Self {
        *self.default_playlist.lock().unwrap() = Some(playlist.to_string());
        self
    }

    pub fn with_segment(self, path: &str, data: &'static [u8]) -> Self {
        self.segments
            .lock()
            .unwrap()
            .insert(path.to_string(), Bytes::from_static(data));
        self
    }

    pub fn with_expired_segments(self, failures: usize) -> Self {
        self.expired_segment_failures
            .store(failures, Ordering::SeqCst);
        self
    }

    pub fn with_channels(self, channels: Vec<Value>) -> Self {
        *self.channels.lock().unwrap() = channels;
        self
    }

    pub fn with_now_playing(self, envelope: Value) -> Self {
        *self.now_playing.lock().unwrap() = Some(envelope);
        self
    }

    pub fn push_playlist(&self, playlist: Option<&str>) {
        self.playlists
            .lock()
            .unwrap()
            .push_back(playlist.map(str::to_string));
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched_segments.lock().unwrap().clone()
    }

    pub fn segment_times(&self) -> Vec<Instant> {
        self.segment_call_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl SiriusXmApi for MockApi {
    async fn authenticate(&self) -> Result<bool> {
        self.authenticate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn close_session(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn reset_session(&self) {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn get_playlist(&self, _channel_id: &str) -> Result<Option<String>> {
        self.playlist_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.playlists.lock().unwrap().pop_front() {
            return Ok(next);
        }
        Ok(self.default_playlist.lock().unwrap().clone())
    }

    async fn get_segment(&self, path: &str) -> Result<Option<Bytes>> {
        self.segment_calls.fetch_add(1, Ordering::SeqCst);
        self.segment_call_times.lock().unwrap().push(Instant::now());
        let expired = self
            .expired_segment_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if expired {
            return Err(Error::segment_retrieval("session expired"));
        }

        self.fetched_segments.lock().unwrap().push(path.to_string());
        Ok(self.segments.lock().unwrap().get(path).cloned())
    }

    async fn get_channels(&self) -> Result<Vec<Value>> {
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn get_now_playing(&self, _channel: &Channel) -> Result<Option<Value>> {
        Ok(self.now_playing.lock().unwrap().clone())
    }
}

pub fn channel_json(id: &str, name: &str, number: u32) -> Value {
    json!({
        "channelGuid": format!("guid-{}", id),
        "channelId": id,
        "name": name,
        "streamingName": name,
        "sortOrder": number * 10,
        "shortDescription": "",
        "mediumDescription": "",
        "url": format!("https://player.siriusxm.com/live/{}", id),
        "isAvailable": true,
        "isFavorite": false,
        "isMature": false,
        "siriusChannelNumber": number.to_string(),
    })
}

/// Minimal successful now-playing envelope with cut markers at `times`
pub fn now_playing_envelope(times: &[i64]) -> Value {
    let markers: Vec<Value> = times
        .iter()
        .map(|t| {
            json!({
                "assetGUID": format!("cut-{}", t),
                "time": t,
                "cut": {
                    "title": format!("Song {}", t),
                    "artists": [{ "name": format!("Artist {}", t) }],
                    "album": { "title": format!("Album {}", t) },
                    "cutContentType": "Song",
                }
            })
        })
        .collect();

    json!({
        "messages": [{ "code": 100, "message": "Successful request" }],
        "moduleList": {
            "modules": [{
                "moduleResponse": {
                    "liveChannelData": {
                        "channelId": "octane",
                        "markerLists": [
                            { "layer": "episode", "markers": [] },
                            { "layer": "cut", "markers": markers },
                        ]
                    }
                }
            }]
        }
    })
}
