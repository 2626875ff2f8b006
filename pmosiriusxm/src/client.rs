//! HTTP client for the SiriusXM player API
//!
//! This module provides [`SiriusXmClient`], the production implementation of
//! [`SiriusXmApi`]. It keeps a cookie-backed session with the player REST
//! API and signs HLS requests with the tokens carried by those cookies.
//!
//! # Example
//!
//! ```no_run
//! use pmosiriusxm::{SiriusXmApi, SiriusXmClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SiriusXmClient::builder()
//!         .credentials("user@example.com", "secret")
//!         .build()?;
//!
//!     if client.authenticate().await? {
//!         let playlist = client.get_playlist("octane").await?;
//!         println!("{}", playlist.unwrap_or_default());
//!     }
//!     Ok(())
//! }
//! ```

use crate::api::SiriusXmApi;
use crate::error::{Error, Result};
use crate::models::{Channel, Quality, Region, LIVE_PRIMARY_HLS};
use crate::refresh::AUDIO_SEGMENT_PREFIX;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Default timeout for HTTP requests (30 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent, the player API only answers browser-like clients
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Safari/605.1.15";

/// Web player version announced in device info
pub const SXM_APP_VERSION: &str = "5.36.514";

/// Web player device model announced in device info
pub const SXM_DEVICE_MODEL: &str = "EverestWebClient";

/// Placeholder for the primary HLS host in playlist URLs
const PRIMARY_HLS_PLACEHOLDER: &str = "%Live_Primary_HLS%";

/// Message codes signalling an expired session
const EXPIRED_SESSION_CODES: [i64; 2] = [201, 208];

const SUCCESS_CODE: i64 = 100;

/// Default REST base URL of a region
pub fn default_rest_base(region: Region) -> String {
    format!("https://{}/rest/v2/experience/modules", region.player_host())
}

struct Session {
    http: Client,
    jar: Arc<Jar>,
    /// Variant playlist URL per channel id
    playlists: HashMap<String, String>,
}

/// SiriusXM HTTP client
///
/// The channel list is fetched once and kept for the life of the client.
/// Variant playlist URLs are cached per channel until the session is reset.
pub struct SiriusXmClient {
    username: String,
    password: String,
    region: Region,
    quality: Quality,
    rest_base: String,
    rest_url: Url,
    hls_root: String,
    timeout: Duration,
    user_agent: String,
    session: RwLock<Session>,
    channels: RwLock<Option<Vec<Value>>>,
}

impl SiriusXmClient {
    /// Create a builder for configuring the client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    fn new_session(&self) -> Result<Session> {
        let jar = Arc::new(Jar::default());
        Ok(Session {
            http: build_http(&self.user_agent, self.timeout, &jar)?,
            jar,
            playlists: HashMap::new(),
        })
    }

    // ========================================================================
    // Cookies
    // ========================================================================

    async fn cookies(&self) -> HashMap<String, String> {
        let session = self.session.read().await;
        session
            .jar
            .cookies(&self.rest_url)
            .and_then(|header| header.to_str().ok().map(parse_cookie_header))
            .unwrap_or_default()
    }

    /// True once the login cookie is present
    pub async fn is_logged_in(&self) -> bool {
        self.cookies().await.contains_key("SXMDATA")
    }

    /// True once a session has been resumed
    pub async fn is_session_authenticated(&self) -> bool {
        let cookies = self.cookies().await;
        cookies.contains_key("AWSALB") && cookies.contains_key("JSESSIONID")
    }

    /// Query parameters signing every HLS request
    async fn hls_params(&self) -> Result<Vec<(&'static str, String)>> {
        let cookies = self.cookies().await;

        let token = cookies
            .get("SXMAKTOKEN")
            .and_then(|value| value.split_once('='))
            .map(|(_, rest)| rest.split(',').next().unwrap_or(rest).to_string())
            .ok_or_else(|| Error::authentication("missing SXMAKTOKEN cookie"))?;

        let gup_id = cookies
            .get("SXMDATA")
            .and_then(|raw| urlencoding::decode(raw).ok())
            .and_then(|decoded| serde_json::from_str::<Value>(&decoded).ok())
            .and_then(|data| data.get("gupId").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| Error::authentication("missing gupId in SXMDATA cookie"))?;

        Ok(vec![("token", token), ("consumer", "k2".to_string()), ("gupId", gup_id)])
    }

    // ========================================================================
    // REST plumbing
    // ========================================================================

    fn device_info(&self) -> Value {
        json!({
            "osVersion": "Mac",
            "platform": "Web",
            "sxmAppVersion": SXM_APP_VERSION,
            "browser": "Safari",
            "browserVersion": "14.0",
            "appRegion": self.region.as_str(),
            "deviceModel": SXM_DEVICE_MODEL,
            "clientDeviceId": "null",
            "player": "html5",
            "clientDeviceType": "web",
        })
    }

    async fn ensure_session(&self) -> Result<()> {
        if !self.is_session_authenticated().await && !self.authenticate().await? {
            return Err(Error::authentication("could not open a SiriusXM session"));
        }
        Ok(())
    }

    async fn post(&self, method: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{}", self.rest_base, method);
        let http = self.session.read().await.http.clone();

        let response = http.post(&url).json(body).send().await?;
        module_list_response(method, response).await
    }

    async fn get(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.rest_base, method);
        let http = self.session.read().await.http.clone();

        let response = http.get(&url).query(params).send().await?;
        module_list_response(method, response).await
    }

    async fn login(&self) -> Result<bool> {
        info!(region = %self.region, "Logging into SiriusXM as {}", self.username);

        let body = json!({
            "moduleList": { "modules": [{ "moduleRequest": {
                "resultTemplate": "web",
                "deviceInfo": self.device_info(),
                "standardAuth": { "username": self.username, "password": self.password },
            }}]}
        });

        let data = self.post("modify/authentication", &body).await?;
        Ok(status_ok(&data) && self.is_logged_in().await)
    }

    // ========================================================================
    // Now playing and playlists
    // ========================================================================

    /// Raw `tune/now-playing-live` envelope, re-authenticating once on an
    /// expired session
    async fn now_playing_envelope(&self, channel: &Channel) -> Result<Value> {
        self.ensure_session().await?;

        let mut renewed = false;
        loop {
            let now = chrono::Utc::now();
            let params = [
                ("assetGUID", channel.guid.clone()),
                ("ccRequestType", "AUDIO_VIDEO".to_string()),
                ("channelId", channel.id.clone()),
                ("hls_output_mode", "custom".to_string()),
                ("marker_mode", "all_separate_cue_points".to_string()),
                ("result-template", "web".to_string()),
                ("time", now.timestamp_millis().to_string()),
                ("timestamp", now.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()),
            ];
            let data = self.get("tune/now-playing-live", &params).await?;

            let code = message_code(&data);
            if !renewed && code.is_some_and(|c| EXPIRED_SESSION_CODES.contains(&c)) {
                warn!(channel = %channel.id, "SiriusXM session expired, re-authenticating");
                renewed = true;
                self.reset_session().await;
                if !self.authenticate().await? {
                    return Err(Error::authentication("session renewal rejected"));
                }
                continue;
            }
            return Ok(data);
        }
    }

    /// Variant playlist URL of a channel for the configured quality
    async fn playlist_url(&self, channel_id: &str) -> Result<Option<String>> {
        if let Some(url) = self.session.read().await.playlists.get(channel_id) {
            return Ok(Some(url.clone()));
        }

        let Some(channel) = self.get_channel(channel_id).await? else {
            warn!(channel = %channel_id, "Unknown channel");
            return Ok(None);
        };

        let data = self.now_playing_envelope(&channel).await?;
        match message_code(&data) {
            Some(SUCCESS_CODE) => {}
            code => {
                warn!(channel = %channel_id, ?code, "Now playing request rejected");
                return Ok(None);
            }
        }

        let master = data
            .pointer("/moduleList/modules/0/moduleResponse/liveChannelData/hlsAudioInfos")
            .and_then(Value::as_array)
            .and_then(|infos| {
                infos
                    .iter()
                    .find(|info| info.get("size").and_then(Value::as_str) == Some("LARGE"))
            })
            .and_then(|info| info.get("url").and_then(Value::as_str))
            .map(|url| url.replace(PRIMARY_HLS_PLACEHOLDER, &self.hls_root));

        let Some(master) = master else {
            warn!(channel = %channel_id, "No HLS playlist advertised");
            return Ok(None);
        };

        let variant = self.variant_url(&master).await?;
        if let Some(url) = &variant {
            self.session
                .write()
                .await
                .playlists
                .insert(channel_id.to_string(), url.clone());
        }
        Ok(variant)
    }

    async fn variant_url(&self, master_url: &str) -> Result<Option<String>> {
        let params = self.hls_params().await?;
        let http = self.session.read().await.http.clone();

        let response = http.get(master_url).query(&params).send().await?;
        if response.status() != StatusCode::OK {
            warn!(status = %response.status(), "Master playlist download failed");
            return Ok(None);
        }

        let body = response.text().await?;
        let tag = self.quality.bitrate_tag();
        let base = master_url.rsplit_once('/').map_or(master_url, |(base, _)| base);

        Ok(body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .find(|line| line.contains(tag))
            .map(|entry| format!("{}/{}", base, entry)))
    }
}

#[async_trait]
impl SiriusXmApi for SiriusXmClient {
    async fn authenticate(&self) -> Result<bool> {
        if !self.is_logged_in().await && !self.login().await? {
            warn!("SiriusXM login rejected");
            return Ok(false);
        }

        let body = json!({
            "moduleList": { "modules": [{ "moduleRequest": {
                "resultTemplate": "web",
                "deviceInfo": self.device_info(),
            }}]}
        });

        let data = self.post("resume?OAtrial=false", &body).await?;
        let ok = status_ok(&data) && self.is_session_authenticated().await;
        if ok {
            debug!("SiriusXM session resumed");
        }
        Ok(ok)
    }

    async fn close_session(&self) {
        let mut session = self.session.write().await;
        match build_http(&self.user_agent, self.timeout, &session.jar) {
            Ok(http) => session.http = http,
            Err(e) => warn!("Could not rebuild HTTP client: {}", e),
        }
    }

    async fn reset_session(&self) {
        match self.new_session() {
            Ok(fresh) => *self.session.write().await = fresh,
            Err(e) => warn!("Could not reset SiriusXM session: {}", e),
        }
    }

    async fn get_playlist(&self, channel_id: &str) -> Result<Option<String>> {
        let Some(url) = self.playlist_url(channel_id).await? else {
            return Ok(None);
        };

        let params = self.hls_params().await?;
        let http = self.session.read().await.http.clone();
        let response = http.get(&url).query(&params).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text().await?;
                Ok(rewrite_playlist(&url, &body))
            }
            StatusCode::FORBIDDEN => {
                warn!(channel = %channel_id, "Playlist refused, dropping cached URL");
                self.session.write().await.playlists.remove(channel_id);
                Ok(None)
            }
            status => {
                warn!(channel = %channel_id, %status, "Playlist download failed");
                Ok(None)
            }
        }
    }

    async fn get_segment(&self, path: &str) -> Result<Option<Bytes>> {
        let url = format!("{}/{}", self.hls_root, path);
        let params = self.hls_params().await?;
        let http = self.session.read().await.http.clone();

        let response = http.get(&url).query(&params).send().await?;
        match response.status() {
            StatusCode::FORBIDDEN => Err(Error::segment_retrieval(format!(
                "status 403 on segment {}",
                path
            ))),
            status if status.is_success() => Ok(Some(response.bytes().await?)),
            status => {
                debug!(segment = %path, %status, "Segment download failed");
                Ok(None)
            }
        }
    }

    async fn get_channels(&self) -> Result<Vec<Value>> {
        if let Some(channels) = self.channels.read().await.as_ref() {
            return Ok(channels.clone());
        }

        self.ensure_session().await?;
        let body = json!({
            "moduleList": { "modules": [{
                "moduleArea": "Discovery",
                "moduleType": "ChannelListing",
                "moduleRequest": {
                    "consumeRequests": [],
                    "resultTemplate": "responsive",
                    "alerts": [],
                    "profileInfos": [],
                }
            }]}
        });

        let data = self.post("get", &body).await?;
        let channels = data
            .pointer("/moduleList/modules/0/moduleResponse/contentData/channelListing/channels")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| Error::other("channel listing missing from response"))?;

        info!("Loaded {} SiriusXM channels", channels.len());
        *self.channels.write().await = Some(channels.clone());
        Ok(channels)
    }

    async fn get_now_playing(&self, channel: &Channel) -> Result<Option<Value>> {
        self.now_playing_envelope(channel).await.map(Some)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn build_http(user_agent: &str, timeout: Duration, jar: &Arc<Jar>) -> Result<Client> {
    Ok(Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .cookie_provider(Arc::clone(jar))
        .build()?)
}

fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

async fn module_list_response(method: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if status != StatusCode::OK {
        return Err(Error::ApiError {
            code: i64::from(status.as_u16()),
            message: format!("{} returned {}", method, status),
        });
    }

    let mut body: Value = response.json().await?;
    match body.get_mut("ModuleListResponse") {
        Some(data) => Ok(data.take()),
        None => Err(Error::other(format!("{}: missing ModuleListResponse", method))),
    }
}

fn status_ok(data: &Value) -> bool {
    data.get("status").and_then(Value::as_i64) == Some(1)
}

fn message_code(data: &Value) -> Option<i64> {
    data.pointer("/messages/0/code").and_then(Value::as_i64)
}

/// Rewrite segment lines of a variant playlist to proxy-relative paths
///
/// `octane_256k_1_000000001.aac` in a playlist downloaded from
/// `.../AAC_Data/octane/HLS_octane_256k_v3/octane_256k_large_v3.m3u8`
/// becomes `AAC_Data/octane/HLS_octane_256k_v3/octane_256k_1_000000001.aac`.
pub(crate) fn rewrite_playlist(variant_url: &str, body: &str) -> Option<String> {
    let aac_path = &variant_url[variant_url.find(AUDIO_SEGMENT_PREFIX)?..];
    let aac_dir = aac_path.rsplit_once('/').map_or(aac_path, |(dir, _)| dir);

    let lines: Vec<String> = body
        .split('\n')
        .map(str::trim_end)
        .map(|line| {
            if line.ends_with(".aac") {
                format!("{}/{}", aac_dir, line)
            } else {
                line.to_string()
            }
        })
        .collect();

    Some(lines.join("\n"))
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`SiriusXmClient`]
pub struct ClientBuilder {
    username: String,
    password: String,
    region: Region,
    quality: Quality,
    rest_base: Option<String>,
    hls_root: String,
    timeout: Duration,
    user_agent: String,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            region: Region::default(),
            quality: Quality::default(),
            rest_base: None,
            hls_root: LIVE_PRIMARY_HLS.to_string(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    pub fn quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Override the REST base URL (defaults to the region's player host)
    pub fn rest_base(mut self, url: impl Into<String>) -> Self {
        self.rest_base = Some(url.into());
        self
    }

    /// Override the HLS host serving playlists and segments
    pub fn hls_root(mut self, url: impl Into<String>) -> Self {
        self.hls_root = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<SiriusXmClient> {
        let rest_base = self
            .rest_base
            .unwrap_or_else(|| default_rest_base(self.region))
            .trim_end_matches('/')
            .to_string();
        let rest_url = Url::parse(&rest_base)?;
        let hls_root = self.hls_root.trim_end_matches('/').to_string();

        let jar = Arc::new(Jar::default());
        let http = build_http(&self.user_agent, self.timeout, &jar)?;

        Ok(SiriusXmClient {
            username: self.username,
            password: self.password,
            region: self.region,
            quality: self.quality,
            rest_base,
            rest_url,
            hls_root,
            timeout: self.timeout,
            user_agent: self.user_agent,
            session: RwLock::new(Session {
                http,
                jar,
                playlists: HashMap::new(),
            }),
            channels: RwLock::new(None),
        })
    }
}
