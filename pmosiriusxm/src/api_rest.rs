//! HTTP surface of the proxy
//!
//! `/now_playing` is a regular route; every other request goes through a
//! fallback that dispatches on the path suffix, so playlists, segments, the
//! key and the channel list are served whatever prefix the player uses.

use crate::now_playing::{parse_now_playing, NowPlayingError};
use crate::proxy::ProxyContext;
use crate::refresh::AUDIO_SEGMENT_PREFIX;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Static AES-128 key announced by every SiriusXM playlist
pub const HLS_AES_KEY: [u8; 16] = [
    0xd0, 0xdb, 0x1c, 0xa3, 0xb3, 0x00, 0x83, 0x1a, 0x30, 0x1a, 0xf9, 0x14, 0x4f, 0xc6, 0x98, 0x6a,
];

pub const PLAYLIST_CONTENT_TYPE: &str = "application/x-mpegURL";
pub const SEGMENT_CONTENT_TYPE: &str = "audio/x-aac";

// ============ Error handling ============

/// Failure of a proxy request, rendered as a bare status code
#[derive(Debug)]
struct AppError(StatusCode);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

impl From<NowPlayingError> for AppError {
    fn from(err: NowPlayingError) -> Self {
        match err {
            NowPlayingError::Unavailable { .. } | NowPlayingError::NoCuts => {
                Self(StatusCode::SERVICE_UNAVAILABLE)
            }
            NowPlayingError::Parse(_) => Self(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

/// Create the proxy router
pub fn create_router(context: Arc<ProxyContext>) -> Router {
    Router::new()
        .route("/now_playing", get(now_playing))
        .fallback(dispatch)
        .with_state(context)
}

/// Channel id of a `.../<channel>.m3u8` path
fn playlist_channel(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(".m3u8").unwrap_or(name)
}

/// Segment key of a `.../AAC_Data/...aac` path
///
/// Segments are keyed from their `AAC_Data` component, so a playlist served
/// under a prefix still hits the segments pre-fetched for it.
fn segment_path(path: &str) -> &str {
    let marker = format!("/{}/", AUDIO_SEGMENT_PREFIX);
    match path.find(&marker) {
        Some(pos) => &path[pos + 1..],
        None => path.trim_start_matches('/'),
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
struct NowPlayingQuery {
    channel: Option<String>,
}

/// GET /now_playing?channel=<id|name|number>
async fn now_playing(
    State(context): State<Arc<ProxyContext>>,
    Query(query): Query<NowPlayingQuery>,
) -> Result<Response, AppError> {
    let identifier = query
        .channel
        .filter(|c| !c.is_empty())
        .ok_or(AppError(StatusCode::BAD_REQUEST))?;

    let channel = match context.api().get_channel(&identifier).await {
        Ok(Some(channel)) => channel,
        Ok(None) => return Err(AppError(StatusCode::NOT_FOUND)),
        Err(e) => {
            error!(channel = %identifier, "Error resolving channel: {}", e);
            return Err(AppError(StatusCode::NOT_FOUND));
        }
    };

    let envelope = match context.api().get_now_playing(&channel).await {
        Ok(Some(envelope)) => envelope,
        Ok(None) => return Err(AppError(StatusCode::SERVICE_UNAVAILABLE)),
        Err(e) => {
            error!(channel = %identifier, "Error fetching now playing: {}", e);
            return Err(AppError(StatusCode::SERVICE_UNAVAILABLE));
        }
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    let summary = parse_now_playing(&channel.id, &envelope, now_ms).map_err(|e| {
        warn!(channel = %channel.id, "Now playing lookup failed: {}", e);
        AppError::from(e)
    })?;

    Ok(Json(summary).into_response())
}

/// Suffix-based dispatch for everything but `/now_playing`
async fn dispatch(
    State(context): State<Arc<ProxyContext>>,
    method: Method,
    uri: Uri,
) -> Result<Response, AppError> {
    if method != Method::GET {
        return Err(AppError(StatusCode::METHOD_NOT_ALLOWED));
    }

    let path = uri.path();
    debug!(%path, "Proxy request");

    if path.ends_with(".m3u8") {
        get_playlist(&context, playlist_channel(path)).await
    } else if path.ends_with(".aac") {
        get_segment(&context, segment_path(path)).await
    } else if path.ends_with("/key/1") {
        Ok(get_key())
    } else if path.ends_with("/channels/") {
        get_channels(&context).await
    } else {
        Err(AppError(StatusCode::NOT_FOUND))
    }
}

/// GET */<channel>.m3u8
async fn get_playlist(context: &Arc<ProxyContext>, channel_id: &str) -> Result<Response, AppError> {
    let playlist = match context.get_playlist(channel_id).await {
        Ok(playlist) => playlist,
        Err(e) => {
            error!(channel = %channel_id, "Error generating playlist: {}", e);
            None
        }
    };

    match playlist {
        Some(playlist) => Ok((
            [(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)],
            Body::from(playlist),
        )
            .into_response()),
        None => {
            warn!(channel = %channel_id, "Playlist unavailable, deactivating channel");
            context.set_active(None, None).await;
            Err(AppError(StatusCode::SERVICE_UNAVAILABLE))
        }
    }
}

/// GET */<segment>.aac
async fn get_segment(context: &ProxyContext, path: &str) -> Result<Response, AppError> {
    match context.get_segment(path).await {
        Ok(Some(data)) if !data.is_empty() => {
            Ok(([(header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE)], Body::from(data)).into_response())
        }
        Ok(_) => {
            debug!(segment = %path, "Segment unavailable");
            Err(AppError(StatusCode::SERVICE_UNAVAILABLE))
        }
        Err(e) => {
            warn!(segment = %path, "Segment fetch failed: {}", e);
            Err(AppError(StatusCode::SERVICE_UNAVAILABLE))
        }
    }
}

/// GET */key/1
fn get_key() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain")],
        Body::from(HLS_AES_KEY.to_vec()),
    )
        .into_response()
}

/// GET */channels/
///
/// An empty list means the account cannot stream, hence 403.
async fn get_channels(context: &ProxyContext) -> Result<Response, AppError> {
    let channels = context.api().get_channels().await.unwrap_or_else(|e| {
        warn!("Error listing channels: {}", e);
        Vec::new()
    });

    if channels.is_empty() {
        return Err(AppError(StatusCode::FORBIDDEN));
    }
    Ok(Json(channels).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{test_settings, ProxySettings};
    use crate::test_support::{channel_json, now_playing_envelope, MockApi};
    use axum::body::to_bytes;
    use axum::http::Request;
    use bytes::Bytes;
    use tower::ServiceExt;

    const SEGMENT: &str = "AAC_Data/octane/octane_256k_1_000000001.aac";
    const PLAYLIST: &str = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key/1\"\nAAC_Data/octane/octane_256k_1_000000001.aac";

    fn no_precache() -> ProxySettings {
        ProxySettings {
            precache: false,
            ..test_settings()
        }
    }

    fn proxy_router(api: MockApi) -> (Router, Arc<ProxyContext>, Arc<MockApi>) {
        let api = Arc::new(api);
        let context = ProxyContext::new(api.clone(), no_precache());
        (create_router(context.clone()), context, api)
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Option<String>, Bytes) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, body)
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(playlist_channel("/octane.m3u8"), "octane");
        assert_eq!(playlist_channel("/listen/siriushits1.m3u8"), "siriushits1");
        assert_eq!(segment_path(&format!("/{}", SEGMENT)), SEGMENT);
        assert_eq!(segment_path(&format!("/listen/{}", SEGMENT)), SEGMENT);
    }

    #[tokio::test]
    async fn test_playlist_served_and_channel_activated() {
        let (router, context, _) = proxy_router(MockApi::new().with_playlist(PLAYLIST));

        let (status, content_type, body) = get(router, "/octane.m3u8").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(PLAYLIST_CONTENT_TYPE));
        assert_eq!(body, PLAYLIST.as_bytes());
        assert!(context.active().is_active("octane").await);
    }

    #[tokio::test]
    async fn test_unavailable_playlist_deactivates() {
        let (router, context, _) = proxy_router(MockApi::new());
        context.set_active(Some("octane"), None).await;

        let (status, _, _) = get(router, "/octane.m3u8").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(context.active().current().await, None);
    }

    #[tokio::test]
    async fn test_segment_from_cache_then_upstream() {
        let (router, context, api) = proxy_router(MockApi::new().with_segment(SEGMENT, b"upstream"));
        context.segments().try_put(SEGMENT, Bytes::from_static(b"cached")).await.unwrap();

        let (status, content_type, body) = get(router.clone(), &format!("/{}", SEGMENT)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(SEGMENT_CONTENT_TYPE));
        assert_eq!(body, Bytes::from_static(b"cached"));
        assert_eq!(MockApi::count(&api.segment_calls), 0);

        let (status, _, body) = get(router, &format!("/{}", SEGMENT)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"upstream"));
    }

    #[tokio::test]
    async fn test_segment_recovers_expired_session() {
        let (router, _, api) = proxy_router(
            MockApi::new()
                .with_segment(SEGMENT, b"aac")
                .with_expired_segments(1),
        );

        let (status, _, body) = get(router, &format!("/{}", SEGMENT)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"aac"));
        assert_eq!(MockApi::count(&api.authenticate_calls), 1);
    }

    #[tokio::test]
    async fn test_missing_segment_is_unavailable() {
        let (router, _, _) = proxy_router(MockApi::new().with_expired_segments(2));

        let (status, _, _) = get(router, &format!("/{}", SEGMENT)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_key_is_static() {
        let (router, _, _) = proxy_router(MockApi::new());

        let (status, content_type, body) = get(router, "/anything/key/1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/plain"));
        assert_eq!(body.as_ref(), &HLS_AES_KEY);
    }

    #[tokio::test]
    async fn test_channels_pass_through_or_forbidden() {
        let (router, _, _) = proxy_router(MockApi::new());
        let (status, _, _) = get(router, "/channels/").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (router, _, _) = proxy_router(MockApi::new().with_channels(vec![channel_json("octane", "Octane", 37)]));
        let (status, _, body) = get(router, "/channels/").await;
        assert_eq!(status, StatusCode::OK);
        let channels: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(channels[0]["channelId"], "octane");
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let (router, _, _) = proxy_router(MockApi::new());
        let (status, _, _) = get(router.clone(), "/favicon.ico").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/octane.m3u8")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_now_playing_statuses() {
        let api = MockApi::new()
            .with_channels(vec![channel_json("octane", "Octane", 37)])
            .with_now_playing(now_playing_envelope(&[100, 200, 300]));
        let (router, _, _) = proxy_router(api);

        let (status, _, _) = get(router.clone(), "/now_playing").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = get(router.clone(), "/now_playing?channel=nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Markers are far in the past, so the latest one is playing
        let (status, content_type, body) = get(router, "/now_playing?channel=37").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        let np: crate::models::NowPlaying = serde_json::from_slice(&body).unwrap();
        assert_eq!(np.channel_id, "octane");
        assert_eq!(np.title, "Song 300");
        assert_eq!(np.played_at_ms, Some(300));
    }

    #[tokio::test]
    async fn test_now_playing_upstream_failures() {
        let channels = vec![channel_json("octane", "Octane", 37)];

        let (router, _, _) = proxy_router(MockApi::new().with_channels(channels.clone()));
        let (status, _, _) = get(router, "/now_playing?channel=octane").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let mut rejected = now_playing_envelope(&[100]);
        rejected["messages"][0]["code"] = serde_json::json!(201);
        let (router, _, _) = proxy_router(
            MockApi::new()
                .with_channels(channels.clone())
                .with_now_playing(rejected),
        );
        let (status, _, _) = get(router, "/now_playing?channel=octane").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (router, _, _) = proxy_router(
            MockApi::new()
                .with_channels(channels)
                .with_now_playing(serde_json::json!({ "messages": [{ "code": 100 }] })),
        );
        let (status, _, _) = get(router, "/now_playing?channel=octane").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
