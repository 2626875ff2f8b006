//! Now-playing extraction from the `tune/now-playing-live` envelope

use crate::models::{CutMarker, NowPlaying};
use serde_json::Value;
use thiserror::Error;

/// Message code of a successful SiriusXM response
pub const SUCCESS_CODE: i64 = 100;

/// Marker layer holding songs and other playable cuts
pub const CUT_LAYER: &str = "cut";

/// Typed failure states of a now-playing lookup
#[derive(Debug, Error, PartialEq)]
pub enum NowPlayingError {
    /// The envelope reports a non-success status
    #[error("SXM returned error {code} {message}")]
    Unavailable { code: i64, message: String },

    /// The envelope misses an expected field
    #[error("malformed now-playing payload: {0}")]
    Parse(String),

    /// The live channel carries no cut marker
    #[error("no cut markers for this channel")]
    NoCuts,
}

fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value, NowPlayingError> {
    value
        .get(key)
        .ok_or_else(|| NowPlayingError::Parse(format!("missing '{}'", key)))
}

fn first<'a>(value: &'a Value, key: &str) -> Result<&'a Value, NowPlayingError> {
    field(value, key)?
        .get(0)
        .ok_or_else(|| NowPlayingError::Parse(format!("empty '{}'", key)))
}

/// Validate the envelope status and return its `liveChannelData` payload
pub fn live_channel_data(envelope: &Value) -> Result<&Value, NowPlayingError> {
    let status = first(envelope, "messages")?;
    let code = field(status, "code")?
        .as_i64()
        .ok_or_else(|| NowPlayingError::Parse("non-numeric message code".into()))?;
    if code != SUCCESS_CODE {
        let message = status
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(NowPlayingError::Unavailable { code, message });
    }

    let module = first(field(envelope, "moduleList")?, "modules")?;
    field(field(module, "moduleResponse")?, "liveChannelData")
}

/// All markers of the cut layer that carry cut data, in payload order
pub fn extract_cut_markers(live_channel_data: &Value) -> Result<Vec<CutMarker>, NowPlayingError> {
    let Some(marker_lists) = live_channel_data.get("markerLists").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut markers = Vec::new();
    for list in marker_lists {
        if list.get("layer").and_then(Value::as_str) != Some(CUT_LAYER) {
            continue;
        }
        let Some(entries) = list.get("markers").and_then(Value::as_array) else {
            continue;
        };
        for entry in entries.iter().filter(|e| e.get("cut").is_some()) {
            let marker: CutMarker = serde_json::from_value(entry.clone())
                .map_err(|e| NowPlayingError::Parse(format!("invalid cut marker: {}", e)))?;
            if marker.cut.is_some() {
                markers.push(marker);
            }
        }
    }
    Ok(markers)
}

/// Marker playing at `now_ms`
///
/// Picks the last marker (in time order) whose time is not after `now_ms`.
/// When every marker lies in the future, the latest marker overall is
/// returned instead. Equal times keep their payload order.
pub fn latest_cut(markers: &[CutMarker], now_ms: i64) -> Option<&CutMarker> {
    let mut sorted: Vec<&CutMarker> = markers.iter().collect();
    sorted.sort_by_key(|m| m.sort_time());

    sorted
        .iter()
        .take_while(|m| m.sort_time() <= now_ms)
        .last()
        .or_else(|| sorted.last())
        .copied()
}

/// Build the now-playing summary of a channel from its raw envelope
pub fn parse_now_playing(
    channel_id: &str,
    envelope: &Value,
    now_ms: i64,
) -> Result<NowPlaying, NowPlayingError> {
    let data = live_channel_data(envelope)?;
    let markers = extract_cut_markers(data)?;
    let latest = latest_cut(&markers, now_ms).ok_or(NowPlayingError::NoCuts)?;
    let cut = latest.cut.clone().unwrap_or_default();

    let title = cut
        .title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());
    let artist = cut
        .artists
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|a| a.name)
        .unwrap_or_else(|| "Unknown".to_string());
    let album = cut.album.and_then(|a| a.title);

    Ok(NowPlaying {
        channel_id: channel_id.to_string(),
        title,
        artist,
        album,
        played_at_ms: latest.time,
    })
}
