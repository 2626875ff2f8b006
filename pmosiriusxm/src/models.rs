//! Data models for SiriusXM API responses
//!
//! Only the fields the proxy actually consumes are modelled. Raw channel
//! objects are passed through to players untouched (see `/channels/`), so
//! these structures are used for lookups and now-playing extraction only.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default root of the primary live HLS CDN
pub const LIVE_PRIMARY_HLS: &str = "https://siriusxm-priprodlive.akamaized.net";

// ============================================================================
// Client settings
// ============================================================================

/// SiriusXM account region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    #[default]
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "CA")]
    Ca,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Us => "US",
            Region::Ca => "CA",
        }
    }

    /// Host of the player REST API for this region
    pub fn player_host(&self) -> &'static str {
        match self {
            Region::Us => "player.siriusxm.com",
            Region::Ca => "player.siriusxm.ca",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "US" => Ok(Region::Us),
            "CA" => Ok(Region::Ca),
            other => Err(format!("unknown region '{}' (expected US or CA)", other)),
        }
    }
}

/// Stream quality requested from the HLS variant playlist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "SMALL")]
    Small64k,
    #[serde(rename = "MEDIUM")]
    Medium128k,
    #[default]
    #[serde(rename = "LARGE")]
    Large256k,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Small64k => "SMALL",
            Quality::Medium128k => "MEDIUM",
            Quality::Large256k => "LARGE",
        }
    }

    /// Bitrate marker found in variant playlist names (e.g. `_256k_`)
    pub fn bitrate_tag(&self) -> &'static str {
        match self {
            Quality::Small64k => "_64k_",
            Quality::Medium128k => "_128k_",
            Quality::Large256k => "_256k_",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SMALL" | "SMALL_64K" | "64K" => Ok(Quality::Small64k),
            "MEDIUM" | "MEDIUM_128K" | "128K" => Ok(Quality::Medium128k),
            "LARGE" | "LARGE_256K" | "256K" => Ok(Quality::Large256k),
            other => Err(format!(
                "unknown quality '{}' (expected SMALL, MEDIUM or LARGE)",
                other
            )),
        }
    }
}

// ============================================================================
// Channels
// ============================================================================

/// A SiriusXM channel as returned by the channel list endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    #[serde(rename = "channelGuid")]
    pub guid: String,
    #[serde(rename = "channelId")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub streaming_name: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub medium_description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub is_available: bool,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_mature: bool,
    /// The API sends this either as a number or as a numeric string
    #[serde(
        rename = "siriusChannelNumber",
        deserialize_with = "deserialize_channel_number"
    )]
    pub channel_number: u32,
}

impl Channel {
    /// Channel number followed by its name, e.g. `#37 Octane`
    pub fn pretty_name(&self) -> String {
        format!("#{} {}", self.channel_number, self.name)
    }
}

fn deserialize_channel_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u32),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Resolve a channel by id, name, or channel number (case-insensitive)
///
/// Ids take precedence over names, which take precedence over numbers, so
/// a channel whose name happens to be numeric cannot shadow another
/// channel's id.
pub fn find_channel<'a>(channels: &'a [Channel], identifier: &str) -> Option<&'a Channel> {
    let needle = identifier.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    channels
        .iter()
        .find(|c| c.id.to_lowercase() == needle)
        .or_else(|| channels.iter().find(|c| c.name.to_lowercase() == needle))
        .or_else(|| {
            let number: u32 = needle.parse().ok()?;
            channels.iter().find(|c| c.channel_number == number)
        })
}

// ============================================================================
// Now playing
// ============================================================================

/// A timestamped marker on the `cut` layer of a live channel
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CutMarker {
    /// Marker time in milliseconds since the Unix epoch
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub cut: Option<Cut>,
}

impl CutMarker {
    /// Marker time used for ordering (missing times sort first)
    pub fn sort_time(&self) -> i64 {
        self.time.unwrap_or(0)
    }
}

/// A playable item referenced by a cut marker
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Cut {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artists: Option<Vec<Artist>>,
    #[serde(default)]
    pub album: Option<Album>,
    #[serde(rename = "cutContentType", default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Artist {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Album {
    #[serde(default)]
    pub title: Option<String>,
}

/// Now-playing summary served by `/now_playing`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NowPlaying {
    pub channel_id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub played_at_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel_json(id: &str, name: &str, number: serde_json::Value) -> serde_json::Value {
        json!({
            "channelGuid": format!("guid-{}", id),
            "channelId": id,
            "name": name,
            "streamingName": name,
            "sortOrder": 10,
            "shortDescription": "",
            "mediumDescription": "",
            "url": format!("https://player.siriusxm.com/live/{}", id),
            "isAvailable": true,
            "isFavorite": false,
            "isMature": false,
            "siriusChannelNumber": number,
        })
    }

    fn sample_channels() -> Vec<Channel> {
        vec![
            serde_json::from_value(channel_json("octane", "Octane", json!("37"))).unwrap(),
            serde_json::from_value(channel_json("siriushits1", "SiriusXM Hits 1", json!(2)))
                .unwrap(),
        ]
    }

    #[test]
    fn test_channel_number_accepts_string_and_number() {
        let channels = sample_channels();
        assert_eq!(channels[0].channel_number, 37);
        assert_eq!(channels[1].channel_number, 2);
        assert_eq!(channels[0].pretty_name(), "#37 Octane");
    }

    #[test]
    fn test_find_channel_by_id_name_and_number() {
        let channels = sample_channels();

        assert_eq!(find_channel(&channels, "octane").unwrap().id, "octane");
        assert_eq!(find_channel(&channels, "OCTANE").unwrap().id, "octane");
        assert_eq!(
            find_channel(&channels, "siriusxm hits 1").unwrap().id,
            "siriushits1"
        );
        assert_eq!(find_channel(&channels, "2").unwrap().id, "siriushits1");
        assert!(find_channel(&channels, "99").is_none());
        assert!(find_channel(&channels, "").is_none());
    }

    #[test]
    fn test_region_and_quality_parsing() {
        assert_eq!("ca".parse::<Region>().unwrap(), Region::Ca);
        assert!("eu".parse::<Region>().is_err());
        assert_eq!("large".parse::<Quality>().unwrap(), Quality::Large256k);
        assert_eq!(Quality::Medium128k.bitrate_tag(), "_128k_");
        assert_eq!(Region::Ca.player_host(), "player.siriusxm.ca");
    }
}
