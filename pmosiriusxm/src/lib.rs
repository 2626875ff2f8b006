//! SiriusXM caching HLS proxy for PMOSiriusXM
//!
//! This crate sits between a local HLS player and the SiriusXM streaming
//! service. The player asks the proxy for a channel playlist, the segments
//! it lists, the decryption key and the channel list; the proxy answers from
//! small in-memory caches filled ahead of time by a background refresh loop.
//!
//! # Features
//!
//! - **Upstream client**: [`SiriusXmClient`] logs in, keeps the session
//!   cookies and renews an expired session once before giving up
//! - **Segment pre-fetching**: one refresh loop per active channel fills a
//!   bounded [`SegmentCache`](segment_cache::SegmentCache) with backpressure
//! - **Channel switching**: only the latest requested channel keeps a live
//!   loop; older loops retire on their own
//! - **Now playing**: `/now_playing?channel=<id>` reports the latest cut of a
//!   channel as JSON
//! - **Configuration Extension**: credentials and proxy settings stored in
//!   pmoconfig, with the password encrypted
//!
//! # Example
//!
//! ```no_run
//! use pmosiriusxm::{ProxySettings, SiriusXmApi, SiriusXmClient, SiriusXmExt};
//! use pmoserver::ServerBuilder;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = SiriusXmClient::builder()
//!         .credentials("user@example.com", "secret")
//!         .build()?;
//!
//!     if !client.authenticate().await? {
//!         anyhow::bail!("login rejected");
//!     }
//!
//!     let mut server = ServerBuilder::new_configured().build();
//!     server.init_siriusxm(Arc::new(client), ProxySettings::default()).await?;
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```
//!
//! # Cache semantics
//!
//! Both caches are consume-once: reading a playlist or a segment removes it.
//! A player that asks twice for the same segment gets the second copy
//! straight from upstream.

pub mod active_channel;
pub mod api;
pub mod client;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod now_playing;
pub mod playlist_cache;
pub mod proxy;
pub mod refresh;
pub mod segment_cache;

#[cfg(feature = "server")]
pub mod api_rest;

#[cfg(feature = "server")]
pub mod pmoserver_ext;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

#[cfg(test)]
mod test_support;

// Re-exports
pub use api::SiriusXmApi;
pub use client::{ClientBuilder, SiriusXmClient};
pub use error::{Error, Result};
pub use models::{find_channel, Album, Artist, Channel, Cut, CutMarker, NowPlaying, Quality, Region};
pub use now_playing::{parse_now_playing, NowPlayingError};
pub use proxy::{ProxyContext, ProxySettings};

#[cfg(feature = "server")]
pub use api_rest::{create_router, HLS_AES_KEY};

#[cfg(feature = "server")]
pub use pmoserver_ext::SiriusXmExt;

#[cfg(feature = "pmoconfig")]
pub use config_ext::SiriusXmConfigExt;
