//! pmoserver extension for SiriusXM
//!
//! Lets `pmosiriusxm` mount its proxy on a `pmoserver::Server` without
//! `pmoserver` knowing about SiriusXM.

use crate::api::SiriusXmApi;
use crate::api_rest::create_router;
use crate::proxy::{ProxyContext, ProxySettings};
use anyhow::Result;
use pmoserver::Server;
use std::sync::Arc;
use tracing::info;

/// Extends a pmoserver `Server` with the SiriusXM proxy
///
/// # Example
///
/// ```rust,no_run
/// use pmosiriusxm::{ProxySettings, SiriusXmClient, SiriusXmExt};
/// use pmoserver::ServerBuilder;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = SiriusXmClient::builder()
///         .credentials("user@example.com", "secret")
///         .build()?;
///
///     let mut server = ServerBuilder::new_configured().build();
///     server.init_siriusxm(Arc::new(client), ProxySettings::default()).await?;
///
///     server.start().await?;
///     server.wait().await;
///     Ok(())
/// }
/// ```
pub trait SiriusXmExt {
    /// Builds the proxy state and mounts its routes at `/`
    ///
    /// # Registered routes
    ///
    /// - `GET /now_playing?channel=<id>`
    /// - `GET .../<channel>.m3u8`, `GET .../*.aac`, `GET .../key/1`, `GET .../channels/`
    ///
    /// # Returns
    ///
    /// The shared proxy context, e.g. to inspect the active channel.
    async fn init_siriusxm(
        &mut self,
        api: Arc<dyn SiriusXmApi>,
        settings: ProxySettings,
    ) -> Result<Arc<ProxyContext>>;
}

impl SiriusXmExt for Server {
    async fn init_siriusxm(
        &mut self,
        api: Arc<dyn SiriusXmApi>,
        settings: ProxySettings,
    ) -> Result<Arc<ProxyContext>> {
        info!(
            precache = settings.precache,
            capacity = settings.segment_cache_capacity,
            "Initializing SiriusXM proxy"
        );

        let context = ProxyContext::new(api, settings);
        self.add_router("/", create_router(Arc::clone(&context))).await;

        Ok(context)
    }
}
