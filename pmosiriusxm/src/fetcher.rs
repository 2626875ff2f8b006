//! Segment fetching with one-shot session recovery
//!
//! SiriusXM answers segment requests with an error once the session behind
//! the HLS token has expired. The fetcher recovers exactly once per failure:
//! close the session, reset it, authenticate again and retry the fetch. A
//! second failure goes back to the caller.
//!
//! Recovery is single-flight: fetchers that fail during the same burst wait
//! for the recovery already in progress instead of logging in again.

use crate::api::SiriusXmApi;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct SegmentFetcher {
    api: Arc<dyn SiriusXmApi>,
    /// Bumped after every recovery; lets late failers detect that the
    /// session they used has already been replaced.
    session_epoch: Mutex<u64>,
}

impl SegmentFetcher {
    pub fn new(api: Arc<dyn SiriusXmApi>) -> Self {
        Self {
            api,
            session_epoch: Mutex::new(0),
        }
    }

    /// Fetch a segment, recovering the session once if it has expired
    pub async fn fetch(&self, path: &str) -> Result<Option<Bytes>> {
        let epoch = *self.session_epoch.lock().await;

        match self.api.get_segment(path).await {
            Err(Error::SegmentRetrieval(reason)) => {
                warn!(segment = %path, %reason, "Segment retrieval failed, renewing session");
                self.recover_session(epoch).await?;
                self.api.get_segment(path).await
            }
            other => other,
        }
    }

    async fn recover_session(&self, observed_epoch: u64) -> Result<()> {
        let mut epoch = self.session_epoch.lock().await;
        if *epoch != observed_epoch {
            debug!("Session already renewed by a concurrent fetch");
            return Ok(());
        }

        self.api.close_session().await;
        self.api.reset_session().await;
        *epoch += 1;

        if self.api.authenticate().await? {
            info!("SiriusXM session renewed");
        } else {
            warn!("SiriusXM re-authentication was rejected, retrying segment anyway");
        }
        Ok(())
    }
}
