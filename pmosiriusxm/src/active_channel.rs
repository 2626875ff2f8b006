//! Active channel arbitration
//!
//! At most one channel is "active" process-wide: the one whose refresh loop
//! is allowed to keep fetching. Every change bumps a generation counter, and
//! a loop stays alive only while the generation it was started with is
//! still the current one. Loops are never cancelled from outside; they
//! observe the change at the top of their next cycle and return.

use tokio::sync::RwLock;

/// Identity of one activation, handed to the refresh loop it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub channel_id: String,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct ActiveState {
    channel_id: Option<String>,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct ActiveChannel {
    state: RwLock<ActiveState>,
}

impl ActiveChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active channel (or none) unconditionally
    ///
    /// Returns the generation of the new state. Any loop started before
    /// this call is retired from now on, even if `channel_id` is the same
    /// channel it was serving.
    pub async fn set(&self, channel_id: Option<&str>) -> u64 {
        let mut state = self.state.write().await;
        state.channel_id = channel_id.map(str::to_string);
        state.generation += 1;
        state.generation
    }

    /// Activate `channel_id` unless it is already the active channel
    ///
    /// Check and update are atomic, so two requests racing for the same
    /// inactive channel produce a single activation.
    pub async fn claim(&self, channel_id: &str) -> Option<Activation> {
        let mut state = self.state.write().await;
        if state.channel_id.as_deref() == Some(channel_id) {
            return None;
        }

        state.channel_id = Some(channel_id.to_string());
        state.generation += 1;
        Some(Activation {
            channel_id: channel_id.to_string(),
            generation: state.generation,
        })
    }

    pub async fn current(&self) -> Option<String> {
        self.state.read().await.channel_id.clone()
    }

    pub async fn is_active(&self, channel_id: &str) -> bool {
        self.state.read().await.channel_id.as_deref() == Some(channel_id)
    }

    /// True while `activation` has not been superseded
    pub async fn is_current(&self, activation: &Activation) -> bool {
        let state = self.state.read().await;
        state.generation == activation.generation
            && state.channel_id.as_deref() == Some(activation.channel_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_only_once_per_channel() {
        let active = ActiveChannel::new();

        let first = active.claim("octane").await.expect("first claim activates");
        assert!(active.claim("octane").await.is_none());
        assert!(active.is_current(&first).await);
        assert_eq!(active.current().await.as_deref(), Some("octane"));
    }

    #[tokio::test]
    async fn test_switching_channel_retires_previous_activation() {
        let active = ActiveChannel::new();

        let octane = active.claim("octane").await.unwrap();
        let hits = active.claim("siriushits1").await.unwrap();

        assert!(!active.is_current(&octane).await);
        assert!(active.is_current(&hits).await);
        assert!(hits.generation > octane.generation);
    }

    #[tokio::test]
    async fn test_deactivation_and_reactivation() {
        let active = ActiveChannel::new();

        let first = active.claim("octane").await.unwrap();
        active.set(None).await;
        assert!(!active.is_current(&first).await);
        assert!(!active.is_active("octane").await);

        let second = active.claim("octane").await.unwrap();
        assert!(!active.is_current(&first).await);
        assert!(active.is_current(&second).await);
    }
}
