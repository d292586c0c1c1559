//! Relay connection management.
//!
//! One client for the feed relay and one fallback client shared by every
//! on-demand resolution, each dialed lazily and reused for the rest of the
//! process. The fallback slot lock is held across the dial, so concurrent
//! first callers queue behind a single in-flight attempt instead of opening
//! duplicate connections; a failed attempt leaves the slot empty and the
//! next caller starts fresh.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use nostr_sdk::prelude::*;
use tokio::sync::Mutex;

use crate::config::CoreConfig;
use crate::constants::timeouts;

pub struct ConnectionManager {
    feed_relay: String,
    fallback_relays: Vec<String>,
    default_slot: Mutex<Option<Arc<Client>>>,
    fallback_slot: Mutex<Option<Arc<Client>>>,
}

impl ConnectionManager {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            feed_relay: config.feed_relay.clone(),
            fallback_relays: config.fallback_relays.clone(),
            default_slot: Mutex::new(None),
            fallback_slot: Mutex::new(None),
        }
    }

    /// Client connected to the feed relay only.
    pub async fn default_connection(&self) -> Result<Arc<Client>> {
        let mut slot = self.default_slot.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = Arc::new(
            establish(std::slice::from_ref(&self.feed_relay), timeouts::CONNECT).await?,
        );
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Shared client over the well-known fallback relays.
    ///
    /// Built at most once and never torn down by the engine.
    pub async fn fallback_connection(&self) -> Result<Arc<Client>> {
        let mut slot = self.fallback_slot.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = Arc::new(establish(&self.fallback_relays, timeouts::CONNECT).await?);
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Short-lived client scoped to exactly the given hint relays.
    ///
    /// Never stored; the caller disconnects it after the fetch.
    pub async fn hint_connection(&self, relays: &[String]) -> Result<Client> {
        establish(relays, timeouts::HINT_CONNECT).await
    }
}

/// Dial `relays` and wait until at least one reports `Connected`, bounded
/// by `bound`. Relay status transitions asynchronously after `connect()`
/// returns, so connectivity is confirmed by polling.
async fn establish(relays: &[String], bound: Duration) -> Result<Client> {
    if relays.is_empty() {
        bail!("no relay urls configured");
    }

    let client = Client::default();
    for url in relays {
        client.add_relay(url).await?;
    }

    tracing::debug!(?relays, "starting relay connect");
    let start = std::time::Instant::now();
    let _ = tokio::time::timeout(bound, client.connect()).await;

    let poll_interval = Duration::from_millis(100);
    loop {
        let connected = client
            .relays()
            .await
            .values()
            .filter(|relay| relay.status() == RelayStatus::Connected)
            .count();

        if connected > 0 {
            tracing::info!(
                connected,
                elapsed = ?start.elapsed(),
                "relay connection established"
            );
            return Ok(client);
        }

        if start.elapsed() >= bound {
            client.disconnect().await;
            bail!("no relays connected within {bound:?}");
        }

        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_config() -> CoreConfig {
        let mut config = CoreConfig::new("unused");
        config.feed_relay = String::new();
        config.fallback_relays = Vec::new();
        config
    }

    #[tokio::test]
    async fn test_no_relays_fails_without_dialing() {
        let manager = ConnectionManager::new(&empty_config());
        assert!(manager.hint_connection(&[]).await.is_err());
        assert!(manager.fallback_connection().await.is_err());
    }

    #[tokio::test]
    async fn test_failed_attempt_does_not_poison_the_slot() {
        let manager = ConnectionManager::new(&empty_config());
        assert!(manager.fallback_connection().await.is_err());
        // A later caller gets a fresh attempt, not a stuck slot.
        assert!(manager.fallback_connection().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_relay_url_is_an_error() {
        let mut config = empty_config();
        config.fallback_relays = vec!["not a relay url".to_string()];
        let manager = ConnectionManager::new(&config);
        assert!(manager.fallback_connection().await.is_err());
    }
}
