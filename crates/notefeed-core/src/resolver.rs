//! On-demand note resolution.
//!
//! Resolves a single note by id with optional relay hints: persistent
//! cache first, then the hint relays, then the shared fallback relays,
//! each step bounded by its own deadline. Author profiles are attached
//! best-effort and never fail a resolution.

use std::sync::Arc;
use std::time::Duration;

use nostr_sdk::prelude::*;
use tokio::sync::watch;

use crate::cache::PersistentCache;
use crate::constants::{kinds, timeouts};
use crate::error::ResolveError;
use crate::models::{Note, Profile};
use crate::relay::ConnectionManager;
use crate::timeout::with_timeout;

/// Reactive per-reference state consumed by the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct ResolutionState {
    pub note: Option<Note>,
    pub loading: bool,
    pub error: Option<String>,
}

/// Handle to a spawned resolution. Dropping it cancels the resolution:
/// whatever happens on the network afterwards, no state is published and
/// no cache write occurs.
pub struct ResolutionHandle {
    state_rx: watch::Receiver<ResolutionState>,
    cancel_tx: watch::Sender<bool>,
}

impl ResolutionHandle {
    pub fn state(&self) -> watch::Receiver<ResolutionState> {
        self.state_rx.clone()
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

impl Drop for ResolutionHandle {
    fn drop(&mut self) {
        let _ = self.cancel_tx.send(true);
    }
}

enum FetchFailure {
    TimedOut,
    Failed,
}

#[derive(Clone)]
pub struct NoteResolver {
    cache: Arc<PersistentCache>,
    connections: Arc<ConnectionManager>,
}

impl NoteResolver {
    pub fn new(cache: Arc<PersistentCache>, connections: Arc<ConnectionManager>) -> Self {
        Self { cache, connections }
    }

    /// Resolve `event_id` (hex), preferring `relay_hints` when given.
    ///
    /// Identical (id, hints) invocations served from cache return the same
    /// note without network effort; concurrent cache-miss invocations are
    /// allowed to fetch redundantly, last write to the cache wins.
    pub async fn resolve_note(
        &self,
        event_id: &str,
        relay_hints: &[String],
        cancel: &watch::Receiver<bool>,
    ) -> Result<Note, ResolveError> {
        if let Some(note) = self.cache.get_note(event_id) {
            tracing::debug!(event_id, "note served from cache");
            return Ok(note);
        }

        let id = EventId::from_hex(event_id).map_err(|e| {
            tracing::debug!(event_id, "invalid event id: {e}");
            ResolveError::NotFound
        })?;

        let fallback = match with_timeout(
            timeouts::FALLBACK_ACQUIRE,
            self.connections.fallback_connection(),
        )
        .await
        {
            Some(Ok(client)) => client,
            Some(Err(e)) => {
                tracing::warn!("fallback connection failed: {e}");
                return Err(ResolveError::Connection);
            }
            None => {
                tracing::warn!(
                    "fallback connection not ready within {:?}",
                    timeouts::FALLBACK_ACQUIRE
                );
                return Err(ResolveError::Connection);
            }
        };
        ensure_live(cancel)?;

        let mut event = None;
        if !relay_hints.is_empty() {
            event = self.fetch_from_hints(id, relay_hints).await;
            ensure_live(cancel)?;
        }

        let event = match event {
            Some(event) => event,
            None => {
                let filter = Filter::new().kind(Kind::from(kinds::TEXT_NOTE)).id(id);
                match fetch_raced(&fallback, filter, timeouts::NOTE_FETCH).await {
                    Ok(events) => match events.into_iter().next() {
                        Some(event) => event,
                        None => return Err(ResolveError::NotFound),
                    },
                    Err(FetchFailure::TimedOut) => return Err(ResolveError::Timeout),
                    Err(FetchFailure::Failed) => return Err(ResolveError::Connection),
                }
            }
        };
        ensure_live(cancel)?;

        let author = event.pubkey;
        let profile = self.author_profile(&fallback, author, cancel).await;
        ensure_live(cancel)?;

        let note = Note {
            id: event.id.to_hex(),
            pubkey: author.to_hex(),
            content: event.content.clone(),
            created_at: event.created_at.as_secs(),
            author_name: profile.as_ref().and_then(|p| p.name.clone()),
            author_picture: profile.as_ref().and_then(|p| p.picture.clone()),
        };

        self.cache.put_note(&note);
        Ok(note)
    }

    /// Spawn a resolution whose progress is observed through a watch
    /// channel, one per embedded reference.
    pub fn spawn_resolution(&self, event_id: String, relay_hints: Vec<String>) -> ResolutionHandle {
        let (state_tx, state_rx) = watch::channel(ResolutionState {
            note: None,
            loading: true,
            error: None,
        });
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let resolver = self.clone();

        tokio::spawn(async move {
            let outcome = resolver
                .resolve_note(&event_id, &relay_hints, &cancel_rx)
                .await;
            if *cancel_rx.borrow() {
                return;
            }
            match outcome {
                Ok(note) => state_tx.send_modify(|s| {
                    s.note = Some(note);
                    s.loading = false;
                }),
                Err(ResolveError::Cancelled) => {}
                Err(e) => state_tx.send_modify(|s| {
                    s.error = Some(e.to_string());
                    s.loading = false;
                }),
            }
        });

        ResolutionHandle { state_rx, cancel_tx }
    }

    /// Hints are a latency optimization, never a hard requirement: every
    /// failure here is swallowed and resolution falls through to the
    /// fallback relays.
    async fn fetch_from_hints(&self, id: EventId, relays: &[String]) -> Option<Event> {
        let client = match self.connections.hint_connection(relays).await {
            Ok(client) => client,
            Err(e) => {
                tracing::debug!(?relays, "hint relay connection failed: {e}");
                return None;
            }
        };

        let filter = Filter::new().kind(Kind::from(kinds::TEXT_NOTE)).id(id);
        let event = match fetch_raced(&client, filter, timeouts::HINT_FETCH).await {
            Ok(events) => events.into_iter().next(),
            Err(_) => {
                tracing::debug!(%id, "hint relay fetch failed, trying fallback relays");
                None
            }
        };

        client.disconnect().await;
        event
    }

    /// Cache-first author lookup. On a miss the profile is fetched from
    /// the fallback relays and cached; any failure yields an un-enriched
    /// note rather than a failed resolution.
    async fn author_profile(
        &self,
        fallback: &Client,
        author: PublicKey,
        cancel: &watch::Receiver<bool>,
    ) -> Option<Profile> {
        let pubkey_hex = author.to_hex();
        if let Some(profile) = self.cache.get_profile(&pubkey_hex) {
            return Some(profile);
        }

        let filter = Filter::new().kind(Kind::from(kinds::METADATA)).author(author);
        let event = match fetch_raced(fallback, filter, timeouts::PROFILE_FETCH).await {
            Ok(events) => events.into_iter().next()?,
            Err(_) => {
                tracing::debug!(pubkey = %pubkey_hex, "profile fetch failed, showing note without author");
                return None;
            }
        };

        if *cancel.borrow() {
            return None;
        }

        match Profile::from_content(&event.content) {
            Ok(profile) => {
                self.cache.put_profile(&pubkey_hex, &profile);
                Some(profile)
            }
            Err(e) => {
                tracing::debug!(pubkey = %pubkey_hex, "unparseable profile metadata: {e}");
                None
            }
        }
    }
}

fn ensure_live(cancel: &watch::Receiver<bool>) -> Result<(), ResolveError> {
    if *cancel.borrow() {
        return Err(ResolveError::Cancelled);
    }
    Ok(())
}

/// Fetch with a race deadline. The inner fetch deadline sits past the race
/// bound, so an empty return always means the relays answered before the
/// caller stopped waiting.
async fn fetch_raced(
    client: &Client,
    filter: Filter,
    bound: Duration,
) -> Result<Events, FetchFailure> {
    match with_timeout(
        bound,
        client.fetch_events(filter, bound + Duration::from_secs(1)),
    )
    .await
    {
        Some(Ok(events)) => Ok(events),
        Some(Err(e)) => {
            tracing::debug!("fetch failed: {e}");
            Err(FetchFailure::Failed)
        }
        None => Err(FetchFailure::TimedOut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use tempfile::tempdir;

    fn offline_resolver(cache: Arc<PersistentCache>) -> NoteResolver {
        // No relays configured: any network step fails immediately, so a
        // test reaching the network is observable as a Connection error.
        let mut config = CoreConfig::new("unused");
        config.feed_relay = String::new();
        config.fallback_relays = Vec::new();
        NoteResolver::new(cache, Arc::new(ConnectionManager::new(&config)))
    }

    fn not_cancelled() -> watch::Receiver<bool> {
        // The dropped sender leaves the flag permanently false.
        let (_tx, rx) = watch::channel(false);
        rx
    }

    fn cached_note(id: &str) -> Note {
        Note {
            id: id.to_string(),
            pubkey: "d".repeat(64),
            content: "from cache".to_string(),
            created_at: 1_700_000_000,
            author_name: Some("alice".to_string()),
            author_picture: None,
        }
    }

    #[tokio::test]
    async fn test_cache_hit_resolves_without_network() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(PersistentCache::open(dir.path()));
        let note = cached_note(&"a".repeat(64));
        cache.put_note(&note);

        let resolver = offline_resolver(cache);
        let resolved = resolver
            .resolve_note(&note.id, &[], &not_cancelled())
            .await
            .unwrap();
        assert_eq!(resolved, note);
    }

    #[tokio::test]
    async fn test_cache_miss_without_relays_is_a_connection_failure() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(PersistentCache::open(dir.path()));
        let resolver = offline_resolver(cache.clone());

        let result = resolver
            .resolve_note(&"a".repeat(64), &[], &not_cancelled())
            .await;
        assert_eq!(result, Err(ResolveError::Connection));
        // A failed resolution writes nothing back.
        assert_eq!(cache.stats().note_count, 0);
    }

    #[tokio::test]
    async fn test_hint_relay_failure_is_swallowed() {
        let resolver = offline_resolver(Arc::new(PersistentCache::disabled()));
        let id = EventId::from_hex(&"f".repeat(64)).unwrap();

        // An unreachable hint set yields nothing rather than an error, so
        // the resolution falls through to the fallback relays.
        let event = resolver
            .fetch_from_hints(id, &["not a relay url".to_string()])
            .await;
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn test_invalid_event_id_is_not_found() {
        let cache = Arc::new(PersistentCache::disabled());
        let resolver = offline_resolver(cache);

        let result = resolver
            .resolve_note("definitely-not-hex", &[], &not_cancelled())
            .await;
        assert_eq!(result, Err(ResolveError::NotFound));
    }

    #[tokio::test]
    async fn test_cancelled_resolution_publishes_nothing() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(PersistentCache::open(dir.path()));
        let note = cached_note(&"b".repeat(64));
        cache.put_note(&note);

        let resolver = offline_resolver(cache);
        let handle = resolver.spawn_resolution(note.id.clone(), Vec::new());
        handle.cancel();

        // Give the spawned task room to finish against the cancelled flag.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let state = handle.state();
        let state = state.borrow();
        assert!(state.note.is_none());
        assert!(state.error.is_none());
        assert!(state.loading);
    }

    #[tokio::test]
    async fn test_spawned_cache_hit_publishes_the_note() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(PersistentCache::open(dir.path()));
        let note = cached_note(&"c".repeat(64));
        cache.put_note(&note);

        let resolver = offline_resolver(cache);
        let handle = resolver.spawn_resolution(note.id.clone(), Vec::new());

        let mut state_rx = handle.state();
        // The initial value is loading; wait for the published result.
        state_rx.changed().await.unwrap();
        let state = state_rx.borrow();
        assert_eq!(state.note.as_ref(), Some(&note));
        assert!(!state.loading);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_spawned_failure_publishes_the_user_message() {
        let cache = Arc::new(PersistentCache::disabled());
        let resolver = offline_resolver(cache);
        let handle = resolver.spawn_resolution("e".repeat(64), Vec::new());

        let mut state_rx = handle.state();
        state_rx.changed().await.unwrap();
        let state = state_rx.borrow();
        assert_eq!(state.error.as_deref(), Some("Failed to load note"));
        assert!(!state.loading);
        assert!(state.note.is_none());
    }
}
