//! Feed snapshot service.
//!
//! Opens a live subscription for the latest top-level notes on the feed
//! relay; once the historical backlog drains, opens a second subscription
//! for the authors' profiles and exposes the merged, newest-first list.
//! The feed is a snapshot: nothing is emitted after `ready`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nostr_sdk::prelude::*;
use tokio::sync::watch;

use crate::config::CoreConfig;
use crate::constants::{kinds, timeouts};
use crate::models::{is_reply, Note, Profile};
use crate::relay::ConnectionManager;

/// Reactive feed state consumed by the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    pub notes: Vec<Note>,
    pub connecting: bool,
    pub connected: bool,
    pub error: Option<String>,
}

enum SnapshotOutcome {
    Ready(Vec<Note>),
    Stopped,
    Failed(&'static str),
}

/// Accumulates subscription events into the merged feed list.
///
/// Free of relay plumbing so the two-phase merge can be tested by feeding
/// it events directly.
#[derive(Default)]
pub struct FeedCollector {
    notes: Vec<Note>,
    profiles: HashMap<String, Profile>,
}

impl FeedCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a kind:1 event; replies are not top-level feed items.
    pub fn note_event(&mut self, event: &Event) {
        if is_reply(event) {
            return;
        }
        if let Some(note) = Note::from_event(event) {
            self.notes.push(note);
        }
    }

    /// Backlog for the notes subscription drained: order the list and
    /// report the distinct authors whose profiles are needed.
    pub fn end_of_notes(&mut self) -> Vec<String> {
        // Stable sort keeps arrival order for same-second notes.
        self.notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut seen = HashSet::new();
        self.notes
            .iter()
            .filter(|note| seen.insert(note.pubkey.clone()))
            .map(|note| note.pubkey.clone())
            .collect()
    }

    /// Accept a kind:0 event. Unparseable metadata is skipped; a later
    /// event for the same author overwrites the earlier one.
    pub fn profile_event(&mut self, event: &Event) {
        match Profile::from_content(&event.content) {
            Ok(profile) => {
                self.profiles.insert(event.pubkey.to_hex(), profile);
            }
            Err(e) => {
                tracing::warn!(pubkey = %event.pubkey, "skipping unparseable profile metadata: {e}");
            }
        }
    }

    /// Left-join the ordered notes with whatever profiles arrived.
    pub fn into_feed(mut self) -> Vec<Note> {
        for note in &mut self.notes {
            if let Some(profile) = self.profiles.get(&note.pubkey) {
                note.author_name = profile.name.clone();
                note.author_picture = profile.picture.clone();
            }
        }
        self.notes
    }
}

pub struct FeedService {
    feed_limit: usize,
    connections: Arc<ConnectionManager>,
    state_tx: watch::Sender<FeedState>,
    stop_tx: watch::Sender<bool>,
}

impl FeedService {
    pub fn new(config: &CoreConfig, connections: Arc<ConnectionManager>) -> Self {
        let (state_tx, _) = watch::channel(FeedState::default());
        let (stop_tx, _) = watch::channel(false);
        Self {
            feed_limit: config.feed_limit,
            connections,
            state_tx,
            stop_tx,
        }
    }

    /// Observe feed state changes.
    pub fn state(&self) -> watch::Receiver<FeedState> {
        self.state_tx.subscribe()
    }

    /// Abandon the snapshot. Safe at any point, any number of times, and
    /// before `run` was ever called.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Drive the snapshot to `ready` (or `error`) and return the final
    /// state. Both subscriptions are torn down on every exit path.
    pub async fn run(&self) -> FeedState {
        let mut stop_rx = self.stop_tx.subscribe();
        self.state_tx.send_modify(|s| {
            s.connecting = true;
            s.error = None;
        });

        let client = match self.connections.default_connection().await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("feed relay connection failed: {e}");
                return self.fail("Failed to connect to relay");
            }
        };
        self.state_tx.send_modify(|s| {
            s.connecting = false;
            s.connected = true;
        });

        let notes_filter = Filter::new()
            .kind(Kind::from(kinds::TEXT_NOTE))
            .limit(self.feed_limit);
        let notes_sub = match client.subscribe(notes_filter, None).await {
            Ok(output) => output.val,
            Err(e) => {
                tracing::warn!("notes subscription failed: {e}");
                return self.fail("Failed to connect to relay");
            }
        };

        let mut profile_sub: Option<SubscriptionId> = None;
        let outcome = self
            .collect(&client, &notes_sub, &mut profile_sub, &mut stop_rx)
            .await;

        // Unconditional teardown; unsubscribing a subscription the relay
        // already dropped is a no-op.
        client.unsubscribe(&notes_sub).await;
        if let Some(id) = &profile_sub {
            client.unsubscribe(id).await;
        }

        match outcome {
            SnapshotOutcome::Ready(notes) => {
                tracing::info!(count = notes.len(), "feed snapshot ready");
                self.state_tx.send_modify(|s| {
                    s.notes = notes;
                    s.error = None;
                });
                self.state_tx.borrow().clone()
            }
            SnapshotOutcome::Stopped => self.state_tx.borrow().clone(),
            SnapshotOutcome::Failed(message) => self.fail(message),
        }
    }

    async fn collect(
        &self,
        client: &Client,
        notes_sub: &SubscriptionId,
        profile_sub: &mut Option<SubscriptionId>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> SnapshotOutcome {
        // A stop that landed before this point would never trip changed().
        if *stop_rx.borrow() {
            return SnapshotOutcome::Stopped;
        }

        let mut collector = FeedCollector::new();
        let mut notifications = client.notifications();

        let deadline = tokio::time::sleep(timeouts::FEED_SNAPSHOT);
        tokio::pin!(deadline);

        let notes_sid = notes_sub.to_string();
        let mut profile_sid: Option<String> = None;

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::warn!("feed snapshot deadline elapsed before end of backlog");
                    return SnapshotOutcome::Failed("Feed loading timed out");
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        return SnapshotOutcome::Stopped;
                    }
                }
                notification = notifications.recv() => {
                    match notification {
                        Ok(RelayPoolNotification::Event { subscription_id, event, .. }) => {
                            let sid = subscription_id.to_string();
                            if sid == notes_sid && profile_sid.is_none() {
                                collector.note_event(&event);
                            } else if profile_sid.as_deref() == Some(sid.as_str()) {
                                collector.profile_event(&event);
                            }
                        }
                        Ok(RelayPoolNotification::Message { message, .. }) => {
                            if let RelayMessage::EndOfStoredEvents(sub_id) = message {
                                let sid = sub_id.to_string();
                                if sid == notes_sid && profile_sid.is_none() {
                                    let authors: Vec<PublicKey> = collector
                                        .end_of_notes()
                                        .iter()
                                        .filter_map(|a| PublicKey::from_hex(a).ok())
                                        .collect();
                                    if authors.is_empty() {
                                        return SnapshotOutcome::Ready(collector.into_feed());
                                    }

                                    let filter = Filter::new()
                                        .kind(Kind::from(kinds::METADATA))
                                        .authors(authors);
                                    match client.subscribe(filter, None).await {
                                        Ok(output) => {
                                            profile_sid = Some(output.val.to_string());
                                            *profile_sub = Some(output.val);
                                        }
                                        Err(e) => {
                                            // Notes are deliverable without profiles.
                                            tracing::warn!("profile subscription failed: {e}");
                                            return SnapshotOutcome::Ready(collector.into_feed());
                                        }
                                    }
                                } else if profile_sid.as_deref() == Some(sid.as_str()) {
                                    return SnapshotOutcome::Ready(collector.into_feed());
                                }
                            }
                        }
                        Ok(RelayPoolNotification::Shutdown) | Err(_) => {
                            return SnapshotOutcome::Failed("Relay connection lost");
                        }
                    }
                }
            }
        }
    }

    fn fail(&self, message: &str) -> FeedState {
        self.state_tx.send_modify(|s| {
            s.connecting = false;
            s.error = Some(message.to_string());
        });
        self.state_tx.borrow().clone()
    }
}
