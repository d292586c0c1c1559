//! Application-wide constants
//!
//! Centralized location for relay URLs, event kinds and timing values
//! that are used across multiple modules.

/// Relay serving the primary feed subscription
pub const FEED_RELAY_URL: &str = "wss://relay.btcrene.com";

/// Well-known relays shared by all on-demand resolutions
pub const FALLBACK_RELAYS: [&str; 3] = [
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
];

/// Number of top-level notes requested for the feed snapshot
pub const FEED_LIMIT: usize = 10;

// Nostr event kinds used by notefeed
pub mod kinds {
    /// Plain text note
    pub const TEXT_NOTE: u16 = 1;
    /// Metadata (profiles)
    pub const METADATA: u16 = 0;
}

/// Deadlines for every bounded operation in the engine.
///
/// All of these are wall-clock races: when a deadline fires the waiting
/// caller stops waiting, the underlying operation is not aborted.
pub mod timeouts {
    use std::time::Duration;

    /// Establishing the default or fallback relay connection
    pub const CONNECT: Duration = Duration::from_secs(10);
    /// Waiting for the shared fallback connection before a resolution gives up
    pub const FALLBACK_ACQUIRE: Duration = Duration::from_secs(3);
    /// Connecting a short-lived client scoped to relay hints
    pub const HINT_CONNECT: Duration = Duration::from_secs(2);
    /// Fetching the target event from hint relays
    pub const HINT_FETCH: Duration = Duration::from_secs(3);
    /// Fetching the target event from the fallback relays
    pub const NOTE_FETCH: Duration = Duration::from_secs(8);
    /// Fetching the author profile during enrichment
    pub const PROFILE_FETCH: Duration = Duration::from_secs(3);
    /// Overall bound on producing the feed snapshot
    pub const FEED_SNAPSHOT: Duration = Duration::from_secs(30);
}
