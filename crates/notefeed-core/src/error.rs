use thiserror::Error;

/// Failures surfaced to the consumer of a note resolution.
///
/// Only note-fetch failures reach this type; profile-enrichment and
/// relay-hint failures are absorbed before they can fail a resolution.
/// The `Display` text is the user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Relay unreachable, or the shared fallback connection could not be
    /// acquired in time.
    #[error("Failed to load note")]
    Connection,
    /// The fallback relays answered with zero events for the id. Terminal.
    #[error("Note not found")]
    NotFound,
    /// The fetch deadline elapsed before the relays answered.
    #[error("Note loading timed out")]
    Timeout,
    /// The consuming context went away; the result is discarded, never shown.
    #[error("resolution cancelled")]
    Cancelled,
}
