//! Typed pointers from note bodies into other notes or profiles.
//!
//! The engine does no text scanning of its own: collaborators extract
//! `nostr:` entities from note bodies and hand over decoded references.
//! Only the event-typed variants are resolved here; pubkey-typed ones are
//! display-only.

use nostr_sdk::nips::nip19::Nip19;
use nostr_sdk::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Event { id: String },
    EventWithRelays { id: String, relays: Vec<String> },
    Pubkey { pubkey: String },
    PubkeyWithRelays { pubkey: String, relays: Vec<String> },
}

impl Reference {
    /// Decode a bech32 NIP-19 entity (`note1`, `nevent1`, `npub1`,
    /// `nprofile1`) into a typed reference.
    ///
    /// Secret keys and replaceable-event coordinates have no reference
    /// form in a note body, and malformed entities decode to nothing.
    pub fn from_bech32(entity: &str) -> Option<Self> {
        match Nip19::from_bech32(entity).ok()? {
            Nip19::EventId(id) => Some(Self::Event { id: id.to_hex() }),
            Nip19::Event(event) => {
                let relays: Vec<String> = event.relays.iter().map(|r| r.to_string()).collect();
                let id = event.event_id.to_hex();
                if relays.is_empty() {
                    Some(Self::Event { id })
                } else {
                    Some(Self::EventWithRelays { id, relays })
                }
            }
            Nip19::Pubkey(pk) => Some(Self::Pubkey {
                pubkey: pk.to_hex(),
            }),
            Nip19::Profile(profile) => {
                let relays: Vec<String> = profile.relays.iter().map(|r| r.to_string()).collect();
                let pubkey = profile.public_key.to_hex();
                if relays.is_empty() {
                    Some(Self::Pubkey { pubkey })
                } else {
                    Some(Self::PubkeyWithRelays { pubkey, relays })
                }
            }
            Nip19::Coordinate(_) | Nip19::Secret(_) => None,
        }
    }

    /// Event id and relay hints when this reference points at a note.
    pub fn event_target(&self) -> Option<(String, Vec<String>)> {
        match self {
            Self::Event { id } => Some((id.clone(), Vec::new())),
            Self::EventWithRelays { id, relays } => Some((id.clone(), relays.clone())),
            Self::Pubkey { .. } | Self::PubkeyWithRelays { .. } => None,
        }
    }
}
