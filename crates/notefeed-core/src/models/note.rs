use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};

/// A resolved text note, optionally enriched with author metadata.
///
/// Constructed from network events only, never by the UI. A newer fetch
/// replaces the in-memory and cached copy wholesale; notes are never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Hex event id
    pub id: String,
    /// Hex author public key
    pub pubkey: String,
    /// Raw body text, possibly containing embedded markup
    pub content: String,
    /// Creation time in seconds since epoch
    pub created_at: u64,
    /// Author display name, if a profile was resolved
    pub author_name: Option<String>,
    /// Author avatar URL, if a profile was resolved
    pub author_picture: Option<String>,
}

impl Note {
    /// Create a Note from a kind:1 event, without author metadata.
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != Kind::TextNote {
            return None;
        }

        Some(Self {
            id: event.id.to_hex(),
            pubkey: event.pubkey.to_hex(),
            content: event.content.clone(),
            created_at: event.created_at.as_secs(),
            author_name: None,
            author_picture: None,
        })
    }
}

/// Replies carry an `e` tag referencing the note they respond to; the feed
/// only shows top-level notes.
pub fn is_reply(event: &Event) -> bool {
    event
        .tags
        .iter()
        .any(|tag| tag.kind() == TagKind::SingleLetter(SingleLetterTag::lowercase(Alphabet::E)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_note(content: &str) -> Event {
        let keys = Keys::generate();
        EventBuilder::new(Kind::TextNote, content)
            .sign_with_keys(&keys)
            .unwrap()
    }

    #[test]
    fn test_from_event_kind_1() {
        let event = text_note("hello nostr");
        let note = Note::from_event(&event).unwrap();
        assert_eq!(note.id, event.id.to_hex());
        assert_eq!(note.pubkey, event.pubkey.to_hex());
        assert_eq!(note.content, "hello nostr");
        assert_eq!(note.created_at, event.created_at.as_secs());
        assert!(note.author_name.is_none());
        assert!(note.author_picture.is_none());
    }

    #[test]
    fn test_from_event_rejects_other_kinds() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::Metadata, "{}")
            .sign_with_keys(&keys)
            .unwrap();
        assert!(Note::from_event(&event).is_none());
    }

    #[test]
    fn test_is_reply_detects_e_tag() {
        let keys = Keys::generate();
        let parent = text_note("parent");
        let reply = EventBuilder::new(Kind::TextNote, "a reply")
            .tags([Tag::event(parent.id)])
            .sign_with_keys(&keys)
            .unwrap();

        assert!(is_reply(&reply));
        assert!(!is_reply(&parent));
    }

    #[test]
    fn test_p_tag_is_not_a_reply() {
        let keys = Keys::generate();
        let mention = EventBuilder::new(Kind::TextNote, "hi @someone")
            .tags([Tag::public_key(Keys::generate().public_key())])
            .sign_with_keys(&keys)
            .unwrap();
        assert!(!is_reply(&mention));
    }
}
