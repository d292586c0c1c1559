use serde::{Deserialize, Serialize};

/// Author metadata derived from a kind:0 event.
///
/// At most one profile is retained per author; a later event overwrites an
/// earlier one before the feed merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Raw kind:0 content fields, limited to the ones this engine reads.
#[derive(Deserialize)]
struct ProfileContent {
    name: Option<String>,
    display_name: Option<String>,
    #[serde(rename = "displayName")]
    display_name_camel: Option<String>,
    picture: Option<String>,
    image: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl Profile {
    /// Parse profile metadata from kind:0 event content.
    ///
    /// Display name precedence: `name`, then `display_name`, then
    /// `displayName`. Avatar precedence: `picture`, then `image`. Empty
    /// strings count as absent.
    pub fn from_content(content: &str) -> Result<Self, serde_json::Error> {
        let raw: ProfileContent = serde_json::from_str(content)?;
        Ok(Self {
            name: non_empty(raw.name)
                .or_else(|| non_empty(raw.display_name))
                .or_else(|| non_empty(raw.display_name_camel)),
            picture: non_empty(raw.picture).or_else(|| non_empty(raw.image)),
        })
    }
}
