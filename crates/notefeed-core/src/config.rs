use std::path::{Path, PathBuf};

use crate::constants::{FALLBACK_RELAYS, FEED_LIMIT, FEED_RELAY_URL};

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    pub feed_relay: String,
    pub fallback_relays: Vec<String>,
    pub feed_limit: usize,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            feed_relay: FEED_RELAY_URL.to_string(),
            fallback_relays: FALLBACK_RELAYS.iter().map(|s| s.to_string()).collect(),
            feed_limit: FEED_LIMIT,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new("notefeed_data")
    }
}
