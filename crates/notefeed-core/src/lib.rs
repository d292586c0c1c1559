pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod feed;
pub mod models;
pub mod reference;
pub mod relay;
pub mod resolver;
pub mod timeout;

// Re-export the types most consumers touch.
pub use cache::PersistentCache;
pub use config::CoreConfig;
pub use error::ResolveError;
pub use feed::{FeedService, FeedState};
pub use models::{Note, Profile};
pub use reference::Reference;
pub use relay::ConnectionManager;
pub use resolver::{NoteResolver, ResolutionState};
