use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use notefeed_core::{
    ConnectionManager, CoreConfig, FeedService, NoteResolver, PersistentCache, Reference,
};

#[derive(Parser)]
#[command(name = "notefeed")]
#[command(about = "Snapshot feed and note resolution over Nostr relays")]
struct Cli {
    /// Data directory for the persistent cache
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Feed relay URL
    #[arg(long)]
    feed_relay: Option<String>,

    /// Fallback relay URL (repeatable)
    #[arg(long = "fallback-relay")]
    fallback_relays: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the latest top-level notes with author names
    Feed,

    /// Resolve a single note by hex event id or note/nevent entity
    Resolve {
        /// Hex event id, note1... or nevent1... entity
        id: String,

        /// Relay hint to try first (repeatable, overrides entity hints)
        #[arg(long = "relay-hint")]
        relay_hints: Vec<String>,
    },

    /// Show persistent cache counts
    CacheStats,

    /// Drop all cached notes and profiles
    ClearCache,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "notefeed=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.data_dir {
        Some(dir) => CoreConfig::new(dir),
        None => CoreConfig::default(),
    };
    if let Some(relay) = cli.feed_relay {
        config.feed_relay = relay;
    }
    if !cli.fallback_relays.is_empty() {
        config.fallback_relays = cli.fallback_relays.clone();
    }

    let cache = Arc::new(PersistentCache::open(&config.data_dir));
    let connections = Arc::new(ConnectionManager::new(&config));

    match cli.command {
        Commands::Feed => {
            let feed = FeedService::new(&config, connections.clone());
            let state = feed.run().await;
            if let Some(error) = &state.error {
                bail!("{error}");
            }

            let resolver = NoteResolver::new(cache, connections);
            let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
            for note in &state.notes {
                let author = note.author_name.as_deref().unwrap_or(&note.pubkey[..8]);
                println!("{} ({})", author, note.created_at);
                println!("{}", note.content);
                for (id, hints) in embedded_event_refs(&note.content) {
                    match resolver.resolve_note(&id, &hints, &cancel_rx).await {
                        Ok(quoted) => {
                            let quoted_author =
                                quoted.author_name.as_deref().unwrap_or(&quoted.pubkey[..8]);
                            println!("  > {} ({})", quoted_author, quoted.created_at);
                            for line in quoted.content.lines() {
                                println!("  > {line}");
                            }
                        }
                        Err(e) => println!("  > {e}"),
                    }
                }
                println!();
            }
        }

        Commands::Resolve { id, relay_hints } => {
            let (event_id, mut hints) = parse_target(&id)?;
            if !relay_hints.is_empty() {
                hints = relay_hints;
            }

            let resolver = NoteResolver::new(cache, connections);
            let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
            let note = resolver.resolve_note(&event_id, &hints, &cancel_rx).await?;

            let author = note.author_name.as_deref().unwrap_or(&note.pubkey[..8]);
            println!("{} ({})", author, note.created_at);
            println!("{}", note.content);
        }

        Commands::CacheStats => {
            let stats = cache.stats();
            println!("notes:    {}", stats.note_count);
            println!("profiles: {}", stats.profile_count);
        }

        Commands::ClearCache => {
            cache.clear_namespaces();
            println!("cache cleared");
        }
    }

    Ok(())
}

/// Collect the event-typed `nostr:` references embedded in a note body.
/// Pubkey-typed entities stay display-only and are not resolved.
fn embedded_event_refs(content: &str) -> Vec<(String, Vec<String>)> {
    content
        .split_whitespace()
        .filter_map(|token| token.strip_prefix("nostr:"))
        .map(|entity| entity.trim_end_matches(|c: char| !c.is_ascii_alphanumeric()))
        .filter_map(Reference::from_bech32)
        .filter_map(|reference| reference.event_target())
        .collect()
}

/// Accept a raw hex event id or a note/nevent bech32 entity, carrying any
/// embedded relay hints along.
fn parse_target(id: &str) -> Result<(String, Vec<String>)> {
    if id.len() == 64 && id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok((id.to_string(), Vec::new()));
    }

    match Reference::from_bech32(id) {
        Some(reference) => reference
            .event_target()
            .ok_or_else(|| anyhow!("'{id}' points at a profile, not a note")),
        None => bail!("'{id}' is not a hex event id or a note/nevent entity"),
    }
}
