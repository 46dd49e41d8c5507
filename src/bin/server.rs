//! janet-display-server binary
//!
//! Runs the display engine against a line-oriented host adapter: host events
//! arrive as JSON lines on stdin, outbound frames are logged (and would be
//! forwarded to clients by a real host).
//!
//! ## Configuration (CLI / env / TOML via `config` crate)
//!
//! | Key / flag                       | Default  | Description                         |
//! |----------------------------------|----------|-------------------------------------|
//! | `--config` / `DISPLAY_CONFIG`    | none     | Optional TOML/JSON engine config    |
//! | `--store-dir` / `DISPLAY_STORE_DIR` | none  | Persist descriptors as JSON files   |
//! | `DISPLAY_VIEW_DISTANCE_SQUARED`  | `62500`  | Default squared view distance       |
//! | `DISPLAY_UPDATE_PERIOD_TICKS`    | `20`     | Ticks between visibility passes     |
//! | `DISPLAY_INITIAL_DELAY_TICKS`    | `20`     | Delay before the first pass         |
//! | `DISPLAY_INTERACTION_RADIUS_SQUARED` | `36` | Reach of interaction boxes          |
//! | `DISPLAY_TICK_MILLIS`            | `50`     | Length of one tick                  |

use anyhow::{Context, Result};
use clap::Parser;
use janet_display::{
    appearance::Appearance,
    directory::InMemoryDirectory,
    interaction::InteractionRouter,
    manager::{EntityManager, SpawnOptions},
    persistence::JsonFileStore,
    protocol::InteractEntity,
    scheduler::TokioScheduler,
    transport::{ChannelTransport, Frame},
    types::{ClientId, EngineConfig, Location, NumericId},
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "janet-display-server", about = "Janet Display Engine", version)]
struct Args {
    /// Engine config file (TOML or JSON)
    #[arg(long, env = "DISPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for persisted entity descriptors
    #[arg(long, env = "DISPLAY_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Spawn a greeting text display at the origin of this world
    #[arg(long)]
    demo_world: Option<String>,
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }
    let settings = builder
        .add_source(config::Environment::with_prefix("DISPLAY").try_parsing(true))
        .build()
        .context("reading engine config")?;
    settings
        .try_deserialize()
        .context("decoding engine config")
}

// ---------------------------------------------------------------------------
// Host events
// ---------------------------------------------------------------------------

/// One JSON line from the host adapter.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum HostEvent {
    Join {
        client: ClientId,
        presence_id: NumericId,
        location: Location,
    },
    Move {
        client: ClientId,
        location: Location,
    },
    Quit {
        client: ClientId,
    },
    Interact(InteractEntity),
}

fn apply_event(
    event: HostEvent,
    directory: &InMemoryDirectory,
    manager: &EntityManager,
    router: &InteractionRouter,
) {
    match event {
        HostEvent::Join {
            client,
            presence_id,
            location,
        } => {
            directory.join(client.clone(), presence_id, location);
            manager.on_client_join(&client);
        }
        HostEvent::Move { client, location } => {
            if !directory.move_to(&client, location) {
                tracing::warn!("Move for unknown client {}", client);
            }
        }
        HostEvent::Quit { client } => {
            directory.quit(&client);
            manager.on_client_quit(&client);
        }
        HostEvent::Interact(event) => {
            router.handle_event(&event);
        }
    }
}

async fn drain_frames(mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        tracing::debug!(
            client = %frame.client,
            subject = frame.subject,
            bytes = frame.payload.len(),
            "outbound frame"
        );
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("janet_display=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    log::info!(
        "Starting janet-display-server (view_distance²={}, period={} ticks, tick={}ms)",
        config.view_distance_squared,
        config.update_period_ticks,
        config.tick_millis,
    );

    let directory = Arc::new(InMemoryDirectory::new());
    let (transport, frames) = ChannelTransport::channel();
    let scheduler = TokioScheduler::start(Duration::from_millis(config.tick_millis.max(1)));

    let mut manager = EntityManager::with_collaborators(
        config,
        directory.clone(),
        Arc::new(transport),
        scheduler,
    );
    if let Some(dir) = &args.store_dir {
        let store = JsonFileStore::open(dir)
            .with_context(|| format!("opening store at {}", dir.display()))?;
        manager = manager.with_store(Arc::new(store));
    }
    let manager = Arc::new(manager);
    let restored = manager.load_persisted()?;
    tracing::info!(restored, "persisted entities loaded");

    if let Some(world) = &args.demo_world {
        let greeting = manager.new_display("greeting", Appearance::text("Hello from janet-display"))?;
        manager.spawn(
            greeting,
            Location::new(world.clone(), 0.0, 64.0, 0.0),
            SpawnOptions::default(),
        )?;
    }

    let router = InteractionRouter::new(manager.clone());
    let drain = tokio::spawn(drain_frames(frames));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match serde_json::from_str::<HostEvent>(&line) {
                    Ok(event) => apply_event(event, &directory, &manager, &router),
                    Err(e) => tracing::warn!("Ignoring malformed host event: {}", e),
                },
                Ok(None) => {
                    tracing::info!("Host input closed");
                    break;
                }
                Err(e) => {
                    tracing::error!("Reading host input failed: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("janet-display-server shutting down (SIGINT)");
                break;
            }
        }
    }

    let saved = manager.save_persistent();
    let removed = manager.remove_all(false);
    tracing::info!(saved, removed, "shutdown complete");
    drain.abort();
    Ok(())
}
