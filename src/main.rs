#![cfg_attr(not(test), deny(clippy::panic))]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use rampart_server::auth::TokenAuthority;
use rampart_server::bus::{LeaderElector, LeadershipHook, MemoryBus, MessageBus};
use rampart_server::config;
use rampart_server::game::GameService;
use rampart_server::gateway::{self, AppState};
use rampart_server::grid::{CollisionGrid, MAP_HEIGHT, MAP_WIDTH};
use rampart_server::logging;
use rampart_server::registry::PlayerRegistry;
use rampart_server::room::RoomService;
use rampart_server::store::{MemoryStore, RoomRepository, SharedStore};
use rampart_server::users::{InMemoryUsers, UserDirectory, UserStatsSink};

/// Rampart -- distributed real-time tank-battle server
#[derive(Parser, Debug)]
#[command(name = "rampart-server")]
#[command(about = "Distributed real-time tank-battle server with lease-based room leadership")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    let validation = config::validate(&cfg);
    if cli.validate_config {
        match validation {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.port);
                println!("  Keepalive: {}s", cfg.server.keepalive_secs);
                println!("  Reaper grace: {}s", cfg.server.reaper_grace_secs);
                println!(
                    "  Map: {}",
                    cfg.map_path.as_deref().unwrap_or("<built-in arena>")
                );
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }
    validation.map_err(|e| anyhow::anyhow!(e))?;

    logging::init(&cfg.logging);

    let instance_id = cfg
        .instance_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    tracing::info!(%instance_id, "starting rampart server");

    // Collision grid is loaded once and immutable afterwards.
    let grid = Arc::new(match &cfg.map_path {
        Some(path) => CollisionGrid::from_map_file(path)?,
        None => CollisionGrid::bordered(MAP_WIDTH, MAP_HEIGHT),
    });

    // Composition root: every collaborator is wired exactly once.
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let users = Arc::new(InMemoryUsers::new());
    let directory: Arc<dyn UserDirectory> = users.clone();
    let stats: Arc<dyn UserStatsSink> = users.clone();

    let rooms = Arc::new(RoomRepository::new(store.clone(), directory));
    let registry = Arc::new(PlayerRegistry::new());
    let elector = LeaderElector::new(store, instance_id);
    let game = GameService::new(
        rooms.clone(),
        bus.clone(),
        registry.clone(),
        grid,
        stats.clone(),
        elector,
    );
    let room_service = Arc::new(RoomService::new(rooms.clone(), bus.clone()));
    let leadership: Arc<dyn LeadershipHook> = Arc::new(game.clone());

    let state = Arc::new(AppState {
        rooms,
        room_service,
        game,
        registry,
        bus,
        tokens: Arc::new(TokenAuthority::new(&cfg.jwt_secret)),
        stats,
        leadership,
        keepalive: Duration::from_secs(cfg.server.keepalive_secs),
        reaper_grace: Duration::from_secs(cfg.server.reaper_grace_secs),
    });

    // Every instance runs exactly one bus dispatch task.
    gateway::spawn_dispatcher(state.clone());

    let cors = if cfg.cors_origins == "*" {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cfg
            .cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!("no valid CORS origins configured, using permissive CORS");
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    let router = gateway::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server started - game channel: /game, rooms: /rooms");

    axum::serve(listener, router).await?;
    Ok(())
}
