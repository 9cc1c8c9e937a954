use clap::Parser;
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use server::config::TrafficConfig;
use server::network::{PacketBroadcaster, Server};
use server::slot::AiMode;
use server::spline::SplineNetwork;
use server::traffic::{TickDriver, Traffic};
use shared::KMH_TO_MS;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "9600")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "20")]
    tick_rate: u32,
    /// Maximum number of players
    #[clap(long, default_value = "8")]
    max_clients: usize,
    /// Number of traffic slots
    #[clap(long, default_value = "16")]
    slots: usize,
    /// How many of the slots are never handed to players
    #[clap(long, default_value = "4")]
    fixed_slots: usize,
    /// Lane map file; a demo map is generated when omitted
    #[clap(long)]
    map: Option<PathBuf>,
    /// Seed for reproducible traffic
    #[clap(long)]
    seed: Option<u64>,

    #[clap(long, default_value = "200")]
    min_state_distance: f32,
    #[clap(long, default_value = "1000")]
    state_spawn_distance: f32,
    #[clap(long, default_value = "250")]
    tie_breaker_distance: f32,
    /// Cruising speed in km/h
    #[clap(long, default_value = "80")]
    max_speed: f32,
    #[clap(long, default_value = "4.5")]
    acceleration: f32,
    #[clap(long, default_value = "4.5")]
    deceleration: f32,
    #[clap(long)]
    hide_ai_cars: bool,
    #[clap(long, default_value = "Traffic")]
    name_prefix: String,
    /// Traffic further than this from every player is recycled
    #[clap(long, default_value = "200")]
    player_radius: f32,
    /// How far ahead of a player traffic appears
    #[clap(long, default_value = "100")]
    spawn_distance: f32,
    #[clap(long, default_value = "80")]
    spawn_safety_distance: f32,
    /// Replicas per traffic slot at startup
    #[clap(long, default_value = "1")]
    initial_overbooking: usize,
}

impl Args {
    fn traffic_config(&self) -> TrafficConfig {
        TrafficConfig {
            min_state_distance: self.min_state_distance,
            state_spawn_distance: self.state_spawn_distance,
            tie_breaker_distance: self.tie_breaker_distance,
            max_speed: self.max_speed * KMH_TO_MS,
            acceleration: self.acceleration,
            deceleration: self.deceleration,
            hide_ai_cars: self.hide_ai_cars,
            name_prefix: self.name_prefix.clone(),
            player_radius: self.player_radius,
            spawn_distance: self.spawn_distance,
            spawn_safety_distance_to_player: self.spawn_safety_distance,
            ..TrafficConfig::default()
        }
    }

    fn slot_modes(&self) -> Vec<AiMode> {
        (0..self.slots.min(u8::MAX as usize))
            .map(|index| {
                if index < self.fixed_slots {
                    AiMode::Fixed
                } else {
                    AiMode::Auto
                }
            })
            .collect()
    }
}

/// Parses command-line arguments, then runs the traffic loop and the network
/// server side by side.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = args.traffic_config();
    config.validate()?;

    let network = match &args.map {
        Some(path) => {
            info!("Loading lane map from {}", path.display());
            SplineNetwork::load(path)?
        }
        None => {
            info!("No lane map given, using the demo map");
            SplineNetwork::demo()
        }
    };

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // Outgoing packet queue, shared by slot events and the server
    let (game_tx, game_rx) = mpsc::unbounded_channel();
    let broadcaster = Arc::new(PacketBroadcaster::new(game_tx.clone()));

    let traffic = Arc::new(Traffic::new(
        Arc::new(config),
        Arc::new(network),
        &args.slot_modes(),
        broadcaster,
    ));
    if args.initial_overbooking > 1 {
        traffic.set_ai_overbooking(args.initial_overbooking);
    }

    let address = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f32(1.0 / args.tick_rate.max(1) as f32);
    let mut server = Server::new(
        &address,
        tick_duration,
        args.max_clients,
        Arc::clone(&traffic),
        game_tx,
        game_rx,
    )
    .await?;

    let traffic_handle = tokio::spawn(TickDriver::new(traffic, rng).run(args.tick_rate));
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server error: {}", e);
        }
    });

    // Handle shutdown gracefully
    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                error!("Network task panicked: {}", e);
            }
        }
        result = traffic_handle => {
            if let Err(e) = result {
                error!("Traffic loop task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
