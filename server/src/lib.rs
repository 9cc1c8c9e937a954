//! # Traffic Server Library
//!
//! This library provides the autonomous traffic behind a multiplayer racing
//! server. Simulated cars follow lanes of a spline network, react to the cars
//! around them, and are shown to every connected player through whichever
//! replica of each traffic identity is most relevant to them.
//!
//! ## Core Responsibilities
//!
//! ### Traffic Simulation
//! Each simulated car accelerates towards a target speed, follows its lane
//! with Catmull-Rom interpolation, and brakes, stops, honks, or gives up on
//! obstacles ahead of it. A car reaching the end of an open lane respawns at
//! the start of the network.
//!
//! ### Overbooking
//! A single traffic identity (a "slot") may be simulated in several places at
//! once. Each slot keeps a pool of replicas that grows immediately when more
//! are requested and shrinks lazily, one replica at a time, when fewer are.
//! Overlapping replicas driving the same way are pruned every tick.
//!
//! ### Player Views
//! Networking code asks every slot which replica a player should see. The
//! nearest wins; inside the tie-breaker radius, one travelling the player's
//! way is preferred so cars do not flip between lanes.
//!
//! ## Concurrency
//!
//! The tick loop and the network loop run on separate tasks and share the
//! traffic world through `Arc`. Every slot pool is guarded by its own
//! reader-writer lock with upgrade support, and every replica by its own
//! mutex. Locks are never held across two slots; obstacle detection reads a
//! snapshot of the world taken once per tick.
//!
//! ## Module Organization
//!
//! - `config`: tunables and their validation
//! - `spline`: the lane network, map loading, curve evaluation
//! - `vehicle`: one simulated replica, its kinematics and obstacle logic
//! - `state_pool`: the per-slot replica pool
//! - `slot`: a traffic identity and its AI/player lifecycle
//! - `broadcast`: how slot events leave the simulation
//! - `traffic`: the whole world and the tick driver
//! - `client_manager`: connected players and timeouts
//! - `network`: the UDP server
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use server::broadcast::NullBroadcaster;
//! use server::config::TrafficConfig;
//! use server::slot::AiMode;
//! use server::spline::SplineNetwork;
//! use server::traffic::{TickDriver, Traffic};
//! use std::sync::Arc;
//!
//! let traffic = Arc::new(Traffic::new(
//!     Arc::new(TrafficConfig::default()),
//!     Arc::new(SplineNetwork::demo()),
//!     &[AiMode::Fixed; 8],
//!     Arc::new(NullBroadcaster),
//! ));
//! traffic.set_ai_overbooking(3);
//!
//! let mut driver = TickDriver::new(Arc::clone(&traffic), StdRng::seed_from_u64(1));
//! for tick in 0..100 {
//!     driver.tick(tick * 50);
//! }
//! println!("{} cars on the road", traffic.active_state_count());
//! ```

pub mod broadcast;
pub mod client_manager;
pub mod config;
pub mod network;
pub mod slot;
pub mod spline;
pub mod state_pool;
pub mod traffic;
pub mod vehicle;
