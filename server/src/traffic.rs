//! The traffic world and the loop that drives it
//!
//! `Traffic` owns every slot plus the shared spline network and answers the
//! world-wide questions (who is where, is this spot free). `TickDriver` owns
//! the random generator and advances the whole world one tick at a time:
//!
//! 1. spawn pass: uninitialized states of simulated slots look for a spot,
//!    skipping players the slot already has a replica near
//! 2. kinematic update of every live state
//! 3. obstacle detection against a snapshot of the world
//! 4. pruning of overlapping replicas per slot
//! 5. despawn of replicas no player is near
//!
//! Slots are visited one at a time and no lock is held across slots.

use crate::broadcast::Broadcaster;
use crate::config::TrafficConfig;
use crate::slot::{AiMode, Slot};
use crate::spline::{PointRef, SplineNetwork};
use crate::vehicle::Obstacle;
use glam::Vec3;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::Rng;
use shared::CarStatus;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub struct Traffic {
    config: Arc<TrafficConfig>,
    network: Arc<SplineNetwork>,
    slots: Vec<Arc<Slot>>,
}

impl Traffic {
    /// Creates one slot per entry of `modes`, numbered from zero. Slots that
    /// may be simulated start under AI control.
    pub fn new(
        config: Arc<TrafficConfig>,
        network: Arc<SplineNetwork>,
        modes: &[AiMode],
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let slots: Vec<Arc<Slot>> = modes
            .iter()
            .enumerate()
            .map(|(session_id, mode)| {
                Arc::new(Slot::new(
                    session_id as u8,
                    *mode,
                    Arc::clone(&config),
                    Arc::clone(&broadcaster),
                ))
            })
            .collect();

        for slot in &slots {
            if slot.ai_mode() != AiMode::Disabled {
                slot.set_ai_control(true);
            }
        }

        Self {
            config,
            network,
            slots,
        }
    }

    pub fn config(&self) -> &TrafficConfig {
        &self.config
    }

    pub fn network(&self) -> &SplineNetwork {
        &self.network
    }

    pub fn slots(&self) -> &[Arc<Slot>] {
        &self.slots
    }

    pub fn slot(&self, session_id: u8) -> Option<&Arc<Slot>> {
        self.slots.get(session_id as usize)
    }

    fn simulated_slots(&self) -> impl Iterator<Item = &Arc<Slot>> {
        self.slots.iter().filter(|slot| slot.is_ai_controlled())
    }

    /// Applies an overbooking count to every simulated slot. Returns how many
    /// slots took it.
    pub fn set_ai_overbooking(&self, count: usize) -> usize {
        let mut applied = 0;
        for slot in self.simulated_slots() {
            slot.set_overbooking(count);
            applied += 1;
        }

        info!("AI overbooking set to {} on {} slots", count, applied);
        applied
    }

    /// Every car currently on the road, human or simulated.
    pub fn world_view(&self) -> Vec<Obstacle> {
        self.slots.iter().flat_map(|slot| slot.obstacles()).collect()
    }

    /// Latest reported status of each player that has sent one.
    pub fn human_players(&self) -> Vec<(u8, CarStatus)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.human_status().map(|status| (slot.session_id(), status)))
            .collect()
    }

    /// True when neither a live state nor a player is within the safety
    /// distance of `position`.
    pub fn is_position_safe(&self, position: Vec3) -> bool {
        let safety = self.config.safety_distance_squared();
        self.slots.iter().all(|slot| slot.is_position_safe(position))
            && self
                .human_players()
                .iter()
                .all(|(_, status)| status.position.distance_squared(position) >= safety)
    }

    pub fn active_state_count(&self) -> usize {
        self.slots.iter().map(|slot| slot.active_state_count()).sum()
    }

    /// Hands the first free slot a player may drive to a joining player.
    ///
    /// `taken` lists the slots other players already hold.
    pub fn claim_slot_for_player(&self, taken: &[u8]) -> Option<u8> {
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.ai_mode() != AiMode::Fixed && !taken.contains(&slot.session_id()))?;

        slot.set_ai_control(false);
        slot.clear_human_status();
        Some(slot.session_id())
    }

    /// Returns a player's slot to the simulation when its mode allows it.
    pub fn release_slot(&self, session_id: u8) {
        let Some(slot) = self.slot(session_id) else {
            return;
        };

        match slot.ai_mode() {
            AiMode::Auto | AiMode::Fixed => slot.set_ai_control(true),
            AiMode::Disabled => slot.clear_human_status(),
        }
    }

    /// What one player should see: the other players plus the best replica
    /// of every simulated slot for them.
    pub fn view_for_player(&self, session_id: u8) -> Vec<(u8, CarStatus)> {
        let me = self
            .slot(session_id)
            .and_then(|slot| slot.human_status())
            .unwrap_or_default();

        let mut cars = Vec::new();
        for slot in &self.slots {
            if slot.session_id() == session_id {
                continue;
            }

            if slot.is_ai_controlled() {
                if let Some(state) = slot.best_state_for_player(&me) {
                    let status = *state.lock().status();
                    cars.push((slot.session_id(), status));
                }
            } else if let Some(status) = slot.human_status() {
                cars.push((slot.session_id(), status));
            }
        }

        cars
    }
}

/// Counts from one tick, mostly for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub spawned: usize,
    pub removed: usize,
    pub despawned: usize,
}

pub struct TickDriver {
    traffic: Arc<Traffic>,
    rng: StdRng,
    tick: u64,
}

impl TickDriver {
    pub fn new(traffic: Arc<Traffic>, rng: StdRng) -> Self {
        Self {
            traffic,
            rng,
            tick: 0,
        }
    }

    pub fn traffic(&self) -> &Arc<Traffic> {
        &self.traffic
    }

    /// Advances the world to `now` (milliseconds on the driver's clock).
    pub fn tick(&mut self, now: u64) -> TickReport {
        let traffic = Arc::clone(&self.traffic);
        let network = traffic.network();

        let spawned = self.spawn_pass(&traffic, now);

        for slot in traffic.simulated_slots() {
            slot.pool().update(network, now);
        }

        let world = traffic.world_view();
        for slot in traffic.simulated_slots() {
            slot.pool().detect_obstacles(&world, now, &mut self.rng);
        }

        let removed = traffic
            .simulated_slots()
            .map(|slot| slot.pool().remove_unsafe_states())
            .sum();

        let players: Vec<Vec3> = traffic
            .human_players()
            .iter()
            .map(|(_, status)| status.position)
            .collect();
        let despawned = traffic
            .simulated_slots()
            .map(|slot| slot.pool().despawn_far_from(&players, now))
            .sum();

        self.tick += 1;
        TickReport {
            spawned,
            removed,
            despawned,
        }
    }

    fn spawn_pass(&mut self, traffic: &Traffic, now: u64) -> usize {
        let config = traffic.config();
        let network = traffic.network();
        let players = traffic.human_players();
        let mut spawned = 0;

        for slot in traffic.simulated_slots() {
            for state in slot.states() {
                if state.lock().is_initialized() {
                    continue;
                }

                let player = self.pick_player(&players);
                if let Some(player) = &player {
                    if serves_player(slot, player.position, config) {
                        continue;
                    }
                }

                let Some(point) = self.pick_spawn_point(network, config, player.as_ref()) else {
                    continue;
                };
                let Some(position) = network.position(point) else {
                    continue;
                };

                if !slot.can_spawn_ai_state(position, &state) || !traffic.is_position_safe(position)
                {
                    continue;
                }

                let protection = self
                    .rng
                    .gen_range(config.min_spawn_protection_ms..=config.max_spawn_protection_ms);
                if state.lock().spawn(network, point, config, now, protection) {
                    spawned += 1;
                }
            }
        }

        spawned
    }

    fn pick_player(&mut self, players: &[(u8, CarStatus)]) -> Option<CarStatus> {
        if players.is_empty() {
            return None;
        }
        Some(players[self.rng.gen_range(0..players.len())].1)
    }

    /// Somewhere ahead of `player`, or anywhere when nobody plays.
    fn pick_spawn_point(
        &mut self,
        network: &SplineNetwork,
        config: &TrafficConfig,
        player: Option<&CarStatus>,
    ) -> Option<PointRef> {
        let Some(player) = player else {
            return Some(network.random_point(&mut self.rng));
        };

        let closest = network.closest_point(player.position)?;
        let point = network.walk(closest, config.spawn_distance);
        let position = network.position(point)?;

        (position.distance_squared(player.position)
            >= config.spawn_safety_distance_to_player_squared())
        .then_some(point)
    }

    /// Ticks forever at `tick_rate` Hz.
    pub async fn run(mut self, tick_rate: u32) {
        let mut tick_interval = interval(Duration::from_secs_f32(1.0 / tick_rate.max(1) as f32));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let started = Instant::now();
        info!("Traffic loop running at {} Hz", tick_rate);

        loop {
            tick_interval.tick().await;

            let now = started.elapsed().as_millis() as u64;
            let report = self.tick(now);

            if self.tick % 300 == 0 {
                debug!(
                    "Tick {}: {} live states, last tick {:?}",
                    self.tick,
                    self.traffic.active_state_count(),
                    report
                );
            }
        }
    }
}

/// True when the slot already has a live replica within reach of a player
/// at `position`.
fn serves_player(slot: &Slot, position: Vec3, config: &TrafficConfig) -> bool {
    slot.closest_ai_state(position).map_or(false, |(state, distance)| {
        distance < config.player_radius_squared() && state.lock().is_initialized()
    })
}
