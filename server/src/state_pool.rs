//! Concurrency-safe pool of simulated replicas for one traffic slot
//!
//! The pool is guarded by a single reader-writer lock:
//! - iteration (tick updates, obstacle detection, player queries) takes a
//!   recursive read lock, so a reader may re-enter read paths freely
//! - structural changes (adding, removing, resetting states) take the write lock
//! - check-then-mutate paths take an upgradable read and only upgrade when a
//!   mutation is actually needed
//!
//! Each state sits behind its own mutex so the tick can move states while the
//! pool itself is only read-locked. Locks are always taken pool first, state
//! second, and no method here is ever called while holding a state mutex or
//! another pool's lock.

use crate::broadcast::{Broadcaster, SlotEvent};
use crate::config::TrafficConfig;
use crate::spline::SplineNetwork;
use crate::vehicle::{Obstacle, VehicleState};
use glam::Vec3;
use log::{debug, trace};
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use rand::Rng;
use shared::CarStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Handle to one replica, shared between the pool and its callers.
pub type SharedState = Arc<Mutex<VehicleState>>;

/// Squared speed a player needs before direction matters for tie-breaking.
const TIE_BREAK_MIN_SPEED_SQUARED: f32 = 1.0;

pub struct StatePool {
    session_id: u8,
    config: Arc<TrafficConfig>,
    broadcaster: Arc<dyn Broadcaster>,
    states: RwLock<Vec<SharedState>>,
    /// Desired overbooking; the pool converges to it lazily.
    target_count: AtomicUsize,
}

impl StatePool {
    pub fn new(
        session_id: u8,
        config: Arc<TrafficConfig>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            session_id,
            config,
            broadcaster,
            states: RwLock::new(Vec::new()),
            target_count: AtomicUsize::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.states.read_recursive().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read_recursive().is_empty()
    }

    pub fn target_count(&self) -> usize {
        self.target_count.load(Ordering::Acquire)
    }

    /// Copy of the current handles; the pool may change right after.
    pub fn states(&self) -> Vec<SharedState> {
        self.states.read_recursive().clone()
    }

    pub fn active_count(&self) -> usize {
        self.states
            .read_recursive()
            .iter()
            .filter(|state| state.lock().is_initialized())
            .count()
    }

    /// Replaces every state with a single fresh one.
    pub fn reset(&self) {
        let mut states = self.states.write();
        states.clear();
        states.push(self.new_state());
    }

    fn new_state(&self) -> SharedState {
        Arc::new(Mutex::new(VehicleState::new(self.session_id, &self.config)))
    }

    /// Grows the pool to `count` immediately; shrinking is left to
    /// `can_spawn_ai_state`.
    pub fn set_overbooking(&self, count: usize) {
        let states = self.states.upgradable_read();

        if count > states.len() {
            let mut states = RwLockUpgradableReadGuard::upgrade(states);
            let missing = count - states.len();
            for _ in 0..missing {
                let state = self.new_state();
                states.push(state);
            }
            self.target_count.store(count, Ordering::Release);
            return;
        }

        self.target_count.store(count, Ordering::Release);
    }

    /// Decides whether `state` may be placed at `spawn_point`.
    ///
    /// A state sitting beyond the target count is removed here instead, and
    /// emptying the pool announces the slot as disconnected. Otherwise the
    /// spawn is refused when any sibling is within the spawn clearance.
    /// The caller must not hold `state`'s mutex.
    pub fn can_spawn_ai_state(&self, spawn_point: Vec3, state: &SharedState) -> bool {
        let states = self.states.upgradable_read();

        if let Some(index) = states.iter().position(|s| Arc::ptr_eq(s, state)) {
            if index >= self.target_count() {
                let mut states = RwLockUpgradableReadGuard::upgrade(states);
                states.remove(index);
                let now_empty = states.is_empty();
                drop(states);

                trace!(
                    "Removed state of Traffic {} due to overbooking reduction",
                    self.session_id
                );

                if now_empty {
                    trace!("Traffic {} has no states left, disconnecting", self.session_id);
                    self.broadcaster
                        .notify(self.session_id, SlotEvent::Disconnected);
                }

                return false;
            }
        }

        let clearance = self.config.state_spawn_distance_squared();
        for other in states.iter() {
            if Arc::ptr_eq(other, state) {
                continue;
            }

            let other = other.lock();
            if other.is_initialized() && other.position().distance_squared(spawn_point) < clearance
            {
                return false;
            }
        }

        true
    }

    /// Deinitializes one of every pair of live states that overlap while
    /// heading the same way. Returns how many were taken off the network.
    pub fn remove_unsafe_states(&self) -> usize {
        let states = self.states.read_recursive();
        let snapshot: Vec<(bool, Vec3, Vec3)> = states
            .iter()
            .map(|state| {
                let state = state.lock();
                (state.is_initialized(), state.position(), state.velocity())
            })
            .collect();

        let min_distance = self.config.min_state_distance_squared();
        let mut live: Vec<bool> = snapshot.iter().map(|(initialized, _, _)| *initialized).collect();

        for i in 0..snapshot.len() {
            if !live[i] {
                continue;
            }

            let (_, position, velocity) = snapshot[i];
            let duplicate = (0..snapshot.len()).any(|j| {
                let (_, other_position, other_velocity) = snapshot[j];
                i != j
                    && live[j]
                    && position.distance_squared(other_position) < min_distance
                    && velocity.dot(other_velocity) > 0.0
            });

            if duplicate {
                live[i] = false;
            }
        }

        let mut removed = 0;
        for (i, state) in states.iter().enumerate() {
            if snapshot[i].0 && !live[i] {
                state.lock().deinitialize();
                removed += 1;
                debug!("Removed close state from Traffic {}", self.session_id);
            }
        }

        removed
    }

    /// Picks the replica a given player should see.
    ///
    /// Nearest wins, except when both the current pick and the candidate are
    /// inside the tie-breaker radius of a moving player: then a candidate
    /// travelling the player's way beats one that is not.
    pub fn best_state_for_player(&self, player: &CarStatus) -> Option<SharedState> {
        let states = self.states.read_recursive();
        let tie_breaker = self.config.tie_breaker_distance_squared();
        let player_moving = player.velocity.length_squared() > TIE_BREAK_MIN_SPEED_SQUARED;

        let mut best: Option<(&SharedState, Vec3)> = None;
        let mut min_distance = f32::MAX;

        for handle in states.iter() {
            let (position, velocity) = {
                let state = handle.lock();
                if !state.is_initialized() {
                    continue;
                }
                (state.position(), state.velocity())
            };

            let distance = position.distance_squared(player.position);
            let best_same_direction =
                matches!(best, Some((_, best_velocity)) if best_velocity.dot(player.velocity) > 0.0);
            let candidate_same_direction = velocity.dot(player.velocity) > 0.0;
            let tie_break = min_distance < tie_breaker && distance < tie_breaker && player_moving;

            if (tie_break && candidate_same_direction && (distance < min_distance || !best_same_direction))
                || (!tie_break && distance < min_distance)
            {
                best = Some((handle, velocity));
                min_distance = distance;
            }
        }

        best.map(|(handle, _)| Arc::clone(handle))
    }

    /// Nearest state regardless of initialization, with its squared distance.
    pub fn closest_state(&self, position: Vec3) -> Option<(SharedState, f32)> {
        let states = self.states.read_recursive();
        let mut closest = None;
        let mut min_distance = f32::MAX;

        for handle in states.iter() {
            let distance = handle.lock().position().distance_squared(position);
            if distance < min_distance {
                min_distance = distance;
                closest = Some(Arc::clone(handle));
            }
        }

        closest.map(|state| (state, min_distance))
    }

    /// True when no live state is within the safety distance of `position`.
    pub fn is_position_safe(&self, position: Vec3) -> bool {
        let safety = self.config.safety_distance_squared();
        !self.states.read_recursive().iter().any(|state| {
            let state = state.lock();
            state.is_initialized() && state.position().distance_squared(position) < safety
        })
    }

    pub fn update(&self, network: &SplineNetwork, now: u64) {
        for state in self.states.read_recursive().iter() {
            state.lock().update(network, &self.config, now);
        }
    }

    pub fn detect_obstacles(&self, world: &[Obstacle], now: u64, rng: &mut impl Rng) {
        for state in self.states.read_recursive().iter() {
            state.lock().detect_obstacles(world, &self.config, now, rng);
        }
    }

    /// Snapshot of the live states for obstacle detection.
    pub fn obstacles(&self) -> Vec<Obstacle> {
        self.states
            .read_recursive()
            .iter()
            .filter_map(|state| {
                let state = state.lock();
                state.is_initialized().then(|| state.obstacle())
            })
            .collect()
    }

    /// Statuses of the live states.
    pub fn statuses(&self) -> Vec<CarStatus> {
        self.states
            .read_recursive()
            .iter()
            .filter_map(|state| {
                let state = state.lock();
                state.is_initialized().then(|| *state.status())
            })
            .collect()
    }

    /// Takes live, unprotected states with no player nearby off the network.
    pub fn despawn_far_from(&self, players: &[Vec3], now: u64) -> usize {
        if players.is_empty() {
            return 0;
        }

        let radius = self.config.player_radius_squared();
        let mut despawned = 0;

        for state in self.states.read_recursive().iter() {
            let mut state = state.lock();
            if !state.is_initialized() || state.is_spawn_protected(now) {
                continue;
            }

            let near_player = players
                .iter()
                .any(|player| player.distance_squared(state.position()) < radius);
            if !near_player {
                state.deinitialize();
                despawned += 1;
            }
        }

        despawned
    }
}
