//! Kinematics and obstacle handling for one simulated car replica
//!
//! A `VehicleState` rides along a lane of the spline network. Each tick it
//! integrates its speed toward a target, advances along the lane and samples
//! a smooth Catmull-Rom position from the current segment. Obstacle detection
//! runs as a separate pass against a snapshot of every live car and only ever
//! changes the target speed; the next kinematic step acts on it.
//!
//! Time is passed in explicitly as milliseconds since server start, so the
//! whole module is deterministic under test.

use crate::config::TrafficConfig;
use crate::spline::{catmull_rom, PointRef, SplineNetwork};
use glam::{Vec2, Vec3};
use log::debug;
use rand::Rng;
use shared::{CarStatus, StatusFlags};
use std::f32::consts::{FRAC_PI_2, PI};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

const FORWARD_CONE: (f32, f32) = (165.0, 195.0);
const STANDSTILL_SPEED: f32 = 0.1;
const BRAKE_DISTANCE_FACTOR: f32 = 1.5;
const HONK_DELAY_MS: (u64, u64) = (3000, 7000);
const HONK_LENGTH_MS: (u64, u64) = (500, 1500);
const GEAR: u8 = 2;

/// Identifies a car in the obstacle snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleId {
    Human(u8),
    Simulated(u64),
}

/// What obstacle detection needs to know about another car.
#[derive(Debug, Clone, Copy)]
pub struct Obstacle {
    pub id: VehicleId,
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Advancing ran past the last usable segment of an open lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathEnd;

#[derive(Debug)]
pub struct VehicleState {
    id: u64,
    session_id: u8,
    initialized: bool,

    current_point: Option<PointRef>,
    segment_length: f32,
    segment_progress: f32,
    start_tangent: Vec3,
    end_tangent: Vec3,

    status: CarStatus,
    speed: f32,
    target_speed: f32,
    acceleration: f32,

    stopped_for_obstacle: bool,
    stopped_since: u64,
    honk_start: u64,
    honk_end: u64,
    ignore_obstacles_until: u64,
    spawn_protection_until: u64,
    last_tick: u64,
}

impl VehicleState {
    pub fn new(session_id: u8, config: &TrafficConfig) -> Self {
        Self {
            id: NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed),
            session_id,
            initialized: false,
            current_point: None,
            segment_length: 0.0,
            segment_progress: 0.0,
            start_tangent: Vec3::ZERO,
            end_tangent: Vec3::ZERO,
            status: CarStatus::default(),
            speed: config.max_speed,
            target_speed: config.max_speed,
            acceleration: 0.0,
            stopped_for_obstacle: false,
            stopped_since: 0,
            honk_start: 0,
            honk_end: 0,
            ignore_obstacles_until: 0,
            spawn_protection_until: 0,
            last_tick: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn vehicle_id(&self) -> VehicleId {
        VehicleId::Simulated(self.id)
    }

    pub fn session_id(&self) -> u8 {
        self.session_id
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Takes the replica off the network; it stays in its pool and is
    /// placed again by the next spawn pass.
    pub fn deinitialize(&mut self) {
        self.initialized = false;
        self.stopped_for_obstacle = false;
    }

    pub fn status(&self) -> &CarStatus {
        &self.status
    }

    pub fn position(&self) -> Vec3 {
        self.status.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.status.velocity
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn target_speed(&self) -> f32 {
        self.target_speed
    }

    pub fn acceleration(&self) -> f32 {
        self.acceleration
    }

    pub fn current_point(&self) -> Option<PointRef> {
        self.current_point
    }

    pub fn segment_progress(&self) -> f32 {
        self.segment_progress
    }

    pub fn segment_length(&self) -> f32 {
        self.segment_length
    }

    pub fn is_stopped_for_obstacle(&self) -> bool {
        self.stopped_for_obstacle
    }

    pub fn ignore_obstacles_until(&self) -> u64 {
        self.ignore_obstacles_until
    }

    pub fn honk_window(&self) -> (u64, u64) {
        (self.honk_start, self.honk_end)
    }

    pub fn is_spawn_protected(&self, now: u64) -> bool {
        now < self.spawn_protection_until
    }

    pub fn obstacle(&self) -> Obstacle {
        Obstacle {
            id: self.vehicle_id(),
            position: self.status.position,
            velocity: self.status.velocity,
        }
    }

    /// Places the replica at the start of the segment beginning at `point`.
    ///
    /// Refused when the point does not exist or has no forward segment.
    pub fn teleport(&mut self, network: &SplineNetwork, point: PointRef) -> bool {
        let (Some(length), Some((start, end))) =
            (network.segment_length(point), network.tangents(point))
        else {
            return false;
        };

        self.current_point = Some(point);
        self.segment_length = length;
        self.segment_progress = 0.0;
        self.start_tangent = start;
        self.end_tangent = end;
        true
    }

    /// Teleports and brings the replica to life at cruising speed.
    pub fn spawn(
        &mut self,
        network: &SplineNetwork,
        point: PointRef,
        config: &TrafficConfig,
        now: u64,
        spawn_protection_ms: u64,
    ) -> bool {
        if !self.teleport(network, point) {
            return false;
        }

        self.initialized = true;
        self.last_tick = now;
        self.speed = config.max_speed;
        self.target_speed = config.max_speed;
        self.acceleration = 0.0;
        self.stopped_for_obstacle = false;
        self.ignore_obstacles_until = 0;
        self.spawn_protection_until = now + spawn_protection_ms;
        self.refresh_status(network, config, now);
        true
    }

    /// Moves `meters` further along the lane.
    ///
    /// Fails without side effects when the move would need a segment past the
    /// end of an open lane; the caller decides where to respawn.
    pub fn advance(&mut self, network: &SplineNetwork, meters: f32) -> Result<(), PathEnd> {
        let Some(mut point) = self.current_point else {
            return Err(PathEnd);
        };
        let mut length = self.segment_length;
        let mut progress = self.segment_progress + meters;

        while progress >= length {
            let next = network.next(point).ok_or(PathEnd)?;
            let next_length = network.segment_length(next).ok_or(PathEnd)?;

            progress -= length;
            point = next;
            length = next_length;
        }

        let (start, end) = network.tangents(point).ok_or(PathEnd)?;
        self.current_point = Some(point);
        self.segment_length = length;
        self.segment_progress = progress.max(0.0);
        self.start_tangent = start;
        self.end_tangent = end;
        Ok(())
    }

    /// One kinematic step up to `now`.
    pub fn update(&mut self, network: &SplineNetwork, config: &TrafficConfig, now: u64) {
        if !self.initialized {
            return;
        }

        let dt = now.saturating_sub(self.last_tick) as f32 / 1000.0;
        self.last_tick = now;

        if self.acceleration != 0.0 {
            self.speed += self.acceleration * dt;

            if (self.acceleration < 0.0 && self.speed < self.target_speed)
                || (self.acceleration > 0.0 && self.speed > self.target_speed)
            {
                self.speed = self.target_speed;
                self.acceleration = 0.0;
            }
        }

        let move_meters = self.speed * dt;
        if self.advance(network, move_meters).is_err() {
            debug!("Traffic {} reached spline end, respawning", self.session_id);
            self.teleport(network, network.origin());
        }

        self.refresh_status(network, config, now);
    }

    /// Recomputes the outgoing snapshot from the current spline position.
    pub fn refresh_status(&mut self, network: &SplineNetwork, config: &TrafficConfig, now: u64) {
        let Some(point) = self.current_point else {
            return;
        };
        let (Some(start), Some(end)) = (
            network.position(point),
            network.next(point).and_then(|next| network.position(next)),
        ) else {
            return;
        };

        let t = if self.segment_length > 0.0 {
            self.segment_progress / self.segment_length
        } else {
            0.0
        };
        let sample = catmull_rom(start, end, self.start_tangent, self.end_tangent, t);
        let tangent = sample.tangent;

        let rotation = Vec3::new(
            tangent.z.atan2(tangent.x) - FRAC_PI_2,
            -(Vec2::new(tangent.z, tangent.x).length().atan2(tangent.y) - FRAC_PI_2),
            0.0,
        );

        let speed_ratio = (self.speed / config.max_speed).clamp(0.0, 1.0);
        let rpm_range = config.max_engine_rpm.saturating_sub(config.idle_engine_rpm) as f32;
        let engine_rpm = config.idle_engine_rpm + (rpm_range * speed_ratio) as u16;
        let tyre_angular_speed =
            (100.0 + tyre_angular_speed(self.speed, config.wheel_diameter)).min(u8::MAX as f32) as u8;

        self.status = CarStatus {
            position: sample.position,
            rotation,
            velocity: tangent * self.speed,
            speed: self.speed,
            tyre_angular_speed,
            engine_rpm,
            gear: GEAR,
            status_flags: self.status_flags(config, now),
            timestamp: now,
        };
    }

    fn status_flags(&self, config: &TrafficConfig, now: u64) -> StatusFlags {
        let mut flags = StatusFlags::LIGHTS_ON | StatusFlags::HIGH_BEAMS_OFF;

        if self.speed < config.hazard_speed {
            flags |= StatusFlags::HAZARDS_ON;
        }
        if self.speed == 0.0 || self.acceleration < 0.0 {
            flags |= StatusFlags::BRAKE_LIGHTS_ON;
        }
        if self.stopped_for_obstacle && now > self.honk_start && now < self.honk_end {
            flags |= StatusFlags::HORN;
        }

        flags
    }

    pub fn set_target_speed(&mut self, speed: f32, config: &TrafficConfig) {
        self.target_speed = speed;
        self.acceleration = if speed < self.speed {
            -config.deceleration
        } else if speed > self.speed {
            config.acceleration
        } else {
            0.0
        };
    }

    /// Distance needed to go from the current speed to `target_speed` at
    /// the configured deceleration.
    pub fn braking_distance(&self, target_speed: f32, config: &TrafficConfig) -> f32 {
        braking_distance(self.speed, target_speed, config.deceleration)
    }

    /// Bearing from this car to `position`, offset by our heading, in
    /// degrees. A car dead ahead reads 180.
    pub fn angle_to(&self, position: Vec3) -> f32 {
        let own = self.status.position;
        let mut angle = (own.x - position.x).atan2(own.z - position.z) * 180.0 / PI;
        if angle < 0.0 {
            angle += 360.0;
        }

        (angle + self.status.rotation_angle()) % 360.0
    }

    /// Adjusts the target speed for whatever is ahead and runs the
    /// stop/honk/give-up bookkeeping.
    pub fn detect_obstacles(
        &mut self,
        world: &[Obstacle],
        config: &TrafficConfig,
        now: u64,
        rng: &mut impl Rng,
    ) {
        if !self.initialized {
            return;
        }

        if now < self.ignore_obstacles_until {
            self.set_target_speed(config.max_speed, config);
            return;
        }

        let own_id = self.vehicle_id();
        let mut min_speed = config.max_speed;
        let mut has_obstacle = false;

        for other in world.iter().filter(|other| other.id != own_id) {
            if !is_in_forward_cone(self.angle_to(other.position)) {
                continue;
            }

            let distance = other.position.distance(self.status.position);
            if distance < config.obstacle_min_distance {
                min_speed = 0.0;
                has_obstacle = true;
                continue;
            }

            let raw_speed = other.velocity.length();
            let standing = raw_speed < STANDSTILL_SPEED;
            // Someone crawling might be turning around, plan as if they were
            // barely moving.
            let other_speed = if raw_speed < config.obstacle_slow_speed {
                config.obstacle_crawl_speed
            } else {
                raw_speed
            };

            if (standing || other_speed + 1.0 < self.speed)
                && distance
                    < self.braking_distance(other_speed, config) * BRAKE_DISTANCE_FACTOR
                        + config.obstacle_margin
            {
                min_speed = min_speed.min(other_speed.max(config.obstacle_crawl_speed));
                has_obstacle = true;
            }
        }

        if self.speed == 0.0 && !self.stopped_for_obstacle && has_obstacle {
            self.stopped_for_obstacle = true;
            self.stopped_since = now;
            self.honk_start = now + rng.gen_range(HONK_DELAY_MS.0..HONK_DELAY_MS.1);
            self.honk_end = self.honk_start + rng.gen_range(HONK_LENGTH_MS.0..HONK_LENGTH_MS.1);
            debug!("Traffic {} stopped for obstacle", self.session_id);
        } else if self.stopped_for_obstacle && !has_obstacle {
            self.stopped_for_obstacle = false;
            debug!("Traffic {} no longer stopped for obstacle", self.session_id);
        }

        if self.stopped_for_obstacle
            && now.saturating_sub(self.stopped_since) > config.stopped_ignore_after_ms
        {
            self.ignore_obstacles_until = now + config.ignore_obstacles_for_ms;
            debug!(
                "Traffic {} ignoring obstacles until {}",
                self.session_id, self.ignore_obstacles_until
            );
        }

        self.set_target_speed(min_speed, config);
    }
}

pub fn is_in_forward_cone(angle: f32) -> bool {
    angle > FORWARD_CONE.0 && angle < FORWARD_CONE.1
}

pub fn braking_distance(current_speed: f32, target_speed: f32, deceleration: f32) -> f32 {
    ((target_speed - current_speed).powi(2) / (2.0 * deceleration)).abs()
}

/// Wheel rotation value for telemetry only.
pub fn tyre_angular_speed(speed: f32, wheel_diameter: f32) -> f32 {
    speed / (PI * wheel_diameter) * 6.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spline::Spline;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Straight lane along +z with a point every 10 m.
    fn straight(count: usize) -> SplineNetwork {
        let points = (0..count)
            .map(|i| Vec3::new(0.0, 0.0, i as f32 * 10.0))
            .collect();
        SplineNetwork::new(vec![Spline::new(points, false)]).unwrap()
    }

    fn spawned(network: &SplineNetwork, config: &TrafficConfig, point: usize) -> VehicleState {
        let mut state = VehicleState::new(1, config);
        assert!(state.spawn(network, PointRef::new(0, point), config, 0, 0));
        state
    }

    fn obstacle_ahead(state: &VehicleState, distance: f32, velocity: Vec3) -> Obstacle {
        Obstacle {
            id: VehicleId::Human(9),
            position: state.position() + Vec3::new(0.0, 0.0, distance),
            velocity,
        }
    }

    #[test]
    fn test_teleport_refuses_points_without_segment() {
        let network = straight(4);
        let config = TrafficConfig::default();
        let mut state = VehicleState::new(1, &config);

        assert!(!state.teleport(&network, PointRef::new(0, 3)));
        assert!(!state.teleport(&network, PointRef::new(5, 0)));
        assert!(!state.teleport(&network, PointRef::new(0, 42)));
        assert_eq!(state.current_point(), None);

        assert!(state.teleport(&network, PointRef::new(0, 1)));
        assert_eq!(state.current_point(), Some(PointRef::new(0, 1)));
        assert_eq!(state.segment_progress(), 0.0);
        assert_approx_eq!(state.segment_length(), 10.0);
    }

    #[test]
    fn test_advance_within_segment() {
        let network = straight(5);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 0);

        assert_eq!(state.advance(&network, 4.0), Ok(()));
        assert_eq!(state.current_point(), Some(PointRef::new(0, 0)));
        assert_approx_eq!(state.segment_progress(), 4.0);
    }

    #[test]
    fn test_advance_lands_on_segment_after_next() {
        let network = straight(6);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 0);
        state.advance(&network, 3.0).unwrap();

        // Remaining 7 m, one full 10 m segment, then 2.5 m extra
        assert_eq!(state.advance(&network, 7.0 + 10.0 + 2.5), Ok(()));
        assert_eq!(state.current_point(), Some(PointRef::new(0, 2)));
        assert_approx_eq!(state.segment_progress(), 2.5, 1e-4);
    }

    #[test]
    fn test_advance_past_end_fails_without_moving() {
        let network = straight(4);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 1);

        assert_eq!(state.advance(&network, 25.0), Err(PathEnd));
        assert_eq!(state.current_point(), Some(PointRef::new(0, 1)));
        assert_eq!(state.segment_progress(), 0.0);
    }

    #[test]
    fn test_advance_wraps_on_closed_lane() {
        let points = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::new(10.0, 0.0, 10.0),
            Vec3::new(10.0, 0.0, 0.0),
        ];
        let network = SplineNetwork::new(vec![Spline::new(points, true)]).unwrap();
        let config = TrafficConfig::default();
        let mut state = VehicleState::new(1, &config);
        assert!(state.spawn(&network, PointRef::new(0, 3), &config, 0, 0));

        assert_eq!(state.advance(&network, 25.0), Ok(()));
        assert_eq!(state.current_point(), Some(PointRef::new(0, 1)));
        assert_approx_eq!(state.segment_progress(), 5.0, 1e-4);
    }

    #[test]
    fn test_update_respawns_at_origin_on_path_end() {
        let network = straight(4);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 2);

        // 22 m/s for 2 s runs well past the last segment
        state.update(&network, &config, 2000);

        assert!(state.is_initialized());
        assert_eq!(state.current_point(), Some(network.origin()));
        assert_eq!(state.segment_progress(), 0.0);
        assert_approx_eq!(state.position().z, 0.0, 1e-4);
    }

    #[test]
    fn test_update_moves_and_fills_status() {
        let network = straight(20);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 0);

        state.update(&network, &config, 1000);

        assert_approx_eq!(state.position().z, config.max_speed, 1e-3);
        assert_approx_eq!(state.velocity().z, config.max_speed, 1e-3);
        assert!(state.status().rotation.x.abs() < 1e-4);
        assert_eq!(state.status().engine_rpm, config.max_engine_rpm);
        assert_eq!(state.status().gear, 2);
        assert_eq!(state.status().timestamp, 1000);
        assert!(state.status().status_flags.contains(StatusFlags::LIGHTS_ON));
        assert!(!state.status().status_flags.contains(StatusFlags::HAZARDS_ON));
        assert!(!state.status().status_flags.contains(StatusFlags::BRAKE_LIGHTS_ON));
    }

    #[test]
    fn test_uninitialized_state_does_not_move() {
        let network = straight(4);
        let config = TrafficConfig::default();
        let mut state = VehicleState::new(1, &config);
        state.update(&network, &config, 5000);
        assert_eq!(state.current_point(), None);
        assert_eq!(state.position(), Vec3::ZERO);
    }

    #[test]
    fn test_segment_progress_invariant_over_many_ticks() {
        let network = SplineNetwork::demo();
        let config = TrafficConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut state = VehicleState::new(1, &config);
        assert!(state.spawn(&network, network.random_point(&mut rng), &config, 0, 0));

        let mut now = 0;
        for _ in 0..2000 {
            now += rng.gen_range(1..250);
            state.update(&network, &config, now);
            assert!(state.segment_progress() >= 0.0);
            assert!(state.segment_progress() < state.segment_length());
        }
    }

    #[test]
    fn test_set_target_speed_picks_acceleration() {
        let network = straight(4);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 0);

        state.set_target_speed(0.0, &config);
        assert_eq!(state.acceleration(), -config.deceleration);

        state.set_target_speed(config.max_speed + 5.0, &config);
        assert_eq!(state.acceleration(), config.acceleration);

        state.set_target_speed(state.speed(), &config);
        assert_eq!(state.acceleration(), 0.0);
    }

    #[test]
    fn test_speed_snaps_to_target_without_overshoot() {
        let network = straight(100);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 0);

        state.set_target_speed(20.0, &config);
        // 4.5 m/s² over a full second would undershoot 20 m/s
        state.update(&network, &config, 1000);
        assert_eq!(state.speed(), 20.0);
        assert_eq!(state.acceleration(), 0.0);
    }

    #[test]
    fn test_braking_distance_closed_form() {
        assert_approx_eq!(braking_distance(20.0, 0.0, 4.5), 400.0 / 9.0, 1e-3);
        assert_approx_eq!(braking_distance(0.0, 20.0, 4.5), 400.0 / 9.0, 1e-3);
        assert_approx_eq!(braking_distance(10.0, 4.0, 3.0), 6.0, 1e-4);
        assert_eq!(braking_distance(7.0, 7.0, 4.5), 0.0);
    }

    #[test]
    fn test_forward_cone_bounds() {
        assert!(is_in_forward_cone(180.0));
        assert!(is_in_forward_cone(170.0));
        assert!(!is_in_forward_cone(160.0));
        assert!(!is_in_forward_cone(200.0));
        assert!(!is_in_forward_cone(0.0));
    }

    #[test]
    fn test_angle_to_positions_around_car() {
        let network = straight(20);
        let config = TrafficConfig::default();
        let state = spawned(&network, &config, 5);
        let own = state.position();

        assert_approx_eq!(state.angle_to(own + Vec3::new(0.0, 0.0, 30.0)), 180.0, 1e-3);
        assert!(!is_in_forward_cone(state.angle_to(own - Vec3::new(0.0, 0.0, 30.0))));

        for bearing in [160.0_f32, 200.0] {
            let rad = bearing.to_radians();
            let other = own - Vec3::new(rad.sin(), 0.0, rad.cos()) * 30.0;
            let angle = state.angle_to(other);
            assert_approx_eq!(angle, bearing, 1e-2);
            assert!(!is_in_forward_cone(angle));
        }
    }

    #[test]
    fn test_angle_to_follows_heading() {
        let points = (0..10).map(|i| Vec3::new(i as f32 * 10.0, 0.0, 0.0)).collect();
        let network = SplineNetwork::new(vec![Spline::new(points, false)]).unwrap();
        let config = TrafficConfig::default();
        let mut state = VehicleState::new(1, &config);
        assert!(state.spawn(&network, PointRef::new(0, 2), &config, 0, 0));

        let ahead = state.position() + Vec3::new(25.0, 0.0, 0.0);
        assert_approx_eq!(state.angle_to(ahead), 180.0, 1e-2);
    }

    #[test]
    fn test_hard_stop_for_close_obstacle() {
        let network = straight(20);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 5);
        let mut rng = StdRng::seed_from_u64(1);

        let world = [obstacle_ahead(&state, 8.0, Vec3::new(0.0, 0.0, 30.0))];
        state.detect_obstacles(&world, &config, 100, &mut rng);

        assert_eq!(state.target_speed(), 0.0);
        assert!(state.acceleration() < 0.0);
    }

    #[test]
    fn test_brakes_for_slow_car_inside_braking_distance() {
        let network = straight(20);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 5);
        let mut rng = StdRng::seed_from_u64(1);

        // Parked car 50 m ahead; braking from 22 m/s to crawl needs more
        let world = [obstacle_ahead(&state, 50.0, Vec3::ZERO)];
        state.detect_obstacles(&world, &config, 100, &mut rng);
        assert_approx_eq!(state.target_speed(), config.obstacle_crawl_speed);

        // Same car well beyond the braking envelope is ignored
        let world = [obstacle_ahead(&state, 150.0, Vec3::ZERO)];
        state.detect_obstacles(&world, &config, 200, &mut rng);
        assert_eq!(state.target_speed(), config.max_speed);
    }

    #[test]
    fn test_slow_car_keeps_crawling_behind_parked_car() {
        let network = straight(20);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 5);
        let mut rng = StdRng::seed_from_u64(1);
        state.speed = 2.0;

        let world = [obstacle_ahead(&state, 15.0, Vec3::ZERO)];
        state.detect_obstacles(&world, &config, 100, &mut rng);
        assert!(state.target_speed() <= config.obstacle_crawl_speed);
        assert!(state.acceleration() < 0.0);

        // A car rolling at crawl speed is not worth braking for
        let world = [obstacle_ahead(&state, 15.0, Vec3::new(0.0, 0.0, 2.0))];
        state.detect_obstacles(&world, &config, 200, &mut rng);
        assert_eq!(state.target_speed(), config.max_speed);
    }

    #[test]
    fn test_standing_car_behind_parked_car_counts_as_stopped() {
        let network = straight(20);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 5);
        let mut rng = StdRng::seed_from_u64(1);
        state.speed = 0.0;

        let world = [obstacle_ahead(&state, 15.0, Vec3::ZERO)];
        state.detect_obstacles(&world, &config, 100, &mut rng);
        assert!(state.is_stopped_for_obstacle());

        state.detect_obstacles(&world, &config, 200, &mut rng);
        assert!(state.is_stopped_for_obstacle());
        assert!(state.target_speed() < config.max_speed);
    }

    #[test]
    fn test_ignores_cars_behind_and_beside() {
        let network = straight(20);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 5);
        let mut rng = StdRng::seed_from_u64(1);

        let behind = Obstacle {
            id: VehicleId::Human(2),
            position: state.position() - Vec3::new(0.0, 0.0, 5.0),
            velocity: Vec3::ZERO,
        };
        let beside = Obstacle {
            id: VehicleId::Human(3),
            position: state.position() + Vec3::new(5.0, 0.0, 0.0),
            velocity: Vec3::ZERO,
        };
        let itself = state.obstacle();

        state.detect_obstacles(&[behind, beside, itself], &config, 100, &mut rng);
        assert_eq!(state.target_speed(), config.max_speed);
    }

    #[test]
    fn test_faster_car_ahead_is_not_an_obstacle() {
        let network = straight(20);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 5);
        let mut rng = StdRng::seed_from_u64(1);

        let world = [obstacle_ahead(&state, 30.0, Vec3::new(0.0, 0.0, 30.0))];
        state.detect_obstacles(&world, &config, 100, &mut rng);
        assert_eq!(state.target_speed(), config.max_speed);
    }

    #[test]
    fn test_stop_honk_and_give_up_timeline() {
        let network = straight(50);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 5);
        let mut rng = StdRng::seed_from_u64(11);
        let blocker = obstacle_ahead(&state, 5.0, Vec3::ZERO);

        // Brake to a standstill
        state.detect_obstacles(&[blocker], &config, 0, &mut rng);
        state.update(&network, &config, 6000);
        assert_eq!(state.speed(), 0.0);
        assert!(!state.is_stopped_for_obstacle());

        // Standing still with the obstacle still there
        let blocker = obstacle_ahead(&state, 5.0, Vec3::ZERO);
        state.detect_obstacles(&[blocker], &config, 6000, &mut rng);
        assert!(state.is_stopped_for_obstacle());

        let (honk_start, honk_end) = state.honk_window();
        assert!((6000 + 3000..6000 + 7000).contains(&honk_start));
        assert!((honk_start + 500..honk_start + 1500).contains(&honk_end));

        state.update(&network, &config, honk_start + 1);
        assert!(state.status().status_flags.contains(StatusFlags::HORN));
        assert!(state.status().status_flags.contains(StatusFlags::BRAKE_LIGHTS_ON));
        assert!(state.status().status_flags.contains(StatusFlags::HAZARDS_ON));
        state.update(&network, &config, honk_end + 1);
        assert!(!state.status().status_flags.contains(StatusFlags::HORN));

        // Stuck for more than 10 s: push through
        state.detect_obstacles(&[blocker], &config, 16_001, &mut rng);
        assert_eq!(state.ignore_obstacles_until(), 26_001);
        assert_eq!(state.target_speed(), 0.0);

        state.detect_obstacles(&[blocker], &config, 16_100, &mut rng);
        assert_eq!(state.target_speed(), config.max_speed);
        assert!(state.acceleration() > 0.0);
    }

    #[test]
    fn test_leaving_stopped_state_clears_flag() {
        let network = straight(50);
        let config = TrafficConfig::default();
        let mut state = spawned(&network, &config, 5);
        let mut rng = StdRng::seed_from_u64(5);

        let blocker = obstacle_ahead(&state, 5.0, Vec3::ZERO);
        state.detect_obstacles(&[blocker], &config, 0, &mut rng);
        state.update(&network, &config, 6000);
        state.detect_obstacles(&[blocker], &config, 6000, &mut rng);
        assert!(state.is_stopped_for_obstacle());

        state.detect_obstacles(&[], &config, 7000, &mut rng);
        assert!(!state.is_stopped_for_obstacle());
        assert_eq!(state.target_speed(), config.max_speed);
    }

    #[test]
    fn test_spawn_sets_protection_window() {
        let network = straight(4);
        let config = TrafficConfig::default();
        let mut state = VehicleState::new(1, &config);
        assert!(state.spawn(&network, PointRef::new(0, 0), &config, 1000, 5000));
        assert!(state.is_spawn_protected(5999));
        assert!(!state.is_spawn_protected(6000));
    }

    #[test]
    fn test_tyre_angular_speed() {
        assert_eq!(tyre_angular_speed(0.0, 0.65), 0.0);
        assert_approx_eq!(tyre_angular_speed(10.0, 0.65), 10.0 / (PI * 0.65) * 6.0);
    }

    #[test]
    fn test_state_ids_are_unique() {
        let config = TrafficConfig::default();
        let a = VehicleState::new(1, &config);
        let b = VehicleState::new(1, &config);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.vehicle_id(), b.vehicle_id());
    }
}
