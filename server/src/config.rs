//! Tunables for the traffic simulation
//!
//! All distances are in metres, speeds in metres per second, accelerations in
//! metres per second squared and durations in milliseconds. Squared variants
//! are precomputed because every hot path compares squared distances.

use shared::KMH_TO_MS;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: f32 },
    #[error("spawn protection range is inverted ({min} > {max})")]
    InvertedSpawnProtection { min: u64, max: u64 },
    #[error("idle rpm {idle} exceeds max rpm {max}")]
    InvertedRpm { idle: u16, max: u16 },
}

#[derive(Debug, Clone)]
pub struct TrafficConfig {
    /// Two states of the same slot closer than this, moving the same way,
    /// are considered duplicates.
    pub min_state_distance: f32,
    /// Clearance a respawning state keeps from its slot siblings.
    pub state_spawn_distance: f32,
    /// Radius inside which direction beats distance when picking a state
    /// for a player.
    pub tie_breaker_distance: f32,
    /// Clearance a spawn point keeps from any live car.
    pub safety_distance: f32,
    /// States with no player inside this radius are recycled.
    pub player_radius: f32,
    /// How far ahead of a player new states are placed.
    pub spawn_distance: f32,
    /// Minimum distance between a spawn point and any player.
    pub spawn_safety_distance_to_player: f32,
    pub min_spawn_protection_ms: u64,
    pub max_spawn_protection_ms: u64,

    pub max_speed: f32,
    pub acceleration: f32,
    pub deceleration: f32,

    pub obstacle_min_distance: f32,
    pub obstacle_margin: f32,
    /// Cars slower than this are treated as if crawling.
    pub obstacle_slow_speed: f32,
    /// Speed assumed for crawling cars.
    pub obstacle_crawl_speed: f32,
    pub stopped_ignore_after_ms: u64,
    pub ignore_obstacles_for_ms: u64,

    pub hazard_speed: f32,
    pub wheel_diameter: f32,
    pub idle_engine_rpm: u16,
    pub max_engine_rpm: u16,

    pub hide_ai_cars: bool,
    pub name_prefix: String,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            min_state_distance: 200.0,
            state_spawn_distance: 1000.0,
            tie_breaker_distance: 250.0,
            safety_distance: 20.0,
            player_radius: 200.0,
            spawn_distance: 100.0,
            spawn_safety_distance_to_player: 80.0,
            min_spawn_protection_ms: 4000,
            max_spawn_protection_ms: 8000,
            max_speed: 80.0 * KMH_TO_MS,
            acceleration: 4.5,
            deceleration: 4.5,
            obstacle_min_distance: 10.0,
            obstacle_margin: 20.0,
            obstacle_slow_speed: 20.0 * KMH_TO_MS,
            obstacle_crawl_speed: 5.0 * KMH_TO_MS,
            stopped_ignore_after_ms: 10_000,
            ignore_obstacles_for_ms: 10_000,
            hazard_speed: 20.0 * KMH_TO_MS,
            wheel_diameter: 0.65,
            idle_engine_rpm: 800,
            max_engine_rpm: 3000,
            hide_ai_cars: false,
            name_prefix: "Traffic".to_string(),
        }
    }
}

impl TrafficConfig {
    pub fn min_state_distance_squared(&self) -> f32 {
        self.min_state_distance * self.min_state_distance
    }

    pub fn state_spawn_distance_squared(&self) -> f32 {
        self.state_spawn_distance * self.state_spawn_distance
    }

    pub fn tie_breaker_distance_squared(&self) -> f32 {
        self.tie_breaker_distance * self.tie_breaker_distance
    }

    pub fn safety_distance_squared(&self) -> f32 {
        self.safety_distance * self.safety_distance
    }

    pub fn player_radius_squared(&self) -> f32 {
        self.player_radius * self.player_radius
    }

    pub fn spawn_safety_distance_to_player_squared(&self) -> f32 {
        self.spawn_safety_distance_to_player * self.spawn_safety_distance_to_player
    }

    /// Rejects values that would make the simulation degenerate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("min_state_distance", self.min_state_distance),
            ("state_spawn_distance", self.state_spawn_distance),
            ("tie_breaker_distance", self.tie_breaker_distance),
            ("safety_distance", self.safety_distance),
            ("player_radius", self.player_radius),
            ("max_speed", self.max_speed),
            ("acceleration", self.acceleration),
            ("deceleration", self.deceleration),
            ("wheel_diameter", self.wheel_diameter),
        ];

        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }

        if self.min_spawn_protection_ms > self.max_spawn_protection_ms {
            return Err(ConfigError::InvertedSpawnProtection {
                min: self.min_spawn_protection_ms,
                max: self.max_spawn_protection_ms,
            });
        }

        if self.idle_engine_rpm > self.max_engine_rpm {
            return Err(ConfigError::InvertedRpm {
                idle: self.idle_engine_rpm,
                max: self.max_engine_rpm,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrafficConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_approx_eq!(config.max_speed, 22.222, 1e-3);
        assert_eq!(config.name_prefix, "Traffic");
    }

    #[test]
    fn test_squared_helpers() {
        let config = TrafficConfig {
            min_state_distance: 3.0,
            tie_breaker_distance: 4.0,
            ..TrafficConfig::default()
        };
        assert_eq!(config.min_state_distance_squared(), 9.0);
        assert_eq!(config.tie_breaker_distance_squared(), 16.0);
    }

    #[test]
    fn test_rejects_non_positive_values() {
        let config = TrafficConfig {
            deceleration: 0.0,
            ..TrafficConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotPositive {
                name: "deceleration",
                value: 0.0
            })
        );

        let config = TrafficConfig {
            max_speed: f32::NAN,
            ..TrafficConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_ranges() {
        let config = TrafficConfig {
            min_spawn_protection_ms: 9000,
            max_spawn_protection_ms: 1000,
            ..TrafficConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedSpawnProtection { .. })
        ));

        let config = TrafficConfig {
            idle_engine_rpm: 4000,
            ..TrafficConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedRpm { .. })
        ));
    }
}
