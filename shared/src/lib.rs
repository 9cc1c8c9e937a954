use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Converts kilometres per hour to metres per second.
pub const KMH_TO_MS: f32 = 1.0 / 3.6;
pub const PROTOCOL_VERSION: u32 = 1;

bitflags! {
    /// Presentation flags sent along with every position update.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StatusFlags: u32 {
        const HORN = 0x0002;
        const LIGHTS_ON = 0x0020;
        const BRAKE_LIGHTS_ON = 0x0040;
        const HIGH_BEAMS_OFF = 0x0080;
        const HAZARDS_ON = 0x2000;
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
        name: String,
    },
    PositionUpdate {
        status: CarStatus,
    },
    Disconnect,
    SetAiOverbooking {
        count: u32,
    },

    Connected {
        session_id: u8,
    },
    Rejected {
        reason: String,
    },
    CarConnected {
        session_id: u8,
        name: String,
    },
    CarDisconnected {
        session_id: u8,
    },
    CarVisibility {
        session_id: u8,
        visible: bool,
    },
    PositionUpdates {
        tick: u32,
        timestamp: u64,
        cars: Vec<(u8, CarStatus)>,
    },
}

/// Kinematic snapshot of one car, human or simulated.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct CarStatus {
    pub position: Vec3,
    /// Euler angles in radians; `x` is the heading.
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub speed: f32,
    pub tyre_angular_speed: u8,
    pub engine_rpm: u16,
    pub gear: u8,
    pub status_flags: StatusFlags,
    pub timestamp: u64,
}

impl CarStatus {
    pub fn at(position: Vec3, velocity: Vec3) -> Self {
        Self {
            position,
            velocity,
            speed: velocity.length(),
            ..Self::default()
        }
    }

    /// Heading in degrees, normalized to `[0, 360)`.
    pub fn rotation_angle(&self) -> f32 {
        let angle = self.rotation.x.to_degrees();
        if angle < 0.0 {
            angle + 360.0
        } else {
            angle
        }
    }
}
