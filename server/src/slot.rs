//! Traffic identities: one visible car per slot
//!
//! A slot is either driven by a connected player or by the simulation. While
//! simulated it is backed by a `StatePool` of one or more replicas; the
//! network layer shows every player whichever replica suits them best, so one
//! identity can appear in several places at once.

use crate::broadcast::{Broadcaster, SlotEvent};
use crate::config::TrafficConfig;
use crate::state_pool::{SharedState, StatePool};
use crate::vehicle::{Obstacle, VehicleId};
use glam::Vec3;
use log::info;
use parking_lot::RwLock;
use shared::CarStatus;
use std::sync::Arc;

/// Who may drive a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiMode {
    /// Players only.
    Disabled,
    /// Simulated whenever no player holds it.
    Auto,
    /// Always simulated, never handed to a player.
    Fixed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotControl {
    HumanControlled { status: Option<CarStatus> },
    Simulated,
}

pub struct Slot {
    session_id: u8,
    ai_mode: AiMode,
    ai_name: String,
    config: Arc<TrafficConfig>,
    broadcaster: Arc<dyn Broadcaster>,
    control: RwLock<SlotControl>,
    pool: StatePool,
}

impl Slot {
    pub fn new(
        session_id: u8,
        ai_mode: AiMode,
        config: Arc<TrafficConfig>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            session_id,
            ai_mode,
            ai_name: format!("{} {}", config.name_prefix, session_id),
            pool: StatePool::new(session_id, Arc::clone(&config), Arc::clone(&broadcaster)),
            config,
            broadcaster,
            control: RwLock::new(SlotControl::HumanControlled { status: None }),
        }
    }

    pub fn session_id(&self) -> u8 {
        self.session_id
    }

    pub fn ai_mode(&self) -> AiMode {
        self.ai_mode
    }

    pub fn ai_name(&self) -> &str {
        &self.ai_name
    }

    pub fn pool(&self) -> &StatePool {
        &self.pool
    }

    pub fn control(&self) -> SlotControl {
        self.control.read().clone()
    }

    pub fn is_ai_controlled(&self) -> bool {
        matches!(*self.control.read(), SlotControl::Simulated)
    }

    /// Last status a player sent for this slot.
    pub fn human_status(&self) -> Option<CarStatus> {
        match *self.control.read() {
            SlotControl::HumanControlled { status } => status,
            SlotControl::Simulated => None,
        }
    }

    /// Stores a player's position update. Ignored while simulated.
    pub fn update_human_status(&self, new_status: CarStatus) -> bool {
        match &mut *self.control.write() {
            SlotControl::HumanControlled { status } => {
                *status = Some(new_status);
                true
            }
            SlotControl::Simulated => false,
        }
    }

    pub fn clear_human_status(&self) {
        if let SlotControl::HumanControlled { status } = &mut *self.control.write() {
            *status = None;
        }
    }

    /// Hands the slot to the simulation or back to players, announcing the
    /// change to everyone.
    pub fn set_ai_control(&self, ai_controlled: bool) {
        let mut control = self.control.write();
        if matches!(*control, SlotControl::Simulated) == ai_controlled {
            return;
        }

        if ai_controlled {
            *control = SlotControl::Simulated;
            info!("Slot {} is now controlled by AI", self.session_id);

            self.pool.reset();
            self.broadcaster.notify(
                self.session_id,
                SlotEvent::Connected {
                    name: self.ai_name.clone(),
                },
            );
            if self.config.hide_ai_cars {
                self.broadcaster
                    .notify(self.session_id, SlotEvent::VisibilityChanged { visible: false });
            }
        } else {
            *control = SlotControl::HumanControlled { status: None };
            info!("Slot {} is no longer controlled by AI", self.session_id);

            if !self.pool.is_empty() {
                self.broadcaster
                    .notify(self.session_id, SlotEvent::Disconnected);
            }
            if self.config.hide_ai_cars {
                self.broadcaster
                    .notify(self.session_id, SlotEvent::VisibilityChanged { visible: true });
            }
            self.pool.reset();
        }
    }

    pub fn set_overbooking(&self, count: usize) {
        self.pool.set_overbooking(count);
    }

    pub fn can_spawn_ai_state(&self, spawn_point: Vec3, state: &SharedState) -> bool {
        self.pool.can_spawn_ai_state(spawn_point, state)
    }

    pub fn best_state_for_player(&self, player: &CarStatus) -> Option<SharedState> {
        if !self.is_ai_controlled() {
            return None;
        }
        self.pool.best_state_for_player(player)
    }

    /// Nearest replica to `position`, placed or not, with its squared
    /// distance.
    pub fn closest_ai_state(&self, position: Vec3) -> Option<(SharedState, f32)> {
        self.pool.closest_state(position)
    }

    pub fn is_position_safe(&self, position: Vec3) -> bool {
        self.pool.is_position_safe(position)
    }

    pub fn active_state_count(&self) -> usize {
        if !self.is_ai_controlled() {
            return 0;
        }
        self.pool.active_count()
    }

    pub fn states(&self) -> Vec<SharedState> {
        self.pool.states()
    }

    /// Everything this slot contributes to the obstacle snapshot.
    pub fn obstacles(&self) -> Vec<Obstacle> {
        match self.control() {
            SlotControl::Simulated => self.pool.obstacles(),
            SlotControl::HumanControlled { status: Some(status) } => vec![Obstacle {
                id: VehicleId::Human(self.session_id),
                position: status.position,
                velocity: status.velocity,
            }],
            SlotControl::HumanControlled { status: None } => Vec::new(),
        }
    }
}
