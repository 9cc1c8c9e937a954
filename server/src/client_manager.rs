//! Connected players and the slots they hold
//!
//! This module handles the server-side bookkeeping of human players:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - Which traffic slot each player drives
//! - Connection health monitoring and automatic cleanup
//!
//! Slot ownership itself lives in `Traffic`; the manager only remembers who
//! holds what so packets can be routed back to the right address.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Seconds of silence before a player is dropped.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected player
#[derive(Debug)]
pub struct Client {
    /// Slot the player drives; doubles as their session id on the wire
    pub session_id: u8,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Display name sent with the connect packet
    pub name: String,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(session_id: u8, addr: SocketAddr, name: String) -> Self {
        Self {
            session_id,
            addr,
            name,
            last_seen: Instant::now(),
        }
    }

    /// Checks if the client has exceeded the connection timeout
    ///
    /// Returns true if no packets have been received from this client
    /// within the specified timeout duration, indicating a likely disconnect.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Tracks every connected player by the slot they hold
///
/// Enforces the player limit and hands out addresses for broadcasting.
pub struct ClientManager {
    clients: HashMap<u8, Client>,
    /// Maximum number of concurrent players allowed
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
        }
    }

    /// True while another player can join.
    pub fn has_capacity(&self) -> bool {
        self.clients.len() < self.max_clients
    }

    /// Registers a player in the slot they were given
    ///
    /// Returns false if the server is at capacity or the slot is already
    /// held by someone else.
    pub fn add_client(&mut self, session_id: u8, addr: SocketAddr, name: String) -> bool {
        if !self.has_capacity() || self.clients.contains_key(&session_id) {
            return false;
        }

        info!("Client {} ({}) connected from {}", session_id, name, addr);
        self.clients
            .insert(session_id, Client::new(session_id, addr, name));
        true
    }

    /// Removes a player from the server
    ///
    /// Returns the removed client, or None if they were already gone. This
    /// handles both explicit disconnections and timeout cleanup.
    pub fn remove_client(&mut self, session_id: &u8) -> Option<Client> {
        let client = self.clients.remove(session_id)?;
        info!("Client {} disconnected", client.session_id);
        Some(client)
    }

    /// Finds the slot held from a given network address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u8> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.session_id)
    }

    /// Marks a player as alive. Returns false for unknown players.
    pub fn touch(&mut self, session_id: u8) -> bool {
        match self.clients.get_mut(&session_id) {
            Some(client) => {
                client.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn client(&self, session_id: u8) -> Option<&Client> {
        self.clients.get(&session_id)
    }

    /// Slots currently held by players
    pub fn session_ids(&self) -> Vec<u8> {
        self.clients.keys().copied().collect()
    }

    /// Checks for and removes timed-out clients
    ///
    /// Returns the slots that were freed so they can be handed back to the
    /// simulation.
    pub fn check_timeouts(&mut self) -> Vec<u8> {
        let timed_out: Vec<u8> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(CLIENT_TIMEOUT))
            .map(|client| client.session_id)
            .collect();

        for session_id in &timed_out {
            self.remove_client(session_id);
        }

        timed_out
    }

    /// Gets all session ids and their network addresses
    pub fn get_client_addrs(&self) -> Vec<(u8, SocketAddr)> {
        self.clients
            .values()
            .map(|client| (client.session_id, client.addr))
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
