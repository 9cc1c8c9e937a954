//! Server network layer handling UDP communications with players
//!
//! The simulation runs on its own task; this layer only feeds player
//! positions into the traffic slots, hands slots to joining players, and
//! sends every player the view of the world picked for them.

use crate::broadcast::{Broadcaster, SlotEvent};
use crate::client_manager::ClientManager;
use crate::traffic::Traffic;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        session_id: u8,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages queued for the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<u8>,
    },
}

/// Packet announcing a slot event to players.
pub fn packet_for_event(session_id: u8, event: SlotEvent) -> Packet {
    match event {
        SlotEvent::Connected { name } => Packet::CarConnected { session_id, name },
        SlotEvent::Disconnected => Packet::CarDisconnected { session_id },
        SlotEvent::VisibilityChanged { visible } => Packet::CarVisibility {
            session_id,
            visible,
        },
    }
}

/// Turns slot events into broadcasts on the outgoing packet queue.
pub struct PacketBroadcaster {
    game_tx: mpsc::UnboundedSender<GameMessage>,
}

impl PacketBroadcaster {
    pub fn new(game_tx: mpsc::UnboundedSender<GameMessage>) -> Self {
        Self { game_tx }
    }
}

impl Broadcaster for PacketBroadcaster {
    fn notify(&self, session_id: u8, event: SlotEvent) {
        let packet = packet_for_event(session_id, event);
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket {
            packet,
            exclude: None,
        }) {
            error!("Failed to queue slot event for Traffic {}: {}", session_id, e);
        }
    }
}

/// Main server coordinating players and the traffic world
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    traffic: Arc<Traffic>,
    tick_duration: Duration,
    tick: u32,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    /// Binds the socket. `game_tx`/`game_rx` is the outgoing packet queue,
    /// created up front so a `PacketBroadcaster` can be handed to `Traffic`
    /// before the server exists.
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        traffic: Arc<Traffic>,
        game_tx: mpsc::UnboundedSender<GameMessage>,
        game_rx: mpsc::UnboundedReceiver<GameMessage>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            traffic,
            tick_duration,
            tick: 0,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (session_id, addr) in client_addrs {
                            if Some(session_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", session_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for session_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { session_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<u8>) {
        if let Err(e) = self
            .game_tx
            .send(GameMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Tells a newly joined player about every car already on the server.
    async fn send_roster(&self, session_id: u8, addr: SocketAddr) {
        let hide_ai_cars = self.traffic.config().hide_ai_cars;
        let clients = self.clients.read().await;

        for slot in self.traffic.slots() {
            if slot.session_id() == session_id {
                continue;
            }

            if slot.is_ai_controlled() {
                self.send_packet(
                    Packet::CarConnected {
                        session_id: slot.session_id(),
                        name: slot.ai_name().to_string(),
                    },
                    addr,
                );
                if hide_ai_cars {
                    self.send_packet(
                        Packet::CarVisibility {
                            session_id: slot.session_id(),
                            visible: false,
                        },
                        addr,
                    );
                }
            } else if let Some(client) = clients.client(slot.session_id()) {
                self.send_packet(
                    Packet::CarConnected {
                        session_id: client.session_id,
                        name: client.name.clone(),
                    },
                    addr,
                );
            }
        }
    }

    /// Frees a player's slot and lets everyone know.
    fn release_player(&self, session_id: u8) {
        self.broadcast_packet(Packet::CarDisconnected { session_id }, Some(session_id));
        self.traffic.release_slot(session_id);
    }

    /// Processes incoming packets
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                name,
            } => {
                info!(
                    "Client {} connecting from {} (version: {})",
                    name, addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let response = Packet::Rejected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    self.send_packet(response, addr);
                    return;
                }

                // Remove existing connection if present
                let existing = {
                    let mut clients = self.clients.write().await;
                    let existing = clients.find_client_by_addr(addr);
                    if let Some(session_id) = existing {
                        clients.remove_client(&session_id);
                    }
                    existing
                };
                if let Some(session_id) = existing {
                    info!("Replacing existing client {} from {}", session_id, addr);
                    self.release_player(session_id);
                }

                let session_id = {
                    let mut clients = self.clients.write().await;
                    if !clients.has_capacity() {
                        None
                    } else {
                        let session_id = self
                            .traffic
                            .claim_slot_for_player(&clients.session_ids());
                        if let Some(session_id) = session_id {
                            clients.add_client(session_id, addr, name.clone());
                        }
                        session_id
                    }
                };

                match session_id {
                    Some(session_id) => {
                        self.send_packet(Packet::Connected { session_id }, addr);
                        self.send_roster(session_id, addr).await;
                        self.broadcast_packet(
                            Packet::CarConnected { session_id, name },
                            Some(session_id),
                        );
                    }
                    None => {
                        let response = Packet::Rejected {
                            reason: "Server full".to_string(),
                        };
                        self.send_packet(response, addr);
                    }
                }
            }

            Packet::PositionUpdate { status } => {
                let session_id = {
                    let mut clients = self.clients.write().await;
                    let session_id = clients.find_client_by_addr(addr);
                    if let Some(session_id) = session_id {
                        clients.touch(session_id);
                    }
                    session_id
                };

                if let Some(slot) = session_id.and_then(|id| self.traffic.slot(id)) {
                    slot.update_human_status(status);
                }
            }

            Packet::Disconnect => {
                let removed = {
                    let mut clients = self.clients.write().await;
                    clients
                        .find_client_by_addr(addr)
                        .and_then(|session_id| clients.remove_client(&session_id))
                };

                if let Some(client) = removed {
                    self.release_player(client.session_id);
                }
            }

            Packet::SetAiOverbooking { count } => {
                let known = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr).is_some()
                };

                if known {
                    self.traffic.set_ai_overbooking(count as usize);
                } else {
                    warn!("Ignoring overbooking request from unknown address {}", addr);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Sends every player the cars picked for them
    async fn broadcast_positions(&mut self) {
        let client_addrs = {
            let clients = self.clients.read().await;
            clients.get_client_addrs()
        };

        if client_addrs.is_empty() {
            return;
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis();
        let timestamp_safe = (timestamp.min(u64::MAX as u128)) as u64;

        for (session_id, addr) in client_addrs {
            let packet = Packet::PositionUpdates {
                tick: self.tick,
                timestamp: timestamp_safe,
                cars: self.traffic.view_for_player(session_id),
            };
            self.send_packet(packet, addr);
        }
    }

    /// Main server loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { session_id }) => {
                            info!("Client {} timed out", session_id);
                            self.release_player(session_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.tick = self.tick.wrapping_add(1);
                    self.broadcast_positions().await;

                    if self.tick % 600 == 0 {
                        let client_count = self.clients.read().await.len();
                        debug!(
                            "Tick {}: {} clients, {} live traffic states",
                            self.tick,
                            client_count,
                            self.traffic.active_state_count()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}
