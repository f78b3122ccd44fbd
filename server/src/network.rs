//! TCP listener, per-connection readers and the session event loop.
//!
//! One task owns the whole `SessionState`. The listener and every reader
//! task funnel their happenings into it over a channel, so all mutation is
//! serialized: broadcasts triggered by one client's message finish before
//! the next message is handled, and no locks exist anywhere.

use crate::registry::{AdmissionError, Connection};
use crate::session::SessionState;
use log::{debug, info, warn};
use shared::framing::read_frame;
use shared::{Packet, SERVER_NAME};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What the acceptor and reader tasks report to the session loop.
#[derive(Debug)]
pub enum ServerEvent {
    /// A complete frame arrived on an open connection.
    Frame { conn_id: u64, packet: Packet },
    /// The connection's read side ended (disconnect or fatal wire error).
    Closed { conn_id: u64 },
}

/// The authoritative session server.
///
/// `run` drives the whole lifecycle: admission handshakes, relaying,
/// lap progression, the collision pass and disconnect cleanup.
pub struct Server {
    listener: TcpListener,
    session: SessionState,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
    /// Accepted connections that have not introduced themselves yet.
    pending: HashMap<u64, Connection>,
    /// Connection id -> admitted username.
    identities: HashMap<u64, String>,
    next_conn_id: u64,
}

impl Server {
    pub async fn new(addr: &str, capacity: usize) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "server listening on {}, waiting for connections",
            listener.local_addr()?
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            session: SessionState::new(capacity),
            events_tx,
            events_rx,
            pending: HashMap::new(),
            identities: HashMap::new(),
            next_conn_id: 0,
        })
    }

    /// The address the listener actually bound, for callers that asked for
    /// an ephemeral port.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the session loop forever.
    ///
    /// Each iteration blocks until the listener or a connection has work
    /// (the only suspension point), handles every event already queued, and
    /// ends with one collision pass over the registry. No client error is
    /// fatal here; the loop outlives individual connections.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!(
            "session seats {} players",
            self.session.registry.capacity()
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.handle_accept(stream, addr),
                    Err(e) => warn!("a client had an error connecting: {}", e),
                },
                event = self.events_rx.recv() => {
                    // The server holds a sender, so the channel cannot
                    // close; the guard keeps the loop honest anyway.
                    let Some(event) = event else { break };
                    self.handle_event(event).await;
                    while let Ok(event) = self.events_rx.try_recv() {
                        self.handle_event(event).await;
                    }
                }
            }

            self.collision_pass().await;
        }

        Ok(())
    }

    /// Registers a freshly accepted socket and starts its reader. The
    /// connection stays pending until its `FirstConnection` frame arrives.
    fn handle_accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;

        debug!("connection {} opened from {}", conn_id, addr);

        let (read_half, write_half) = stream.into_split();
        let reader = self.spawn_reader(conn_id, read_half);
        self.pending
            .insert(conn_id, Connection::new(write_half, reader));
    }

    /// Reader task: one per connection, decoding frames until the stream
    /// dies. Malformed payloads are dropped frame-by-frame — the sender is
    /// treated as silent for that cycle — while stream errors end the task
    /// and surface as a close.
    fn spawn_reader(&self, conn_id: u64, mut read_half: OwnedReadHalf) -> JoinHandle<()> {
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(packet) => {
                        if events_tx
                            .send(ServerEvent::Frame { conn_id, packet })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) if e.is_frame_local() => {
                        warn!("dropping malformed frame from connection {}: {}", conn_id, e);
                    }
                    Err(e) => {
                        debug!("connection {} read ended: {}", conn_id, e);
                        break;
                    }
                }
            }
            let _ = events_tx.send(ServerEvent::Closed { conn_id });
        })
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Frame { conn_id, packet } => {
                if let Some(username) = self.identities.get(&conn_id).cloned() {
                    self.handle_participant_packet(&username, packet).await;
                } else if self.pending.contains_key(&conn_id) {
                    self.handle_handshake(conn_id, packet).await;
                } else {
                    debug!("frame from connection {} after close", conn_id);
                }
            }
            ServerEvent::Closed { conn_id } => self.handle_closed(conn_id).await,
        }
    }

    /// Admission: the first frame decides everything. Anything but a
    /// `FirstConnection`, or a verdict of full/duplicate, closes the
    /// connection without it ever entering the registry.
    async fn handle_handshake(&mut self, conn_id: u64, packet: Packet) {
        let Some(connection) = self.pending.remove(&conn_id) else {
            return;
        };

        let username = match packet {
            Packet::FirstConnection { username } => username,
            other => {
                warn!(
                    "connection {} opened with {:?} instead of an introduction",
                    conn_id, other
                );
                connection.close();
                return;
            }
        };

        match self.session.admit(&username, connection) {
            Ok(admitted) => {
                self.identities.insert(conn_id, username.clone());
                info!(
                    "{} joined ({}/{})",
                    username,
                    self.session.registry.len(),
                    self.session.registry.capacity()
                );

                self.send_to(
                    &username,
                    &Packet::UsernameConfirmed {
                        position: admitted.position,
                        heading: admitted.heading,
                        color: admitted.color,
                    },
                )
                .await;

                self.broadcast_except_sender(&Packet::NewClientAnnounce {
                    username: username.clone(),
                    position: admitted.position,
                    heading: admitted.heading,
                    color: admitted.color,
                })
                .await;

                if admitted.starts_race {
                    info!(
                        "{} players have connected, starting the race",
                        self.session.registry.capacity()
                    );
                    self.broadcast_all(&Packet::StartGame).await;
                }
            }
            Err((mut connection, AdmissionError::CapacityExceeded)) => {
                warn!("maximum amount of clients connected, turning {} away", username);
                if let Err(e) = connection.send(&Packet::MaxPlayersReached).await {
                    debug!("could not deliver the rejection: {}", e);
                }
                connection.close();
            }
            Err((mut connection, AdmissionError::DuplicateName)) => {
                warn!("a client with the username {} already exists", username);
                if let Err(e) = connection.send(&Packet::UsernameRejected).await {
                    debug!("could not deliver the rejection: {}", e);
                }
                connection.close();
            }
        }
    }

    async fn handle_participant_packet(&mut self, username: &str, packet: Packet) {
        match packet {
            Packet::UpdatePosition {
                position, heading, ..
            } => {
                self.session.update_position(username, position, heading);
                self.broadcast_except_sender(&Packet::UpdatePosition {
                    username: username.to_string(),
                    position,
                    heading,
                })
                .await;
            }

            Packet::CheckpointPassed { checkpoint, .. } => {
                if self.session.record_checkpoint(username, checkpoint) {
                    info!("{} completed a lap", username);
                    self.send_to(username, &Packet::LapCompleted).await;
                }
            }

            // Race positions come from outside; relay them untouched.
            Packet::Overtaken { race_position, .. } => {
                self.broadcast_except_sender(&Packet::Overtaken {
                    username: username.to_string(),
                    race_position,
                })
                .await;
            }

            Packet::RaceCompleted { .. } => {
                let outcome = self.session.record_finish(username);
                if outcome.newly_finished {
                    info!(
                        "{} finished the race in position {}",
                        username,
                        self.session.finishing_order().len()
                    );
                    self.send_to(
                        username,
                        &Packet::RaceCompleted {
                            username: username.to_string(),
                        },
                    )
                    .await;
                }
                if outcome.race_over {
                    self.announce_game_over().await;
                }
            }

            Packet::FirstConnection { .. } => {
                warn!("{} sent a second introduction, ignoring it", username);
            }

            Packet::UsernameConfirmed { .. }
            | Packet::UsernameRejected
            | Packet::MaxPlayersReached
            | Packet::NewClientAnnounce { .. }
            | Packet::StartGame
            | Packet::LapCompleted
            | Packet::ClientDisconnected { .. }
            | Packet::CollisionData { .. }
            | Packet::GameOver { .. } => {
                warn!("{} sent a server-only packet, ignoring it", username);
            }
        }
    }

    /// Disconnect cleanup: prune the registry, tell everyone else, and see
    /// whether the departure ended the race for those still here.
    async fn handle_closed(&mut self, conn_id: u64) {
        if let Some(connection) = self.pending.remove(&conn_id) {
            debug!("connection {} closed before admission", conn_id);
            connection.close();
            return;
        }

        if let Some(username) = self.identities.remove(&conn_id) {
            info!("{} disconnected from the server", username);
            if self.session.remove(&username) {
                self.broadcast_all(&Packet::ClientDisconnected { username }).await;
                if self.session.race_over_after_departure() {
                    self.announce_game_over().await;
                }
            }
        } else {
            debug!("connection {} was already removed", conn_id);
        }
    }

    /// Runs once per loop iteration, after all reads: every pair that had
    /// to be pushed apart gets told about it.
    async fn collision_pass(&mut self) {
        for report in self.session.resolve_collisions() {
            self.send_to(
                &report.username,
                &Packet::CollisionData {
                    position: report.position,
                    collided_with: report.collided_with,
                },
            )
            .await;
        }
    }

    async fn announce_game_over(&mut self) {
        let placements = self.session.finishing_order().to_vec();
        info!("race over, final placements: {:?}", placements);
        self.broadcast_all(&Packet::GameOver { placements }).await;
    }

    /// Delivers to one participant. A failed write is logged and otherwise
    /// ignored: it neither aborts a surrounding broadcast nor removes the
    /// participant — if the connection is truly gone its reader will report
    /// the close.
    async fn send_to(&mut self, username: &str, packet: &Packet) {
        if let Some(record) = self.session.registry.get_mut(username) {
            if let Err(e) = record.connection.send(packet).await {
                warn!("failed to send to {}: {}", username, e);
            }
        }
    }

    /// Delivers to every registered participant.
    async fn broadcast_all(&mut self, packet: &Packet) {
        for username in self.session.registry.usernames() {
            self.send_to(&username, packet).await;
        }
    }

    /// Delivers to everyone except the packet's sender. A reserved-identity
    /// sender has no participant to exclude; those broadcasts are
    /// suppressed entirely.
    async fn broadcast_except_sender(&mut self, packet: &Packet) {
        let sender = packet.sender().to_string();
        if sender == SERVER_NAME {
            debug!("suppressing sender-filtered broadcast of a server packet");
            return;
        }

        for username in self.session.registry.usernames() {
            if username != sender {
                self.send_to(&username, packet).await;
            }
        }
    }
}
