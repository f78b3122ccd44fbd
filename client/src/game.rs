//! Client-side view of the race, fed exclusively by server packets.
//!
//! `RaceState` is the read-only snapshot a presentation layer renders
//! from: every known car's position, heading and color, plus the discrete
//! things that happened (race started, lap completed, somebody left...).
//! It performs no prediction; the server's word is final.

use log::{debug, warn};
use shared::{CarColor, Packet, Vec2, SERVER_NAME};
use std::collections::HashMap;

/// One car as the server last described it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteCar {
    pub position: Vec2,
    pub heading: f32,
    pub color: CarColor,
}

/// Discrete happenings surfaced to the embedding presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RaceEvent {
    PlayerJoined { username: String },
    PlayerLeft { username: String },
    PositionUpdated { username: String },
    RaceStarted,
    /// Our own car was pushed out of an overlap with `other`.
    Collision { other: String, position: Vec2 },
    LapCompleted { laps_completed: u32 },
    RankChanged { race_position: u8 },
    /// Our finish was acknowledged.
    RaceFinished,
    GameOver { placements: Vec<String> },
}

/// Everything the client knows about the session.
#[derive(Debug)]
pub struct RaceState {
    username: String,
    cars: HashMap<String, RemoteCar>,
    started: bool,
    game_over: bool,
    laps_completed: u32,
    race_position: u8,
    final_placements: Vec<String>,
}

impl RaceState {
    /// Seeds the state with our own car as confirmed by the server.
    pub fn new(username: &str, own_car: RemoteCar) -> Self {
        let mut cars = HashMap::new();
        cars.insert(username.to_string(), own_car);

        Self {
            username: username.to_string(),
            cars,
            started: false,
            game_over: false,
            laps_completed: 0,
            race_position: 0,
            final_placements: Vec::new(),
        }
    }

    /// Applies one server packet and reports what changed, if anything.
    pub fn apply(&mut self, packet: Packet) -> Option<RaceEvent> {
        match packet {
            Packet::NewClientAnnounce {
                username,
                position,
                heading,
                color,
            } => {
                if !self.add_car(&username, RemoteCar { position, heading, color }) {
                    return None;
                }
                Some(RaceEvent::PlayerJoined { username })
            }

            Packet::StartGame => {
                self.started = true;
                Some(RaceEvent::RaceStarted)
            }

            Packet::UpdatePosition {
                username,
                position,
                heading,
            } => match self.cars.get_mut(&username) {
                Some(car) => {
                    car.position = position;
                    car.heading = heading;
                    Some(RaceEvent::PositionUpdated { username })
                }
                None => {
                    debug!("position update for unknown player {}", username);
                    None
                }
            },

            Packet::ClientDisconnected { username } => {
                if self.cars.remove(&username).is_none() {
                    debug!("{} may have been removed already", username);
                    return None;
                }
                Some(RaceEvent::PlayerLeft { username })
            }

            Packet::CollisionData {
                position,
                collided_with,
            } => {
                if let Some(car) = self.cars.get_mut(&self.username) {
                    car.position = position;
                }
                Some(RaceEvent::Collision {
                    other: collided_with,
                    position,
                })
            }

            Packet::LapCompleted => {
                self.laps_completed += 1;
                Some(RaceEvent::LapCompleted {
                    laps_completed: self.laps_completed,
                })
            }

            Packet::Overtaken { race_position, .. } => {
                self.race_position = race_position;
                Some(RaceEvent::RankChanged { race_position })
            }

            Packet::RaceCompleted { .. } => Some(RaceEvent::RaceFinished),

            Packet::GameOver { placements } => {
                self.game_over = true;
                self.final_placements = placements.clone();
                Some(RaceEvent::GameOver { placements })
            }

            // Join-time verdicts are consumed during the handshake; a
            // client should never see the remaining kinds at all.
            Packet::FirstConnection { .. }
            | Packet::UsernameConfirmed { .. }
            | Packet::UsernameRejected
            | Packet::MaxPlayersReached
            | Packet::CheckpointPassed { .. } => {
                warn!("unexpected packet from the server: {:?}", packet);
                None
            }
        }
    }

    fn add_car(&mut self, username: &str, car: RemoteCar) -> bool {
        if username == SERVER_NAME || username == self.username {
            return false;
        }
        if self.cars.contains_key(username) {
            debug!("{} is already on the roster", username);
            return false;
        }
        self.cars.insert(username.to_string(), car);
        true
    }

    /// Remembers where we last reported ourselves, so the roster snapshot
    /// stays coherent between server echoes.
    pub fn set_local_position(&mut self, position: Vec2, heading: f32) {
        if let Some(car) = self.cars.get_mut(&self.username) {
            car.position = position;
            car.heading = heading;
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The full roster, own car included.
    pub fn cars(&self) -> &HashMap<String, RemoteCar> {
        &self.cars
    }

    pub fn local_car(&self) -> Option<&RemoteCar> {
        self.cars.get(&self.username)
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn game_over(&self) -> bool {
        self.game_over
    }

    pub fn laps_completed(&self) -> u32 {
        self.laps_completed
    }

    pub fn race_position(&self) -> u8 {
        self.race_position
    }

    pub fn final_placements(&self) -> &[String] {
        &self.final_placements
    }
}
