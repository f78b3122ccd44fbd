//! Types shared between the racing server and its clients: the wire
//! protocol, car geometry and the pairwise separation routine the server
//! runs after every event-loop pass.

pub mod framing;

use serde::{Deserialize, Serialize};

/// Sentinel identity for server-originated packets. Never admitted as a
/// participant name.
pub const SERVER_NAME: &str = "SERVER";

/// Players required to start a race unless overridden on the command line.
pub const DEFAULT_CAPACITY: usize = 4;

/// Checkpoints a car must pass to complete one lap.
pub const NUM_CHECKPOINTS: u8 = 12;

/// Laps a car must complete to finish the race. The finish rule itself is
/// applied client-side; the server only reacts to the resulting
/// `RaceCompleted` message.
pub const TOTAL_LAPS: u32 = 5;

pub const CAR_WIDTH: f32 = 20.0;
pub const CAR_LENGTH: f32 = 34.0;

/// Squared center distance below which two cars are considered overlapping.
pub const COLLISION_THRESHOLD_SQ: f32 = 8.0 * (CAR_WIDTH / 2.0) * (CAR_LENGTH / 2.0);

/// Fraction of the separating vector applied per nudge while resolving an
/// overlap.
pub const SEPARATION_STEP: f32 = 10.0;

/// Heading every car starts with, in degrees.
pub const START_HEADING: f32 = 90.0;

/// Starting grid, two staggered columns behind the start line. Slot `k` is
/// the position handed to the `k`-th admitted player.
pub const GRID_POSITIONS: [Vec2; 8] = [
    Vec2 { x: 740.0, y: 300.0 },
    Vec2 { x: 772.0, y: 330.0 },
    Vec2 { x: 740.0, y: 360.0 },
    Vec2 { x: 772.0, y: 390.0 },
    Vec2 { x: 740.0, y: 420.0 },
    Vec2 { x: 772.0, y: 450.0 },
    Vec2 { x: 740.0, y: 480.0 },
    Vec2 { x: 772.0, y: 510.0 },
];

/// Car palette, one entry per grid slot. Distinct so every active player is
/// visually unique.
pub const CAR_COLORS: [CarColor; 8] = [
    CarColor { r: 214, g: 40, b: 40 },
    CarColor { r: 0, g: 119, b: 182 },
    CarColor { r: 56, g: 176, b: 0 },
    CarColor { r: 255, g: 183, b: 3 },
    CarColor { r: 131, g: 56, b: 236 },
    CarColor { r: 2, g: 195, b: 154 },
    CarColor { r: 251, g: 86, b: 7 },
    CarColor { r: 255, g: 0, b: 110 },
];

/// Largest session the grid and palette can seat.
pub const MAX_CAPACITY: usize = GRID_POSITIONS.len();

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_sq(&self, other: &Vec2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Everything that crosses the wire, one variant per message kind. Each
/// variant carries exactly the fields that kind needs; dispatch is an
/// exhaustive `match` on both ends so an unhandled kind is a compile error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// Client -> server, must be the first frame on a new connection.
    FirstConnection { username: String },
    /// Admission verdicts.
    UsernameConfirmed {
        position: Vec2,
        heading: f32,
        color: CarColor,
    },
    UsernameRejected,
    MaxPlayersReached,
    /// Server -> peers when someone new is admitted.
    NewClientAnnounce {
        username: String,
        position: Vec2,
        heading: f32,
        color: CarColor,
    },
    StartGame,
    /// Client -> server movement report, relayed to the other players.
    UpdatePosition {
        username: String,
        position: Vec2,
        heading: f32,
    },
    CheckpointPassed { username: String, checkpoint: u8 },
    /// Server -> the player whose checkpoint set just filled up.
    LapCompleted,
    /// Race-position update, relayed verbatim; the server computes no
    /// ranking itself.
    Overtaken { username: String, race_position: u8 },
    ClientDisconnected { username: String },
    /// Server -> each involved player after an overlap was pushed apart.
    CollisionData {
        position: Vec2,
        collided_with: String,
    },
    /// Client -> server when its finish rule fires; echoed back as the
    /// acknowledgement.
    RaceCompleted { username: String },
    GameOver { placements: Vec<String> },
}

impl Packet {
    /// Identity a relay filter should treat as the sender. Kinds that only
    /// the server produces report the reserved identity.
    pub fn sender(&self) -> &str {
        match self {
            Packet::FirstConnection { username }
            | Packet::NewClientAnnounce { username, .. }
            | Packet::UpdatePosition { username, .. }
            | Packet::CheckpointPassed { username, .. }
            | Packet::Overtaken { username, .. }
            | Packet::ClientDisconnected { username }
            | Packet::RaceCompleted { username } => username,
            Packet::UsernameConfirmed { .. }
            | Packet::UsernameRejected
            | Packet::MaxPlayersReached
            | Packet::StartGame
            | Packet::LapCompleted
            | Packet::CollisionData { .. }
            | Packet::GameOver { .. } => SERVER_NAME,
        }
    }
}

/// Pushes two overlapping cars apart along their connecting vector.
///
/// While the squared center distance stays under `COLLISION_THRESHOLD_SQ`,
/// both positions are nudged a tenth of the current separation vector per
/// pass, symmetrically, re-deriving the vector each time. An exact zero
/// vector has no direction to push along, so the loop breaks immediately and
/// the pair stays coincident; contact is still reported so the players hear
/// about the hit.
///
/// Returns true if any contact handling occurred. A pass over an already
/// separated pair changes nothing and returns false.
pub fn separate_cars(a: &mut Vec2, b: &mut Vec2) -> bool {
    let mut dx = a.x - b.x;
    let mut dy = a.y - b.y;
    let mut contact = false;

    while dx * dx + dy * dy < COLLISION_THRESHOLD_SQ {
        contact = true;

        a.x += dx / SEPARATION_STEP;
        a.y += dy / SEPARATION_STEP;
        b.x -= dx / SEPARATION_STEP;
        b.y -= dy / SEPARATION_STEP;

        dx = a.x - b.x;
        dy = a.y - b.y;

        if dx == 0.0 && dy == 0.0 {
            break;
        }
    }

    contact
}
