//! Participant registry and connection ownership for the racing session.
//!
//! This module handles the server-side bookkeeping for admitted players:
//! - Admission with capacity and name-uniqueness enforcement
//! - Grid slot assignment (starting position + car color) and reclamation
//! - Exclusive ownership of each participant's connection handles
//! - Last-known movement state and per-lap checkpoint flags
//!
//! Everything here is mutated from the session event loop only, so no
//! locking is involved.

use log::info;
use shared::framing::{write_frame, WireError};
use shared::{
    CarColor, Packet, Vec2, CAR_COLORS, GRID_POSITIONS, MAX_CAPACITY, SERVER_NAME, START_HEADING,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;

/// Why an admission attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// The name is already registered, reserved for the server, or empty.
    DuplicateName,
    /// The session already seats its configured player count.
    CapacityExceeded,
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::DuplicateName => write!(f, "username unavailable"),
            AdmissionError::CapacityExceeded => write!(f, "session is full"),
        }
    }
}

impl std::error::Error for AdmissionError {}

/// Exclusive owner of one client's socket.
///
/// Holds the framed write half plus the handle of the task draining the
/// read half. Dropping the write half shuts the stream down, and `close`
/// stops the reader with it, so a connection is released exactly once —
/// on removal or on a rejected admission — with no path that leaks either
/// half.
#[derive(Debug)]
pub struct Connection {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

impl Connection {
    pub fn new(writer: OwnedWriteHalf, reader: JoinHandle<()>) -> Self {
        Self { writer, reader }
    }

    /// Writes one frame to this client.
    pub async fn send(&mut self, packet: &Packet) -> Result<(), WireError> {
        write_frame(&mut self.writer, packet).await
    }

    /// Tears the connection down: the reader task stops and the socket's
    /// write half closes when `self` drops.
    pub fn close(self) {
        self.reader.abort();
    }
}

/// Race progression for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceProgress {
    Racing,
    Finished,
}

/// One admitted player: identity, owned connection, movement state and
/// lap progress.
#[derive(Debug)]
pub struct ParticipantRecord {
    pub username: String,
    pub connection: Connection,
    pub position: Vec2,
    pub heading: f32,
    pub color: CarColor,
    /// Grid slot index; determines position and color, freed on removal.
    pub slot: usize,
    /// Checkpoint index -> passed this lap. Cleared when a lap completes,
    /// and never grows beyond the track's checkpoint count.
    pub checkpoints: HashMap<u8, bool>,
    pub laps_completed: u32,
    pub progress: RaceProgress,
}

impl ParticipantRecord {
    fn new(username: &str, connection: Connection, slot: usize) -> Self {
        Self {
            username: username.to_string(),
            connection,
            position: GRID_POSITIONS[slot],
            heading: START_HEADING,
            color: CAR_COLORS[slot],
            slot,
            checkpoints: HashMap::new(),
            laps_completed: 0,
            progress: RaceProgress::Racing,
        }
    }
}

/// All currently admitted participants, keyed by username.
///
/// Enforces the session invariants: the registry never grows past its
/// capacity, names are unique and never the reserved server identity, and
/// no two active participants share a grid slot (and therefore a color or
/// starting position).
pub struct Registry {
    records: HashMap<String, ParticipantRecord>,
    capacity: usize,
}

impl Registry {
    /// Creates an empty registry seating at most `capacity` players. The
    /// capacity is clamped to what the starting grid can hold.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
            capacity: capacity.clamp(1, MAX_CAPACITY),
        }
    }

    /// Admits a new participant, taking ownership of its connection.
    ///
    /// On success the record is stored under the lowest free grid slot —
    /// with no intervening removals that is exactly the join order — and a
    /// reference to it is returned. On failure the connection is handed
    /// back so the caller can deliver the rejection and close it.
    pub fn admit(
        &mut self,
        username: &str,
        connection: Connection,
    ) -> Result<&ParticipantRecord, (Connection, AdmissionError)> {
        if self.records.len() >= self.capacity {
            return Err((connection, AdmissionError::CapacityExceeded));
        }
        if username.is_empty() || username == SERVER_NAME || self.records.contains_key(username) {
            return Err((connection, AdmissionError::DuplicateName));
        }

        let slot = self.lowest_free_slot();
        let record = ParticipantRecord::new(username, connection, slot);
        info!("{} has connected to the server (slot {})", username, slot);

        match self.records.entry(username.to_string()) {
            Entry::Vacant(entry) => Ok(entry.insert(record)),
            // Unreachable: the duplicate check above covers this key.
            Entry::Occupied(_) => Err((record.connection, AdmissionError::DuplicateName)),
        }
    }

    /// Removes a participant, returning its record so the caller can
    /// release the connection. Absent names are a no-op reported as `None`.
    pub fn remove(&mut self, username: &str) -> Option<ParticipantRecord> {
        let record = self.records.remove(username);
        if record.is_some() {
            info!("{} removed from the registry", username);
        }
        record
    }

    pub fn get(&self, username: &str) -> Option<&ParticipantRecord> {
        self.records.get(username)
    }

    pub fn get_mut(&mut self, username: &str) -> Option<&mut ParticipantRecord> {
        self.records.get_mut(username)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.records.contains_key(username)
    }

    /// Snapshot of the registered names, for iteration that also needs to
    /// mutate records or send frames.
    pub fn usernames(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn participants(&self) -> impl Iterator<Item = &ParticipantRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lowest_free_slot(&self) -> usize {
        (0..self.capacity)
            .find(|slot| !self.records.values().any(|r| r.slot == *slot))
            // A free slot always exists while len() < capacity.
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_connection() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let reader = tokio::spawn(async move {
            let _read_half = read_half;
        });
        (Connection::new(write_half, reader), peer)
    }

    #[tokio::test]
    async fn admit_assigns_slots_in_join_order() {
        let mut registry = Registry::new(3);

        let (conn, _peer_a) = loopback_connection().await;
        let record = registry.admit("ayrton", conn).unwrap();
        assert_eq!(record.slot, 0);
        assert_eq!(record.color, CAR_COLORS[0]);
        assert_eq!(record.position, GRID_POSITIONS[0]);
        assert_eq!(record.heading, START_HEADING);

        let (conn, _peer_b) = loopback_connection().await;
        let record = registry.admit("alain", conn).unwrap();
        assert_eq!(record.slot, 1);
        assert_eq!(record.color, CAR_COLORS[1]);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let mut registry = Registry::new(3);

        let (conn, _peer) = loopback_connection().await;
        registry.admit("ayrton", conn).unwrap();

        let (conn, _peer) = loopback_connection().await;
        let (returned, err) = registry.admit("ayrton", conn).unwrap_err();
        assert_eq!(err, AdmissionError::DuplicateName);
        assert_eq!(registry.len(), 1);
        returned.close();
    }

    #[tokio::test]
    async fn reserved_and_empty_names_are_rejected() {
        let mut registry = Registry::new(3);

        let (conn, _peer) = loopback_connection().await;
        let (conn, err) = registry.admit(SERVER_NAME, conn).unwrap_err();
        assert_eq!(err, AdmissionError::DuplicateName);

        let (conn, err) = registry.admit("", conn).unwrap_err();
        assert_eq!(err, AdmissionError::DuplicateName);
        assert!(registry.is_empty());
        conn.close();
    }

    #[tokio::test]
    async fn admission_past_capacity_is_rejected() {
        let mut registry = Registry::new(1);

        let (conn, _peer_a) = loopback_connection().await;
        registry.admit("ayrton", conn).unwrap();

        let (conn, _peer_b) = loopback_connection().await;
        let (returned, err) = registry.admit("alain", conn).unwrap_err();
        assert_eq!(err, AdmissionError::CapacityExceeded);
        assert_eq!(registry.len(), 1);
        returned.close();
    }

    #[tokio::test]
    async fn remove_restores_the_pre_admit_state() {
        let mut registry = Registry::new(2);

        let (conn, _peer) = loopback_connection().await;
        registry.admit("ayrton", conn).unwrap();
        assert_eq!(registry.len(), 1);

        let record = registry.remove("ayrton").unwrap();
        record.connection.close();
        assert!(registry.is_empty());

        // The freed slot (and with it the color) is assignable again.
        let (conn, _peer) = loopback_connection().await;
        let record = registry.admit("alain", conn).unwrap();
        assert_eq!(record.slot, 0);
        assert_eq!(record.color, CAR_COLORS[0]);
    }

    #[tokio::test]
    async fn departure_frees_the_lowest_slot_first() {
        let mut registry = Registry::new(3);

        let (conn, _peer_a) = loopback_connection().await;
        registry.admit("ayrton", conn).unwrap();
        let (conn, _peer_b) = loopback_connection().await;
        registry.admit("alain", conn).unwrap();
        let (conn, _peer_c) = loopback_connection().await;
        registry.admit("nigel", conn).unwrap();

        registry.remove("ayrton").unwrap().connection.close();

        let (conn, _peer_d) = loopback_connection().await;
        let record = registry.admit("nelson", conn).unwrap();
        assert_eq!(record.slot, 0);

        // No two active participants ended up sharing a slot.
        let mut slots: Vec<usize> = registry.participants().map(|r| r.slot).collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn removing_an_absent_name_is_a_no_op() {
        let mut registry = Registry::new(2);
        assert!(registry.remove("ghost").is_none());
        assert!(registry.is_empty());
    }
}
