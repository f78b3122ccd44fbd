//! Process-wide session state: the participant registry, the race phase,
//! lap progression and the finishing order.
//!
//! One `SessionState` value exists for the lifetime of the process. It is
//! owned by the event loop and only ever touched from that task, so every
//! operation here is plain synchronous mutation.

use crate::registry::{AdmissionError, Connection, ParticipantRecord, RaceProgress, Registry};
use log::{debug, warn};
use shared::{separate_cars, CarColor, Vec2, NUM_CHECKPOINTS};

/// Whether the race has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Waiting,
    InProgress,
}

/// What a successful admission handed out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admitted {
    pub position: Vec2,
    pub heading: f32,
    pub color: CarColor,
    /// True when this admission filled the session and the race starts now.
    pub starts_race: bool,
}

/// Result of recording a `RaceCompleted` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishOutcome {
    /// False when the participant was unknown or had already finished.
    pub newly_finished: bool,
    /// True the moment the last active participant finishes.
    pub race_over: bool,
}

/// One participant's share of a resolved overlap, ready to be sent out.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionReport {
    pub username: String,
    pub position: Vec2,
    pub collided_with: String,
}

pub struct SessionState {
    pub registry: Registry,
    phase: SessionPhase,
    finishing_order: Vec<String>,
    game_over_announced: bool,
}

impl SessionState {
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Registry::new(capacity),
            phase: SessionPhase::Waiting,
            finishing_order: Vec::new(),
            game_over_announced: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Identities in the order they finished the race.
    pub fn finishing_order(&self) -> &[String] {
        &self.finishing_order
    }

    /// Admits a participant and, when that fills the session while still
    /// waiting, flips the phase to `InProgress` exactly once.
    pub fn admit(
        &mut self,
        username: &str,
        connection: Connection,
    ) -> Result<Admitted, (Connection, AdmissionError)> {
        let (position, heading, color) = {
            let record = self.registry.admit(username, connection)?;
            (record.position, record.heading, record.color)
        };

        let starts_race = self.phase == SessionPhase::Waiting
            && self.registry.len() == self.registry.capacity();
        if starts_race {
            self.phase = SessionPhase::InProgress;
        }

        Ok(Admitted {
            position,
            heading,
            color,
            starts_race,
        })
    }

    /// Removes a participant and releases its connection. The last player
    /// out resets the session for the next group. Returns false for names
    /// that were already gone.
    pub fn remove(&mut self, username: &str) -> bool {
        match self.registry.remove(username) {
            Some(record) => {
                let ParticipantRecord { connection, .. } = record;
                connection.close();

                if self.registry.is_empty() {
                    self.phase = SessionPhase::Waiting;
                    self.finishing_order.clear();
                    self.game_over_announced = false;
                }
                true
            }
            None => {
                debug!("{} was already removed", username);
                false
            }
        }
    }

    /// Stores a participant's reported movement state.
    pub fn update_position(&mut self, username: &str, position: Vec2, heading: f32) -> bool {
        match self.registry.get_mut(username) {
            Some(record) => {
                record.position = position;
                record.heading = heading;
                true
            }
            None => false,
        }
    }

    /// Marks a checkpoint as passed. Returns true when that completed the
    /// lap, in which case the flags are cleared for the next one — so a
    /// full set fires exactly once, and repeating an index cannot fire
    /// early.
    pub fn record_checkpoint(&mut self, username: &str, checkpoint: u8) -> bool {
        let Some(record) = self.registry.get_mut(username) else {
            return false;
        };
        if checkpoint >= NUM_CHECKPOINTS {
            warn!(
                "{} reported checkpoint {} outside the track's {}",
                username, checkpoint, NUM_CHECKPOINTS
            );
            return false;
        }

        record.checkpoints.insert(checkpoint, true);

        let passed = record.checkpoints.values().filter(|p| **p).count();
        if passed == NUM_CHECKPOINTS as usize {
            record.checkpoints.clear();
            record.laps_completed += 1;
            return true;
        }
        false
    }

    /// Records a finish: flips the participant to `Finished` and appends it
    /// to the finishing order, once. `race_over` is reported exactly once,
    /// when the last active participant finishes.
    pub fn record_finish(&mut self, username: &str) -> FinishOutcome {
        let not_finished = FinishOutcome {
            newly_finished: false,
            race_over: false,
        };

        let Some(record) = self.registry.get_mut(username) else {
            return not_finished;
        };
        if record.progress == RaceProgress::Finished {
            debug!("{} already finished", username);
            return not_finished;
        }

        record.progress = RaceProgress::Finished;
        self.finishing_order.push(username.to_string());

        let race_over = !self.game_over_announced && self.everyone_finished();
        if race_over {
            self.game_over_announced = true;
        }

        FinishOutcome {
            newly_finished: true,
            race_over,
        }
    }

    /// A departure can leave only finished participants behind; when that
    /// ends the race, this reports it (once).
    pub fn race_over_after_departure(&mut self) -> bool {
        if self.phase != SessionPhase::InProgress
            || self.game_over_announced
            || self.registry.is_empty()
        {
            return false;
        }
        if self.everyone_finished() {
            self.game_over_announced = true;
            return true;
        }
        false
    }

    fn everyone_finished(&self) -> bool {
        self.registry
            .participants()
            .all(|r| r.progress == RaceProgress::Finished)
    }

    /// Runs the separation pass over every unordered pair of participants.
    /// Resolved positions are written back to the registry; the returned
    /// reports carry, per involved participant, its new position and the
    /// identity it hit.
    pub fn resolve_collisions(&mut self) -> Vec<CollisionReport> {
        let names = self.registry.usernames();
        let mut reports = Vec::new();

        for i in 0..names.len() {
            for j in (i + 1)..names.len() {
                let (Some(a), Some(b)) = (self.registry.get(&names[i]), self.registry.get(&names[j]))
                else {
                    continue;
                };

                let mut pos_a = a.position;
                let mut pos_b = b.position;

                if separate_cars(&mut pos_a, &mut pos_b) {
                    if let Some(a) = self.registry.get_mut(&names[i]) {
                        a.position = pos_a;
                    }
                    if let Some(b) = self.registry.get_mut(&names[j]) {
                        b.position = pos_b;
                    }

                    reports.push(CollisionReport {
                        username: names[i].clone(),
                        position: pos_a,
                        collided_with: names[j].clone(),
                    });
                    reports.push(CollisionReport {
                        username: names[j].clone(),
                        position: pos_b,
                        collided_with: names[i].clone(),
                    });
                }
            }
        }

        reports
    }
}
