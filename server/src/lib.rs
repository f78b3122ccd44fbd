//! # Racing Session Server Library
//!
//! Authoritative server for a fixed-size real-time racing session. It
//! admits players over TCP, hands each a starting slot (grid position and
//! car color), relays movement among everyone connected, pushes
//! overlapping cars apart, tracks checkpoint and lap progression, and
//! announces the finishing order when the race is done.
//!
//! ## Architecture
//!
//! ### Single Owning Loop
//! One task owns the `SessionState` — registry, phase, finishing order —
//! for the whole process lifetime. The listener and one reader task per
//! connection forward events into that loop over a channel, so every state
//! mutation happens on one logical thread and no locks are needed. The
//! loop suspends only while waiting for the next event; everything within
//! an iteration runs to completion, ending with one collision pass.
//!
//! ### Admission
//! A connection's very first frame must introduce the player. The server
//! refuses names that are taken (or reserved for itself) and connections
//! beyond the configured capacity; refusals are answered politely and the
//! socket is closed without ever entering the registry. The moment the
//! registry fills, the race starts — once.
//!
//! ### Relaying
//! Movement updates and race-position messages fan out to every other
//! participant. Per-recipient delivery failures are logged and skipped;
//! a broken connection is only ever cleaned up by its own reader noticing
//! the close, which also tells the remaining players who left.
//!
//! ## Module Organization
//!
//! - [`registry`] — participant records, slot/color assignment, and
//!   exclusive ownership of connection handles.
//! - [`session`] — the process-wide session state machine: phase, lap
//!   progression, finishing order, and the collision pass.
//! - [`network`] — the TCP listener, reader tasks, broadcast routing and
//!   the event loop itself.

pub mod network;
pub mod registry;
pub mod session;
