//! # Racing Client Library
//!
//! The network-facing half of a racing client: it joins a session, keeps a
//! read-only snapshot of every car the server talks about, and surfaces
//! the race's discrete events. Rendering, input devices and track assets
//! are deliberately not here — a presentation layer embeds this crate,
//! draws from [`game::RaceState`] and pushes its own movement and
//! checkpoint reports through [`network::RaceClient`].
//!
//! ## Module Organization
//!
//! - [`network`] — TCP connect, the bounded join handshake, framed sends
//!   and the event pump.
//! - [`game`] — the local `RaceState`: roster, laps, race position, final
//!   placements, and the `RaceEvent`s a presentation layer reacts to.

pub mod game;
pub mod network;
