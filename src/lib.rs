//! Arena Combat Server - authoritative weapon and combat state for
//! multiplayer third-person shooter sessions
//!
//! The server owns every gameplay decision (possession, firing, damage,
//! reload, score). Clients mirror the replicated state through
//! [`game::ReplicaView`] and only send intents.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
