//! Authoritative combat state machine and its client mirror

pub mod authority;
pub mod character;
pub mod chat;
pub mod combat;
pub mod geometry;
pub mod health;
pub mod possession;
pub mod presentation;
pub mod reload;
pub mod replica;
pub mod session;
pub mod snapshot;

pub use authority::{Authority, Rejection};
pub use character::{CharacterState, WeaponEntity};
pub use presentation::{perspective_of, Notification, Perspective, PresentationSink};
pub use replica::ReplicaView;
pub use session::{GameSession, SessionError, SessionHandle, SessionRegistry};

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ws::protocol::ClientMsg;

/// Identity of a character; one per owning connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a weapon lying in (or held inside) the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeaponId(pub Uuid);

impl WeaponId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WeaponId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WeaponId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Intent received from a connection, queued for the session task
#[derive(Debug, Clone)]
pub struct PlayerIntent {
    pub character_id: CharacterId,
    pub msg: ClientMsg,
    pub received_at: u64,
}
