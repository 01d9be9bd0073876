//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use chrono::{DateTime, Utc};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GameRules;
use crate::game::geometry::Aabb;
use crate::game::{CharacterId, WeaponId};

/// Messages sent from client to server (unvalidated intents)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Spawn a character in the session
    Join { display_name: String },

    /// Current view of the owning client (movement replication)
    ViewUpdate {
        /// Monotonic sequence, stale updates are dropped
        seq: u32,
        position: Vec3,
        /// Radians around the vertical axis
        yaw: f32,
        /// Radians, clamped to just under vertical
        pitch: f32,
    },

    /// Attach the named weapon to the requester
    PickupRequest { weapon_id: WeaponId },

    /// Detach the held weapon
    DropRequest { weapon_id: WeaponId },

    /// Fire along the requester's authoritative view (no client aim data)
    FireRequest,

    /// Start reloading
    ReloadRequest,

    /// Reload animation finished on the owning client
    AmmoResetRequest,

    /// Chat line
    ChatRequest { text: String },

    /// Push-to-talk pressed/released
    VoiceState { talking: bool },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave the session
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        character_id: CharacterId,
        server_time: u64,
    },

    /// Full state sent when a character enters the session
    SessionJoined {
        session_id: Uuid,
        /// The character that just joined
        character_id: CharacterId,
        rules: GameRules,
        players: Vec<CharacterInfo>,
        characters: Vec<CharacterSnapshot>,
        weapons: Vec<WeaponSnapshot>,
        obstacles: Vec<Aabb>,
    },

    /// Another character entered the session
    CharacterSpawned {
        character: CharacterInfo,
        state: CharacterSnapshot,
    },

    /// Character left the session
    CharacterLeft {
        character_id: CharacterId,
        reason: String,
    },

    /// Pickup accepted; weapon snaps to the holder's hand
    WeaponAttached {
        character_id: CharacterId,
        weapon_id: WeaponId,
    },

    /// Drop accepted (or forced); weapon resumes physics at `position`
    WeaponDetached {
        character_id: CharacterId,
        weapon_id: WeaponId,
        position: Vec3,
    },

    /// Authoritative fire outcome
    FireResolved {
        character_id: CharacterId,
        /// Whether the ray hit anything blocking
        hit: bool,
        hit_point: Option<Vec3>,
        /// Character that took damage, if any
        hit_character: Option<CharacterId>,
        bullet_count: u32,
    },

    /// Reload gate closed
    ReloadStarted { character_id: CharacterId },

    /// Magazine refilled, reload gate open
    AmmoReset {
        character_id: CharacterId,
        bullet_count: u32,
    },

    /// HP replicated; `ratio` is hp / max_hp
    HpChanged {
        character_id: CharacterId,
        hp: i32,
        ratio: f32,
    },

    /// Terminal death transition
    CharacterDied { character_id: CharacterId },

    /// Score after a hit was attributed
    ScoreChanged {
        character_id: CharacterId,
        score: u32,
    },

    /// Relayed chat line
    Chat {
        character_id: CharacterId,
        display_name: String,
        text: String,
        sent_at: DateTime<Utc>,
    },

    /// Talking indicator
    VoiceStateChanged {
        character_id: CharacterId,
        talking: bool,
    },

    /// Replicated fields snapshot (sent at regular intervals)
    Snapshot {
        /// Server tick number
        tick: u64,
        characters: Vec<CharacterSnapshot>,
        weapons: Vec<WeaponSnapshot>,
    },

    /// Error message
    Error {
        /// Recipient, or everyone when absent
        character_id: Option<CharacterId>,
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    /// Whether a connection owning `character_id` should receive this message
    pub fn is_for(&self, character_id: CharacterId) -> bool {
        match self {
            ServerMsg::Error {
                character_id: Some(target),
                ..
            } => *target == character_id,
            _ => true,
        }
    }
}

/// Static character info for join/spawn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterInfo {
    pub character_id: CharacterId,
    pub display_name: String,
}

/// Replicated character fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    pub character_id: CharacterId,
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub has_weapon: bool,
    pub bullet_count: u32,
    pub is_reloading: bool,
    pub hp: i32,
    pub is_dead: bool,
    pub score: u32,
    pub talking: bool,
}

/// Replicated weapon fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponSnapshot {
    pub weapon_id: WeaponId,
    pub position: Vec3,
    pub owner: Option<CharacterId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_intents_use_snake_case_tags() {
        let fire: ClientMsg = serde_json::from_str(r#"{"type":"fire_request"}"#).unwrap();
        assert_eq!(fire, ClientMsg::FireRequest);

        let chat: ClientMsg =
            serde_json::from_str(r#"{"type":"chat_request","text":"gg"}"#).unwrap();
        assert_eq!(
            chat,
            ClientMsg::ChatRequest {
                text: "gg".to_string()
            }
        );

        let view: ClientMsg = serde_json::from_str(
            r#"{"type":"view_update","seq":4,"position":[1.0,2.0,3.0],"yaw":0.5,"pitch":0.0}"#,
        )
        .unwrap();
        assert!(matches!(view, ClientMsg::ViewUpdate { seq: 4, .. }));
    }

    #[test]
    fn fire_resolved_serializes_optional_hit_point() {
        let msg = ServerMsg::FireResolved {
            character_id: CharacterId(Uuid::nil()),
            hit: false,
            hit_point: None,
            hit_character: None,
            bullet_count: 20,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "fire_resolved");
        assert_eq!(json["bullet_count"], 20);
        assert!(json["hit_point"].is_null());
    }

    #[test]
    fn targeted_errors_reach_only_their_recipient() {
        let me = CharacterId::new();
        let other = CharacterId::new();
        let msg = ServerMsg::Error {
            character_id: Some(me),
            code: "session_full".to_string(),
            message: "Session is full".to_string(),
        };
        assert!(msg.is_for(me));
        assert!(!msg.is_for(other));
        assert!(ServerMsg::CharacterDied { character_id: other }.is_for(me));
    }
}
