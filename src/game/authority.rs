//! Authoritative world state for one session
//!
//! Every mutation of character or weapon state happens here, on the session
//! task, one intent at a time. Controllers validate an intent against the
//! current state, apply it, and append the outcome to an outbox of
//! [`ServerMsg`] broadcasts which the session forwards to every observer in
//! issue order.

use std::collections::HashMap;

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GameRules;
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::character::{CharacterState, WeaponEntity};
use super::chat::ChatRelay;
use super::combat::CombatController;
use super::geometry::{Aabb, MAX_PITCH};
use super::possession::PossessionController;
use super::reload::ReloadController;
use super::session::SessionError;
use super::{CharacterId, WeaponId};

/// Why an intent was not applied. Never sent to the client; logged only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("unknown character {0}")]
    UnknownCharacter(CharacterId),

    #[error("unknown weapon {0}")]
    UnknownWeapon(WeaponId),

    #[error("character is dead")]
    Dead,

    #[error("character already holds a weapon")]
    AlreadyArmed,

    #[error("character holds no weapon")]
    Unarmed,

    #[error("weapon {0} is owned by another character")]
    WeaponOwned(WeaponId),

    #[error("weapon {0} is not held by the requester")]
    NotHolding(WeaponId),

    #[error("weapon out of reach ({distance:.1} > {limit:.1})")]
    OutOfRange { distance: f32, limit: f32 },

    #[error("reload in progress")]
    Reloading,

    #[error("no reload in progress")]
    NotReloading,

    #[error("reload incomplete ({elapsed}/{required} ticks)")]
    ReloadIncomplete { elapsed: u64, required: u64 },

    #[error("magazine empty")]
    OutOfAmmo,

    #[error("empty chat message")]
    EmptyChat,

    #[error("stale view update")]
    StaleView,

    #[error("malformed view update")]
    MalformedView,

    #[error("message is not a gameplay intent")]
    Unroutable,
}

/// Authoritative state of one session
pub struct Authority {
    pub(crate) id: Uuid,
    pub(crate) rules: GameRules,
    pub(crate) tick: u64,
    pub(crate) characters: HashMap<CharacterId, CharacterState>,
    /// Kept in spawn order, which is also the replicated scan order
    pub(crate) weapons: Vec<WeaponEntity>,
    pub(crate) obstacles: Vec<Aabb>,
    rng: ChaCha8Rng,
}

impl Authority {
    /// Create a session with a seeded random arena
    pub fn new(id: Uuid, rules: GameRules) -> Self {
        let seed = rules.arena_seed.unwrap_or_else(rand::random);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let spread = rules.arena_half_extent * 0.8;

        let obstacles = (0..rules.obstacle_count)
            .map(|_| {
                let half = Vec3::new(
                    rng.gen_range(50.0..200.0),
                    rng.gen_range(50.0..150.0),
                    rng.gen_range(50.0..200.0),
                );
                let center = Vec3::new(
                    rng.gen_range(-spread..spread),
                    half.y,
                    rng.gen_range(-spread..spread),
                );
                Aabb::from_center(center, half)
            })
            .collect();

        let weapons = (0..rules.weapon_count)
            .map(|_| {
                Vec3::new(
                    rng.gen_range(-spread..spread),
                    0.0,
                    rng.gen_range(-spread..spread),
                )
            })
            .collect();

        info!(session_id = %id, seed, "Arena generated");
        Self::with_layout(id, rules, weapons, obstacles, rng)
    }

    /// Create a session with an explicit arena layout
    pub fn with_layout(
        id: Uuid,
        rules: GameRules,
        weapon_positions: Vec<Vec3>,
        obstacles: Vec<Aabb>,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            id,
            rules,
            tick: 0,
            characters: HashMap::new(),
            weapons: weapon_positions.into_iter().map(WeaponEntity::new).collect(),
            obstacles,
            rng,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn character(&self, id: CharacterId) -> Option<&CharacterState> {
        self.characters.get(&id)
    }

    pub fn characters(&self) -> impl Iterator<Item = &CharacterState> {
        self.characters.values()
    }

    pub fn character_count(&self) -> usize {
        self.characters.len()
    }

    pub fn weapon(&self, id: WeaponId) -> Option<&WeaponEntity> {
        self.weapons.iter().find(|w| w.id == id)
    }

    pub fn weapons(&self) -> &[WeaponEntity] {
        &self.weapons
    }

    pub fn obstacles(&self) -> &[Aabb] {
        &self.obstacles
    }

    pub(crate) fn require(&self, id: CharacterId) -> Result<&CharacterState, Rejection> {
        self.characters.get(&id).ok_or(Rejection::UnknownCharacter(id))
    }

    pub(crate) fn require_mut(&mut self, id: CharacterId) -> Result<&mut CharacterState, Rejection> {
        self.characters
            .get_mut(&id)
            .ok_or(Rejection::UnknownCharacter(id))
    }

    pub(crate) fn weapon_mut(&mut self, id: WeaponId) -> Option<&mut WeaponEntity> {
        self.weapons.iter_mut().find(|w| w.id == id)
    }

    /// Spawn a character at a random free spot
    pub fn join(
        &mut self,
        id: CharacterId,
        display_name: String,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), SessionError> {
        let (position, yaw) = self.generate_spawn();
        self.spawn_at(id, display_name, position, yaw, out)
    }

    /// Spawn a character at an explicit position
    pub fn spawn_at(
        &mut self,
        id: CharacterId,
        display_name: String,
        position: Vec3,
        yaw: f32,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), SessionError> {
        if self.characters.contains_key(&id) {
            return Err(SessionError::AlreadyJoined);
        }
        if self.characters.len() >= self.rules.max_characters {
            return Err(SessionError::Full);
        }

        let character = CharacterState::spawn(id, display_name, position, yaw, &self.rules);
        let info = character.info();
        let state = character.snapshot();
        self.characters.insert(id, character);

        out.push(ServerMsg::CharacterSpawned {
            character: info,
            state,
        });
        out.push(ServerMsg::SessionJoined {
            session_id: self.id,
            character_id: id,
            rules: self.rules.clone(),
            players: self.characters.values().map(|c| c.info()).collect(),
            characters: self.characters.values().map(|c| c.snapshot()).collect(),
            weapons: self.weapons.iter().map(|w| w.snapshot()).collect(),
            obstacles: self.obstacles.clone(),
        });

        info!(
            session_id = %self.id,
            character_id = %id,
            character_count = self.characters.len(),
            "Character joined session"
        );
        Ok(())
    }

    /// Remove a character, releasing any weapon it holds
    pub fn leave(&mut self, id: CharacterId, reason: &str, out: &mut Vec<ServerMsg>) {
        if !self.characters.contains_key(&id) {
            return;
        }

        PossessionController::force_detach(self, id, out);
        self.characters.remove(&id);

        out.push(ServerMsg::CharacterLeft {
            character_id: id,
            reason: reason.to_string(),
        });

        info!(session_id = %self.id, character_id = %id, reason, "Character left session");
    }

    /// Validate and apply one gameplay intent
    pub fn handle(
        &mut self,
        requester: CharacterId,
        msg: ClientMsg,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), Rejection> {
        match msg {
            ClientMsg::ViewUpdate {
                seq,
                position,
                yaw,
                pitch,
            } => self.apply_view_update(requester, seq, position, yaw, pitch),
            ClientMsg::PickupRequest { weapon_id } => {
                PossessionController::apply_pickup(self, requester, weapon_id, out)
            }
            ClientMsg::DropRequest { weapon_id } => {
                PossessionController::apply_drop(self, requester, weapon_id, out)
            }
            ClientMsg::FireRequest => CombatController::apply_fire(self, requester, out),
            ClientMsg::ReloadRequest => ReloadController::apply_reload(self, requester, out),
            ClientMsg::AmmoResetRequest => {
                ReloadController::apply_ammo_reset_request(self, requester, out)
            }
            ClientMsg::ChatRequest { text } => ChatRelay::apply_chat(self, requester, &text, out),
            ClientMsg::VoiceState { talking } => {
                ChatRelay::apply_voice(self, requester, talking, out)
            }
            ClientMsg::Join { .. } | ClientMsg::Ping { .. } | ClientMsg::Leave => {
                Err(Rejection::Unroutable)
            }
        }
    }

    /// Advance one simulation tick and fire due reload timers
    pub fn advance_tick(&mut self, out: &mut Vec<ServerMsg>) {
        self.tick += 1;
        ReloadController::tick_timers(self, out);
    }

    /// Store the owning client's view; movement is ignored once locked
    fn apply_view_update(
        &mut self,
        id: CharacterId,
        seq: u32,
        position: Vec3,
        yaw: f32,
        pitch: f32,
    ) -> Result<(), Rejection> {
        if !position.is_finite() || !yaw.is_finite() || !pitch.is_finite() {
            return Err(Rejection::MalformedView);
        }

        let half = self.rules.arena_half_extent;
        let character = self.require_mut(id)?;
        if seq <= character.last_view_seq {
            return Err(Rejection::StaleView);
        }
        character.last_view_seq = seq;
        character.yaw = yaw;
        character.pitch = pitch.clamp(-MAX_PITCH, MAX_PITCH);

        if character.movement_locked {
            return Ok(());
        }

        let clamped = position.clamp(Vec3::new(-half, 0.0, -half), Vec3::splat(half));
        character.position = clamped;

        let held = character.held_weapon;
        if let Some(weapon_id) = held {
            if let Some(weapon) = self.weapon_mut(weapon_id) {
                weapon.position = clamped;
            }
        }
        Ok(())
    }

    fn generate_spawn(&mut self) -> (Vec3, f32) {
        let spread = self.rules.arena_half_extent * 0.8;
        let mut position = Vec3::ZERO;
        for _ in 0..8 {
            position = Vec3::new(
                self.rng.gen_range(-spread..spread),
                0.0,
                self.rng.gen_range(-spread..spread),
            );
            let point = position + Vec3::Y;
            if !self.obstacles.iter().any(|o| o.contains(point)) {
                break;
            }
            debug!(session_id = %self.id, "Spawn point blocked, retrying");
        }
        let yaw = self.rng.gen_range(0.0..std::f32::consts::TAU);
        (position, yaw)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Arena with one weapon at each given position and no cover
    pub(crate) fn arena(weapons: Vec<Vec3>) -> Authority {
        Authority::with_layout(
            Uuid::new_v4(),
            GameRules::default(),
            weapons,
            Vec::new(),
            ChaCha8Rng::seed_from_u64(7),
        )
    }

    pub(crate) fn spawn(world: &mut Authority, position: Vec3, yaw: f32) -> CharacterId {
        let id = CharacterId::new();
        let mut out = Vec::new();
        world
            .spawn_at(id, format!("c{}", world.character_count()), position, yaw, &mut out)
            .unwrap();
        id
    }

    #[test]
    fn join_broadcasts_spawn_then_full_state() {
        let mut world = arena(vec![Vec3::ZERO]);
        let id = CharacterId::new();
        let mut out = Vec::new();
        world.join(id, "alice".into(), &mut out).unwrap();

        assert!(matches!(out[0], ServerMsg::CharacterSpawned { .. }));
        match &out[1] {
            ServerMsg::SessionJoined {
                character_id,
                weapons,
                ..
            } => {
                assert_eq!(*character_id, id);
                assert_eq!(weapons.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(world.join(id, "again".into(), &mut out), Err(SessionError::AlreadyJoined));
    }

    #[test]
    fn full_session_refuses_join() {
        let mut world = Authority::with_layout(
            Uuid::new_v4(),
            GameRules {
                max_characters: 1,
                ..GameRules::default()
            },
            Vec::new(),
            Vec::new(),
            ChaCha8Rng::seed_from_u64(1),
        );
        let mut out = Vec::new();
        world.join(CharacterId::new(), "a".into(), &mut out).unwrap();
        assert_eq!(
            world.join(CharacterId::new(), "b".into(), &mut out),
            Err(SessionError::Full)
        );
    }

    #[test]
    fn seeded_arenas_are_reproducible() {
        let rules = GameRules {
            arena_seed: Some(42),
            ..GameRules::default()
        };
        let a = Authority::new(Uuid::new_v4(), rules.clone());
        let b = Authority::new(Uuid::new_v4(), rules);
        let pa: Vec<Vec3> = a.weapons().iter().map(|w| w.position).collect();
        let pb: Vec<Vec3> = b.weapons().iter().map(|w| w.position).collect();
        assert_eq!(pa, pb);
        assert_eq!(a.obstacles(), b.obstacles());
    }

    #[test]
    fn view_updates_drop_stale_sequences() {
        let mut world = arena(Vec::new());
        let id = spawn(&mut world, Vec3::ZERO, 0.0);
        let mut out = Vec::new();

        let update = |seq, x| ClientMsg::ViewUpdate {
            seq,
            position: Vec3::new(x, 0.0, 0.0),
            yaw: 1.0,
            pitch: 3.0,
        };

        world.handle(id, update(2, 100.0), &mut out).unwrap();
        assert_eq!(world.handle(id, update(1, 500.0), &mut out), Err(Rejection::StaleView));

        let c = world.character(id).unwrap();
        assert_eq!(c.position.x, 100.0);
        assert!(c.pitch <= MAX_PITCH);
        assert!(out.is_empty());
    }

    #[test]
    fn locked_movement_still_allows_looking() {
        let mut world = arena(Vec::new());
        let id = spawn(&mut world, Vec3::ZERO, 0.0);
        world.characters.get_mut(&id).unwrap().movement_locked = true;

        let mut out = Vec::new();
        world
            .handle(
                id,
                ClientMsg::ViewUpdate {
                    seq: 1,
                    position: Vec3::new(300.0, 0.0, 0.0),
                    yaw: 2.0,
                    pitch: 0.0,
                },
                &mut out,
            )
            .unwrap();

        let c = world.character(id).unwrap();
        assert_eq!(c.position, Vec3::ZERO);
        assert_eq!(c.yaw, 2.0);
    }

    #[test]
    fn non_intents_are_unroutable() {
        let mut world = arena(Vec::new());
        let id = spawn(&mut world, Vec3::ZERO, 0.0);
        let mut out = Vec::new();
        assert_eq!(
            world.handle(id, ClientMsg::Ping { t: 1 }, &mut out),
            Err(Rejection::Unroutable)
        );
    }

    #[test]
    fn non_finite_views_are_malformed() {
        let mut world = arena(Vec::new());
        let id = spawn(&mut world, Vec3::ZERO, 0.0);
        let mut out = Vec::new();

        let bad_yaw = ClientMsg::ViewUpdate {
            seq: 1,
            position: Vec3::new(50.0, 0.0, 0.0),
            yaw: f32::NAN,
            pitch: 0.0,
        };
        assert_eq!(world.handle(id, bad_yaw, &mut out), Err(Rejection::MalformedView));

        let bad_position = ClientMsg::ViewUpdate {
            seq: 2,
            position: Vec3::new(f32::INFINITY, 0.0, 0.0),
            yaw: 0.0,
            pitch: 0.0,
        };
        assert_eq!(
            world.handle(id, bad_position, &mut out),
            Err(Rejection::MalformedView)
        );

        let c = world.character(id).unwrap();
        assert_eq!(c.position, Vec3::ZERO);
        assert_eq!(c.last_view_seq, 0);
        assert!(out.is_empty());
    }
}
