//! Client-side mirror of the replicated session state
//!
//! Applies authoritative broadcasts in arrival order and turns them into
//! [`Notification`]s for the presentation layer. The mirror never derives
//! gameplay outcomes itself; it is what the `request_*` operations of the
//! controllers check their sender-side preconditions against.

use std::collections::HashMap;

use glam::Vec3;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::GameRules;
use crate::ws::protocol::{CharacterSnapshot, ServerMsg, WeaponSnapshot};

use super::geometry::Aabb;
use super::presentation::{perspective_of, Notification, PresentationSink};
use super::{CharacterId, WeaponId};

/// Mirrored character fields
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterReplica {
    pub character_id: CharacterId,
    pub display_name: String,
    pub position: Vec3,
    pub has_weapon: bool,
    /// Learned from attach/detach broadcasts
    pub held_weapon: Option<WeaponId>,
    pub bullet_count: u32,
    pub is_reloading: bool,
    pub hp: i32,
    pub is_dead: bool,
    pub score: u32,
    pub talking: bool,
}

impl CharacterReplica {
    fn from_snapshot(display_name: String, s: &CharacterSnapshot) -> Self {
        Self {
            character_id: s.character_id,
            display_name,
            position: s.position,
            has_weapon: s.has_weapon,
            held_weapon: None,
            bullet_count: s.bullet_count,
            is_reloading: s.is_reloading,
            hp: s.hp,
            is_dead: s.is_dead,
            score: s.score,
            talking: s.talking,
        }
    }
}

/// Mirrored weapon fields, kept in replication (scan) order
#[derive(Debug, Clone, PartialEq)]
pub struct WeaponReplica {
    pub weapon_id: WeaponId,
    pub position: Vec3,
    pub owner: Option<CharacterId>,
}

impl From<&WeaponSnapshot> for WeaponReplica {
    fn from(s: &WeaponSnapshot) -> Self {
        Self {
            weapon_id: s.weapon_id,
            position: s.position,
            owner: s.owner,
        }
    }
}

pub struct ReplicaView {
    me: CharacterId,
    session_id: Option<Uuid>,
    rules: GameRules,
    characters: HashMap<CharacterId, CharacterReplica>,
    weapons: Vec<WeaponReplica>,
    obstacles: Vec<Aabb>,
    last_snapshot_tick: u64,
    /// Local time the local reload gate closed
    reload_seen_at: Option<u64>,
}

impl ReplicaView {
    pub fn new(me: CharacterId) -> Self {
        Self {
            me,
            session_id: None,
            rules: GameRules::default(),
            characters: HashMap::new(),
            weapons: Vec::new(),
            obstacles: Vec::new(),
            last_snapshot_tick: 0,
            reload_seen_at: None,
        }
    }

    pub fn me(&self) -> CharacterId {
        self.me
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    /// The character this client owns, once joined
    pub fn local(&self) -> Option<&CharacterReplica> {
        self.characters.get(&self.me)
    }

    pub fn character(&self, id: CharacterId) -> Option<&CharacterReplica> {
        self.characters.get(&id)
    }

    pub fn weapons(&self) -> &[WeaponReplica] {
        &self.weapons
    }

    pub fn obstacles(&self) -> &[Aabb] {
        &self.obstacles
    }

    /// Mirror one authoritative broadcast
    pub fn apply(&mut self, msg: &ServerMsg, now_millis: u64, sink: &mut dyn PresentationSink) {
        match msg {
            ServerMsg::SessionJoined {
                session_id,
                character_id,
                rules,
                players,
                characters,
                weapons,
                obstacles,
            } => {
                if *character_id != self.me {
                    return;
                }
                let names: HashMap<CharacterId, &str> = players
                    .iter()
                    .map(|p| (p.character_id, p.display_name.as_str()))
                    .collect();

                self.session_id = Some(*session_id);
                self.rules = rules.clone();
                self.characters = characters
                    .iter()
                    .map(|s| {
                        let name = names.get(&s.character_id).copied().unwrap_or_default();
                        (s.character_id, CharacterReplica::from_snapshot(name.to_string(), s))
                    })
                    .collect();
                self.weapons = weapons.iter().map(WeaponReplica::from).collect();
                self.obstacles = obstacles.clone();
                self.reconcile_holders();
            }

            ServerMsg::CharacterSpawned { character, state } => {
                self.characters
                    .entry(character.character_id)
                    .or_insert_with(|| {
                        CharacterReplica::from_snapshot(character.display_name.clone(), state)
                    });
            }

            ServerMsg::CharacterLeft { character_id, .. } => {
                self.characters.remove(character_id);
            }

            ServerMsg::WeaponAttached {
                character_id,
                weapon_id,
            } => {
                if let Some(c) = self.characters.get_mut(character_id) {
                    c.has_weapon = true;
                    c.held_weapon = Some(*weapon_id);
                    c.is_reloading = false;
                }
                if *character_id == self.me {
                    self.reload_seen_at = None;
                }
                if let Some(w) = self.weapon_mut(*weapon_id) {
                    w.owner = Some(*character_id);
                }
                self.emit(
                    sink,
                    Notification::WeaponAttached {
                        subject: *character_id,
                        weapon_id: *weapon_id,
                    },
                );
            }

            ServerMsg::WeaponDetached {
                character_id,
                weapon_id,
                position,
            } => {
                if let Some(c) = self.characters.get_mut(character_id) {
                    c.has_weapon = false;
                    c.held_weapon = None;
                }
                if let Some(w) = self.weapon_mut(*weapon_id) {
                    w.owner = None;
                    w.position = *position;
                }
                self.emit(
                    sink,
                    Notification::WeaponDetached {
                        subject: *character_id,
                        weapon_id: *weapon_id,
                    },
                );
            }

            ServerMsg::FireResolved {
                character_id,
                hit_point,
                bullet_count,
                ..
            } => {
                if let Some(c) = self.characters.get_mut(character_id) {
                    c.bullet_count = *bullet_count;
                }
                self.emit(
                    sink,
                    Notification::BulletCountChanged {
                        subject: *character_id,
                        bullet_count: *bullet_count,
                    },
                );
                self.emit(
                    sink,
                    Notification::Fired {
                        subject: *character_id,
                        hit_point: *hit_point,
                    },
                );
            }

            ServerMsg::ReloadStarted { character_id } => {
                if let Some(c) = self.characters.get_mut(character_id) {
                    c.is_reloading = true;
                }
                if *character_id == self.me {
                    self.reload_seen_at = Some(now_millis);
                }
                self.emit(
                    sink,
                    Notification::ReloadStarted {
                        subject: *character_id,
                    },
                );
            }

            ServerMsg::AmmoReset {
                character_id,
                bullet_count,
            } => {
                if let Some(c) = self.characters.get_mut(character_id) {
                    c.is_reloading = false;
                    c.bullet_count = *bullet_count;
                }
                if *character_id == self.me {
                    self.reload_seen_at = None;
                }
                self.emit(
                    sink,
                    Notification::AmmoReset {
                        subject: *character_id,
                    },
                );
                self.emit(
                    sink,
                    Notification::BulletCountChanged {
                        subject: *character_id,
                        bullet_count: *bullet_count,
                    },
                );
            }

            ServerMsg::HpChanged {
                character_id,
                hp,
                ratio,
            } => {
                if let Some(c) = self.characters.get_mut(character_id) {
                    c.hp = *hp;
                }
                self.emit(
                    sink,
                    Notification::HpChanged {
                        subject: *character_id,
                        ratio: *ratio,
                    },
                );
            }

            ServerMsg::CharacterDied { character_id } => {
                if let Some(c) = self.characters.get_mut(character_id) {
                    c.is_dead = true;
                    c.is_reloading = false;
                }
                if *character_id == self.me {
                    self.reload_seen_at = None;
                }
                self.emit(
                    sink,
                    Notification::Died {
                        subject: *character_id,
                    },
                );
            }

            ServerMsg::ScoreChanged {
                character_id,
                score,
            } => {
                if let Some(c) = self.characters.get_mut(character_id) {
                    c.score = *score;
                }
                self.emit(
                    sink,
                    Notification::ScoreChanged {
                        subject: *character_id,
                        score: *score,
                    },
                );
            }

            ServerMsg::Chat {
                character_id,
                display_name,
                text,
                ..
            } => {
                self.emit(
                    sink,
                    Notification::ChatReceived {
                        subject: *character_id,
                        display_name: display_name.clone(),
                        text: text.clone(),
                    },
                );
            }

            ServerMsg::VoiceStateChanged {
                character_id,
                talking,
            } => {
                if let Some(c) = self.characters.get_mut(character_id) {
                    c.talking = *talking;
                }
                self.emit(
                    sink,
                    Notification::VoiceChanged {
                        subject: *character_id,
                        talking: *talking,
                    },
                );
            }

            ServerMsg::Snapshot {
                tick,
                characters,
                weapons,
            } => self.apply_snapshot(*tick, characters, weapons, now_millis, sink),

            ServerMsg::Error { code, message, .. } => {
                warn!(code = %code, message = %message, "Server reported an error");
            }

            ServerMsg::Welcome { .. } | ServerMsg::Pong { .. } => {}
        }
    }

    /// Open a local reload gate the server never closed.
    ///
    /// Returns true when the gate was released. Covers a lost `AmmoReset`
    /// (e.g. the server went away mid-reload).
    pub fn release_stale_reload(&mut self, now_millis: u64) -> bool {
        let limit = self.rules.reload_duration_ms * u64::from(self.rules.stale_reload_factor);
        let Some(seen_at) = self.reload_seen_at else {
            return false;
        };
        if now_millis.saturating_sub(seen_at) < limit {
            return false;
        }

        self.reload_seen_at = None;
        match self.characters.get_mut(&self.me) {
            Some(me) if me.is_reloading => {
                warn!(character_id = %self.me, "Releasing stale reload gate");
                me.is_reloading = false;
                true
            }
            _ => false,
        }
    }

    /// Reconcile with a periodic snapshot, notifying only real changes
    fn apply_snapshot(
        &mut self,
        tick: u64,
        characters: &[CharacterSnapshot],
        weapons: &[WeaponSnapshot],
        now_millis: u64,
        sink: &mut dyn PresentationSink,
    ) {
        if tick < self.last_snapshot_tick {
            debug!(tick, last = self.last_snapshot_tick, "Dropping out-of-order snapshot");
            return;
        }
        self.last_snapshot_tick = tick;

        let max_hp = self.rules.max_hp.max(1) as f32;
        let mut pending = Vec::new();

        for s in characters {
            let Some(c) = self.characters.get_mut(&s.character_id) else {
                continue;
            };

            if c.hp != s.hp {
                pending.push(Notification::HpChanged {
                    subject: s.character_id,
                    ratio: s.hp as f32 / max_hp,
                });
            }
            if c.bullet_count != s.bullet_count {
                pending.push(Notification::BulletCountChanged {
                    subject: s.character_id,
                    bullet_count: s.bullet_count,
                });
            }
            if s.is_dead && !c.is_dead {
                pending.push(Notification::Died {
                    subject: s.character_id,
                });
            }

            c.position = s.position;
            c.has_weapon = s.has_weapon;
            c.bullet_count = s.bullet_count;
            c.is_reloading = s.is_reloading;
            c.hp = s.hp;
            c.is_dead = c.is_dead || s.is_dead;
            c.score = s.score;
            c.talking = s.talking;
        }

        if let Some(me) = self.characters.get(&self.me) {
            match (me.is_reloading, self.reload_seen_at) {
                (true, None) => self.reload_seen_at = Some(now_millis),
                (false, Some(_)) => self.reload_seen_at = None,
                _ => {}
            }
        }

        self.weapons = weapons.iter().map(WeaponReplica::from).collect();
        self.reconcile_holders();

        for notification in pending {
            self.emit(sink, notification);
        }
    }

    /// Derive each character's held weapon from weapon ownership
    fn reconcile_holders(&mut self) {
        for c in self.characters.values_mut() {
            c.held_weapon = self
                .weapons
                .iter()
                .find(|w| w.owner == Some(c.character_id))
                .map(|w| w.weapon_id);
        }
    }

    fn weapon_mut(&mut self, id: WeaponId) -> Option<&mut WeaponReplica> {
        self.weapons.iter_mut().find(|w| w.weapon_id == id)
    }

    fn emit(&self, sink: &mut dyn PresentationSink, notification: Notification) {
        let perspective = perspective_of(self.me, notification.subject());
        sink.notify(perspective, &notification);
    }
}
