//! Authoritative character and weapon records

use glam::Vec3;

use crate::config::GameRules;
use crate::ws::protocol::{CharacterInfo, CharacterSnapshot, WeaponSnapshot};

use super::geometry::{view_direction, Aabb};
use super::{CharacterId, WeaponId};

/// Character state in a session (authoritative)
#[derive(Debug, Clone)]
pub struct CharacterState {
    pub id: CharacterId,
    pub display_name: String,

    // Possession
    pub has_weapon: bool,
    /// Server-only; clients learn it from attach/detach broadcasts
    pub held_weapon: Option<WeaponId>,

    // Ammo and reload gate
    pub bullet_count: u32,
    pub is_reloading: bool,
    pub reload_started_tick: Option<u64>,

    // Health
    pub hp: i32,
    pub is_dead: bool,
    pub movement_locked: bool,

    // View (movement replication)
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub last_view_seq: u32,

    // Stats
    pub score: u32,
    pub talking: bool,
}

impl CharacterState {
    /// Fresh character: full HP, full magazine, unarmed
    pub fn spawn(
        id: CharacterId,
        display_name: String,
        position: Vec3,
        yaw: f32,
        rules: &GameRules,
    ) -> Self {
        Self {
            id,
            display_name,
            has_weapon: false,
            held_weapon: None,
            bullet_count: rules.max_bullet_count,
            is_reloading: false,
            reload_started_tick: None,
            hp: rules.max_hp,
            is_dead: false,
            movement_locked: false,
            position,
            yaw,
            pitch: 0.0,
            last_view_seq: 0,
            score: 0,
            talking: false,
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.is_dead
    }

    /// Camera position the fire ray starts from
    pub fn view_origin(&self, rules: &GameRules) -> Vec3 {
        self.position + Vec3::Y * rules.eye_height
    }

    pub fn view_direction(&self) -> Vec3 {
        view_direction(self.yaw, self.pitch)
    }

    /// Capsule approximated by its bounding box, feet at `position`
    pub fn hit_box(&self, rules: &GameRules) -> Aabb {
        let half = Vec3::new(
            rules.capsule_radius,
            rules.capsule_half_height,
            rules.capsule_radius,
        );
        Aabb::from_center(self.position + Vec3::Y * rules.capsule_half_height, half)
    }

    pub fn info(&self) -> CharacterInfo {
        CharacterInfo {
            character_id: self.id,
            display_name: self.display_name.clone(),
        }
    }

    pub fn snapshot(&self) -> CharacterSnapshot {
        CharacterSnapshot {
            character_id: self.id,
            position: self.position,
            yaw: self.yaw,
            pitch: self.pitch,
            has_weapon: self.has_weapon,
            bullet_count: self.bullet_count,
            is_reloading: self.is_reloading,
            hp: self.hp,
            is_dead: self.is_dead,
            score: self.score,
            talking: self.talking,
        }
    }
}

/// Weapon lying in the arena or held by a character
#[derive(Debug, Clone)]
pub struct WeaponEntity {
    pub id: WeaponId,
    pub position: Vec3,
    /// Single source of truth for who may interact with this weapon
    pub owner: Option<CharacterId>,
}

impl WeaponEntity {
    pub fn new(position: Vec3) -> Self {
        Self {
            id: WeaponId::new(),
            position,
            owner: None,
        }
    }

    pub fn is_pickupable(&self) -> bool {
        self.owner.is_none()
    }

    pub fn snapshot(&self) -> WeaponSnapshot {
        WeaponSnapshot {
            weapon_id: self.id,
            position: self.position,
            owner: self.owner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_starts_full_and_unarmed() {
        let rules = GameRules::default();
        let c = CharacterState::spawn(CharacterId::new(), "a".into(), Vec3::ZERO, 0.0, &rules);
        assert_eq!(c.hp, rules.max_hp);
        assert_eq!(c.bullet_count, rules.max_bullet_count);
        assert!(!c.has_weapon);
        assert!(c.held_weapon.is_none());
        assert!(c.is_alive());
    }

    #[test]
    fn hit_box_stands_on_position() {
        let rules = GameRules::default();
        let c = CharacterState::spawn(
            CharacterId::new(),
            "a".into(),
            Vec3::new(10.0, 0.0, 10.0),
            0.0,
            &rules,
        );
        let bounds = c.hit_box(&rules);
        assert_eq!(bounds.min.y, 0.0);
        assert_eq!(bounds.max.y, rules.capsule_half_height * 2.0);
        assert!(bounds.contains(c.view_origin(&rules)));
    }
}
