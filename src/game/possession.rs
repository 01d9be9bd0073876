//! Weapon possession: pickup, drop and forced detach
//!
//! A weapon's `owner` is the single source of truth for who may use it.
//! It is only written here, on the session task, so at most one character
//! holds a given weapon at any time.

use glam::Vec3;
use tracing::debug;

use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::authority::{Authority, Rejection};
use super::geometry::nearest_within;
use super::replica::ReplicaView;
use super::{CharacterId, WeaponId};

pub struct PossessionController;

impl PossessionController {
    /// Client side: scan replicated weapons around `search_origin` and ask for
    /// the nearest unowned one. `None` when the local character may not pick up.
    pub fn request_pickup(
        view: &ReplicaView,
        search_origin: Vec3,
        search_radius: f32,
    ) -> Option<ClientMsg> {
        let me = view.local()?;
        if me.has_weapon || me.is_reloading || me.is_dead {
            return None;
        }

        let candidates = view
            .weapons()
            .iter()
            .filter(|w| w.owner.is_none())
            .map(|w| (w.weapon_id, w.position));

        nearest_within(candidates, search_origin, search_radius)
            .map(|weapon_id| ClientMsg::PickupRequest { weapon_id })
    }

    /// Client side: drop the held weapon
    pub fn request_drop(view: &ReplicaView) -> Option<ClientMsg> {
        let me = view.local()?;
        if !me.has_weapon || me.is_reloading {
            return None;
        }
        me.held_weapon
            .map(|weapon_id| ClientMsg::DropRequest { weapon_id })
    }

    /// Attach `weapon_id` to `requester` after re-checking ownership and reach
    pub fn apply_pickup(
        world: &mut Authority,
        requester: CharacterId,
        weapon_id: WeaponId,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), Rejection> {
        let reach = world.rules.pickup_radius + world.rules.pickup_tolerance;
        let character = world.require(requester)?;
        if character.is_dead {
            return Err(Rejection::Dead);
        }
        if character.has_weapon {
            return Err(Rejection::AlreadyArmed);
        }
        if character.is_reloading {
            return Err(Rejection::Reloading);
        }
        let holder_position = character.position;

        let weapon = world
            .weapon(weapon_id)
            .ok_or(Rejection::UnknownWeapon(weapon_id))?;
        if !weapon.is_pickupable() {
            return Err(Rejection::WeaponOwned(weapon_id));
        }
        let distance = weapon.position.distance(holder_position);
        if distance > reach {
            return Err(Rejection::OutOfRange {
                distance,
                limit: reach,
            });
        }

        if let Some(weapon) = world.weapon_mut(weapon_id) {
            weapon.owner = Some(requester);
            weapon.position = holder_position;
        }

        let character = world.require_mut(requester)?;
        character.held_weapon = Some(weapon_id);
        character.has_weapon = true;
        character.is_reloading = false;
        character.reload_started_tick = None;

        debug!(character_id = %requester, weapon_id = %weapon_id, "Weapon attached");
        out.push(ServerMsg::WeaponAttached {
            character_id: requester,
            weapon_id,
        });
        Ok(())
    }

    /// Detach the weapon `requester` holds
    pub fn apply_drop(
        world: &mut Authority,
        requester: CharacterId,
        weapon_id: WeaponId,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), Rejection> {
        let character = world.require(requester)?;
        if character.is_dead {
            return Err(Rejection::Dead);
        }
        if character.is_reloading {
            return Err(Rejection::Reloading);
        }
        if !character.has_weapon {
            return Err(Rejection::Unarmed);
        }
        if character.held_weapon != Some(weapon_id) {
            return Err(Rejection::NotHolding(weapon_id));
        }

        Self::detach(world, requester, weapon_id, out);
        Ok(())
    }

    /// Release whatever `requester` holds, ignoring the reload gate.
    /// Used on death and on leave. Returns the released weapon.
    pub fn force_detach(
        world: &mut Authority,
        requester: CharacterId,
        out: &mut Vec<ServerMsg>,
    ) -> Option<WeaponId> {
        let weapon_id = world.character(requester)?.held_weapon?;
        Self::detach(world, requester, weapon_id, out);
        Some(weapon_id)
    }

    fn detach(
        world: &mut Authority,
        requester: CharacterId,
        weapon_id: WeaponId,
        out: &mut Vec<ServerMsg>,
    ) {
        if let Some(character) = world.characters.get_mut(&requester) {
            character.has_weapon = false;
            character.held_weapon = None;
        }

        let position = match world.weapon_mut(weapon_id) {
            Some(weapon) => {
                weapon.owner = None;
                weapon.position
            }
            None => Vec3::ZERO,
        };

        debug!(character_id = %requester, weapon_id = %weapon_id, "Weapon detached");
        out.push(ServerMsg::WeaponDetached {
            character_id: requester,
            weapon_id,
            position,
        });
    }
}
