//! Health: HP mutation and the terminal death transition

use tracing::info;

use crate::ws::protocol::ServerMsg;

use super::authority::{Authority, Rejection};
use super::character::CharacterState;
use super::possession::PossessionController;
use super::CharacterId;

pub struct HealthController;

impl HealthController {
    pub fn get_hp(character: &CharacterState) -> i32 {
        character.hp
    }

    /// Replace HP with `value` clamped to `[0, max_hp]`.
    ///
    /// Reaching zero is terminal: the character is marked dead, its weapon is
    /// force-detached, its reload gate cleared and its movement locked. A dead
    /// character's HP stays at zero whatever value is passed.
    pub fn set_hp(
        world: &mut Authority,
        target: CharacterId,
        value: i32,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), Rejection> {
        let max_hp = world.rules.max_hp;
        let character = world.require_mut(target)?;

        let hp = if character.is_dead {
            0
        } else {
            value.clamp(0, max_hp)
        };
        character.hp = hp;

        let died = hp <= 0 && !character.is_dead;
        if died {
            character.is_dead = true;
            character.movement_locked = true;
            character.is_reloading = false;
            character.reload_started_tick = None;
        }

        if died {
            PossessionController::force_detach(world, target, out);
        }

        out.push(ServerMsg::HpChanged {
            character_id: target,
            hp,
            ratio: hp as f32 / max_hp as f32,
        });

        if died {
            info!(character_id = %target, "Character died");
            out.push(ServerMsg::CharacterDied {
                character_id: target,
            });
        }
        Ok(())
    }

    /// Subtract `amount` from the target's HP
    pub fn apply_damage(
        world: &mut Authority,
        target: CharacterId,
        amount: i32,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), Rejection> {
        let max_hp = world.rules.max_hp;
        let current = Self::get_hp(world.require(target)?);
        let value = current.saturating_sub(amount).clamp(0, max_hp);
        Self::set_hp(world, target, value, out)
    }
}
