//! Combat system - authoritative hit-scan fire, ammo and score

use glam::Vec3;
use tracing::debug;

use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::authority::{Authority, Rejection};
use super::health::HealthController;
use super::replica::ReplicaView;
use super::CharacterId;

/// Nearest blocking intersection of a fire ray
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceHit {
    pub distance: f32,
    pub point: Vec3,
    /// Character whose hit box was struck, `None` for static cover
    pub character: Option<CharacterId>,
}

pub struct CombatController;

impl CombatController {
    /// Client side: a fire intent carries no aim data; the server uses the
    /// requester's authoritative view.
    pub fn request_fire(view: &ReplicaView) -> Option<ClientMsg> {
        let me = view.local()?;
        let ready = me.has_weapon
            && me.held_weapon.is_some()
            && me.bullet_count > 0
            && !me.is_reloading
            && !me.is_dead;
        ready.then_some(ClientMsg::FireRequest)
    }

    /// Cast a ray from `origin` along `dir` and return the nearest blocker,
    /// skipping the shooter's own hit box.
    pub fn trace(
        world: &Authority,
        origin: Vec3,
        dir: Vec3,
        ignore: CharacterId,
    ) -> Option<TraceHit> {
        let range = world.rules.fire_range;

        let cover = world
            .obstacles
            .iter()
            .filter_map(|bounds| bounds.ray_entry(origin, dir, range))
            .map(|distance| (distance, None));

        let bodies = world
            .characters
            .values()
            .filter(|c| c.id != ignore)
            .filter_map(|c| {
                c.hit_box(&world.rules)
                    .ray_entry(origin, dir, range)
                    .map(|distance| (distance, Some(c.id)))
            });

        cover
            .chain(bodies)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(distance, character)| TraceHit {
                distance,
                point: origin + dir * distance,
                character,
            })
    }

    /// Resolve one shot for `requester`.
    ///
    /// Damage and score are applied here exactly once, before the outcome is
    /// broadcast; observers only mirror the result.
    pub fn apply_fire(
        world: &mut Authority,
        requester: CharacterId,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), Rejection> {
        let shooter = world.require(requester)?;
        if shooter.is_dead {
            return Err(Rejection::Dead);
        }
        if !shooter.has_weapon || shooter.held_weapon.is_none() {
            return Err(Rejection::Unarmed);
        }
        if shooter.is_reloading {
            return Err(Rejection::Reloading);
        }
        if shooter.bullet_count == 0 {
            return Err(Rejection::OutOfAmmo);
        }

        let origin = shooter.view_origin(&world.rules);
        let dir = shooter.view_direction();
        let hit = Self::trace(world, origin, dir, requester);

        // Corpses still block the ray but take no damage and give no score
        let victim = hit
            .and_then(|h| h.character)
            .filter(|id| world.character(*id).is_some_and(|c| c.is_alive()));

        if let Some(target) = victim {
            let damage = world.rules.damage_per_hit;
            HealthController::apply_damage(world, target, damage, out)?;

            let shooter = world.require_mut(requester)?;
            shooter.score += 1;
            out.push(ServerMsg::ScoreChanged {
                character_id: requester,
                score: shooter.score,
            });
        }

        let shooter = world.require_mut(requester)?;
        shooter.bullet_count = shooter.bullet_count.saturating_sub(1);
        let bullet_count = shooter.bullet_count;

        debug!(
            character_id = %requester,
            hit = hit.is_some(),
            victim = ?victim,
            bullet_count,
            "Shot resolved"
        );

        out.push(ServerMsg::FireResolved {
            character_id: requester,
            hit: hit.is_some(),
            hit_point: hit.map(|h| h.point),
            hit_character: victim,
            bullet_count,
        });
        Ok(())
    }
}
