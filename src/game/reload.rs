//! Reload gate and server-owned reload timer

use tracing::debug;

use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::authority::{Authority, Rejection};
use super::replica::ReplicaView;
use super::CharacterId;

pub struct ReloadController;

impl ReloadController {
    /// Client side: ask to reload unless already reloading
    pub fn request_reload(view: &ReplicaView) -> Option<ClientMsg> {
        let me = view.local()?;
        if me.is_reloading || me.is_dead {
            return None;
        }
        Some(ClientMsg::ReloadRequest)
    }

    /// Client side: the reload animation finished locally
    pub fn request_ammo_reset(view: &ReplicaView) -> Option<ClientMsg> {
        let me = view.local()?;
        me.is_reloading.then_some(ClientMsg::AmmoResetRequest)
    }

    /// Close the reload gate and start the timer. Ammo is not refilled yet.
    pub fn apply_reload(
        world: &mut Authority,
        requester: CharacterId,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), Rejection> {
        let now = world.tick;
        let character = world.require_mut(requester)?;
        if character.is_dead {
            return Err(Rejection::Dead);
        }
        if character.is_reloading {
            return Err(Rejection::Reloading);
        }

        character.is_reloading = true;
        character.reload_started_tick = Some(now);

        debug!(character_id = %requester, tick = now, "Reload started");
        out.push(ServerMsg::ReloadStarted {
            character_id: requester,
        });
        Ok(())
    }

    /// Refill the magazine and open the reload gate
    pub fn apply_init_ammo(
        world: &mut Authority,
        requester: CharacterId,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), Rejection> {
        let max_bullet_count = world.rules.max_bullet_count;
        let character = world.require_mut(requester)?;

        character.bullet_count = max_bullet_count;
        character.is_reloading = false;
        character.reload_started_tick = None;

        debug!(character_id = %requester, "Ammo reset");
        out.push(ServerMsg::AmmoReset {
            character_id: requester,
            bullet_count: max_bullet_count,
        });
        Ok(())
    }

    /// Client-reported reload completion; honoured only once the server
    /// timer agrees the reload has lasted long enough.
    pub fn apply_ammo_reset_request(
        world: &mut Authority,
        requester: CharacterId,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), Rejection> {
        let required = world.rules.reload_ticks();
        let character = world.require(requester)?;
        let started = match (character.is_reloading, character.reload_started_tick) {
            (true, Some(started)) => started,
            _ => return Err(Rejection::NotReloading),
        };

        let elapsed = world.tick.saturating_sub(started);
        if elapsed < required {
            return Err(Rejection::ReloadIncomplete { elapsed, required });
        }
        Self::apply_init_ammo(world, requester, out)
    }

    /// Finish every reload whose duration has elapsed
    pub fn tick_timers(world: &mut Authority, out: &mut Vec<ServerMsg>) {
        let required = world.rules.reload_ticks();
        let now = world.tick;

        let mut due: Vec<CharacterId> = world
            .characters
            .values()
            .filter(|c| c.is_reloading)
            .filter(|c| {
                c.reload_started_tick
                    .is_some_and(|started| now.saturating_sub(started) >= required)
            })
            .map(|c| c.id)
            .collect();
        // Stable broadcast order regardless of map iteration
        due.sort_unstable();

        for id in due {
            let _ = Self::apply_init_ammo(world, id, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::tests::{arena, spawn};
    use crate::game::combat::CombatController;
    use crate::game::possession::PossessionController;
    use glam::Vec3;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn armed(world: &mut Authority) -> CharacterId {
        let weapon_id = world.weapons()[0].id;
        let id = spawn(world, Vec3::ZERO, 0.0);
        let mut out = Vec::new();
        PossessionController::apply_pickup(world, id, weapon_id, &mut out).unwrap();
        id
    }

    #[test]
    fn reload_gate_blocks_fire_reload_and_drop() {
        let mut world = arena(vec![Vec3::ZERO]);
        let me = armed(&mut world);
        let weapon_id = world.weapons()[0].id;
        let mut out = Vec::new();
        CombatController::apply_fire(&mut world, me, &mut out).unwrap();

        ReloadController::apply_reload(&mut world, me, &mut out).unwrap();
        out.clear();

        assert_eq!(
            CombatController::apply_fire(&mut world, me, &mut out),
            Err(Rejection::Reloading)
        );
        assert_eq!(
            ReloadController::apply_reload(&mut world, me, &mut out),
            Err(Rejection::Reloading)
        );
        assert_eq!(
            PossessionController::apply_drop(&mut world, me, weapon_id, &mut out),
            Err(Rejection::Reloading)
        );
        assert!(out.is_empty());
        // Ammo is not refilled when the reload starts
        assert_eq!(world.character(me).unwrap().bullet_count, 20);

        ReloadController::apply_init_ammo(&mut world, me, &mut out).unwrap();
        assert_eq!(world.character(me).unwrap().bullet_count, 21);
        CombatController::apply_fire(&mut world, me, &mut out).unwrap();
    }

    #[test]
    fn timer_refills_after_configured_duration() {
        let mut world = arena(vec![Vec3::ZERO]);
        let me = armed(&mut world);
        let required = world.rules().reload_ticks();
        let mut out = Vec::new();

        ReloadController::apply_reload(&mut world, me, &mut out).unwrap();
        out.clear();

        for _ in 0..required - 1 {
            world.advance_tick(&mut out);
        }
        assert!(world.character(me).unwrap().is_reloading);
        assert!(out.is_empty());

        world.advance_tick(&mut out);
        assert!(!world.character(me).unwrap().is_reloading);
        assert_eq!(
            out,
            vec![ServerMsg::AmmoReset {
                character_id: me,
                bullet_count: 21
            }]
        );
    }

    #[test]
    fn early_client_completion_is_ignored() {
        let mut world = arena(vec![Vec3::ZERO]);
        let me = armed(&mut world);
        let mut out = Vec::new();

        assert_eq!(
            ReloadController::apply_ammo_reset_request(&mut world, me, &mut out),
            Err(Rejection::NotReloading)
        );

        ReloadController::apply_reload(&mut world, me, &mut out).unwrap();
        world.tick += 1;
        assert!(matches!(
            ReloadController::apply_ammo_reset_request(&mut world, me, &mut out),
            Err(Rejection::ReloadIncomplete { elapsed: 1, .. })
        ));

        world.tick += world.rules().reload_ticks();
        ReloadController::apply_ammo_reset_request(&mut world, me, &mut out).unwrap();
        assert!(!world.character(me).unwrap().is_reloading);
    }

    #[test]
    fn death_clears_the_reload_gate() {
        let mut world = arena(vec![Vec3::ZERO]);
        let me = armed(&mut world);
        let mut out = Vec::new();
        ReloadController::apply_reload(&mut world, me, &mut out).unwrap();

        crate::game::health::HealthController::set_hp(&mut world, me, 0, &mut out).unwrap();

        let c = world.character(me).unwrap();
        assert!(!c.is_reloading);
        assert!(c.reload_started_tick.is_none());
        assert!(!c.has_weapon);
    }

    #[test]
    fn ammo_stays_in_bounds_for_random_fire_and_reset_sequences() {
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let mut world = arena(vec![Vec3::ZERO]);
        let me = armed(&mut world);
        let max = world.rules().max_bullet_count;
        let mut out = Vec::new();

        for _ in 0..5_000 {
            let _ = match rng.gen_range(0..4) {
                0 | 1 => CombatController::apply_fire(&mut world, me, &mut out),
                2 => ReloadController::apply_reload(&mut world, me, &mut out),
                _ => ReloadController::apply_init_ammo(&mut world, me, &mut out),
            };
            world.advance_tick(&mut out);
            let count = world.character(me).unwrap().bullet_count;
            assert!(count <= max);
        }
    }

    #[test]
    fn dead_character_cannot_reload() {
        let mut world = arena(vec![Vec3::ZERO]);
        let me = armed(&mut world);
        let mut out = Vec::new();
        crate::game::health::HealthController::set_hp(&mut world, me, 0, &mut out).unwrap();
        out.clear();

        assert_eq!(
            ReloadController::apply_reload(&mut world, me, &mut out),
            Err(Rejection::Dead)
        );
        assert!(out.is_empty());
        assert!(!world.character(me).unwrap().is_reloading);
    }
}
