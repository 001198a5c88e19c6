use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::attack::{execute_attack, WeaponArchetype};
use crate::hit_detection::{deal_damage, CombatServices};
use crate::projectile::{spawn_projectile, ProjectileParams};
use crate::weapon::WeaponStats;
use crate::{facing_direction, Team};

/// Backstop for TriggerAttack recursion. The cycle-breaking rule in
/// [`child_effect_list`] is the primary guarantee; this cap bounds any chain
/// an author builds out of mutually-triggering attacks.
pub const MAX_EFFECT_DEPTH: u8 = 4;

/// Child projectiles appear slightly above the impact point so they do not
/// spawn intersecting the target that was just hit.
pub const CHILD_PROJECTILE_UP_OFFSET: f32 = 0.5;

/// One reaction to a projectile hit. Immutable data referenced by weapon
/// definitions; projectiles carry cloned lists, never references into live
/// stats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum HitEffect {
    /// Flat damage, independent of the projectile's own base damage.
    DirectDamage { amount: f32 },
    /// Re-invoke an attack strategy from a transient firing point anchored
    /// at the hit position, using the node's own override stats.
    TriggerAttack {
        archetype: WeaponArchetype,
        stats: WeaponStats,
    },
    /// Spawn a new projectile at the hit position carrying a freshly
    /// computed effect list (see [`child_effect_list`]).
    SpawnChildProjectile {
        speed: f32,
        range: f32,
        #[serde(default)]
        inherit_weapon_effects: bool,
        #[serde(default)]
        extra_effects: Vec<HitEffect>,
    },
}

/// Compute the effect list for a child projectile: the node's own extras
/// plus, when inheritance is enabled, the attacker's current live weapon
/// effects minus every `SpawnChildProjectile` node. The exclusion is the
/// cycle-breaking rule: a weapon whose effect list references its own spawn
/// node must terminate after one spawn generation.
pub fn child_effect_list(extra: &[HitEffect], inherited: Option<&[HitEffect]>) -> Vec<HitEffect> {
    let mut effects = extra.to_vec();
    if let Some(inherited) = inherited {
        effects.extend(
            inherited
                .iter()
                .filter(|e| !matches!(e, HitEffect::SpawnChildProjectile { .. }))
                .cloned(),
        );
    }
    effects
}

/// Direction an impact-anchored sub-attack or child projectile continues in:
/// away from the attacker through the hit point, falling back to the
/// attacker's facing when the two coincide.
fn continuation_direction(services: &CombatServices, attacker: Entity, hit_position: Vec3) -> Vec3 {
    let Ok((_, position, rotation, ..)) = services.targets.get(attacker) else {
        return Vec3::NEG_Z;
    };
    let flat = (hit_position - position.0).with_y(0.0);
    if flat.length() > 0.01 {
        flat.normalize()
    } else {
        facing_direction(rotation)
    }
}

/// Run a projectile's cloned effect list against one first-time hit.
pub fn apply_hit_effects(
    services: &mut CombatServices,
    effects: &[HitEffect],
    hit_position: Vec3,
    victim: Entity,
    attacker: Entity,
    attacker_team: Team,
    depth: u8,
) {
    for effect in effects {
        match effect {
            HitEffect::DirectDamage { amount } => {
                if let Ok((_, _, _, _, mut health, _, _, invulnerable)) =
                    services.targets.get_mut(victim)
                {
                    deal_damage(&mut health, invulnerable, *amount);
                }
            }
            HitEffect::TriggerAttack { archetype, stats } => {
                if depth >= MAX_EFFECT_DEPTH {
                    warn!("TriggerAttack depth cap reached, skipping {:?}", archetype);
                    continue;
                }
                let direction = continuation_direction(services, attacker, hit_position);
                execute_attack(
                    services,
                    attacker,
                    attacker_team,
                    hit_position,
                    direction,
                    *archetype,
                    stats,
                    depth + 1,
                );
            }
            HitEffect::SpawnChildProjectile {
                speed,
                range,
                inherit_weapon_effects,
                extra_effects,
            } => {
                let inherited = if *inherit_weapon_effects {
                    services
                        .weapons
                        .get(attacker)
                        .ok()
                        .map(|weapon| weapon.stats.on_hit.clone())
                } else {
                    None
                };
                let effects = child_effect_list(extra_effects, inherited.as_deref());
                let direction = continuation_direction(services, attacker, hit_position);
                let tick = services.tick.0;
                spawn_projectile(
                    &mut services.commands,
                    tick,
                    hit_position + Vec3::Y * CHILD_PROJECTILE_UP_OFFSET,
                    direction,
                    ProjectileParams {
                        owner: attacker,
                        team: attacker_team,
                        damage: 0.0,
                        speed: *speed,
                        range: *range,
                        pierce: 0,
                        status_effect: None,
                        effects,
                        depth: depth.saturating_add(1),
                    },
                );
            }
        }
    }
}
