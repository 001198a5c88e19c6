use avian3d::prelude::*;
use bevy::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::hit_detection::{apply_knockback, deal_damage, CombatServices, GameLayer};
use crate::projectile::{spawn_area_charge, spawn_projectile, AreaCharge, ProjectileParams};
use crate::replication::PresentationCue;
use crate::weapon::WeaponStats;
use crate::{secs_to_ticks, Team};

/// Melee sweeps resolve around a point this far in front of the attacker.
pub const MELEE_ORIGIN_OFFSET: f32 = 1.5;
/// Projectiles and thrown charges spawn this far in front of the attacker.
pub const PROJECTILE_SPAWN_OFFSET: f32 = 1.5;
/// Chain bounce search radius. Archetype-level, deliberately independent of
/// weapon stats.
pub const CHAIN_BOUNCE_RADIUS: f32 = 6.0;
/// Bounce count used when a chain weapon's projectile_count is unset.
pub const CHAIN_DEFAULT_BOUNCES: u32 = 3;
/// Flat heal applied to allies caught in a spell burst.
pub const SPELL_HEAL_AMOUNT: f32 = 15.0;
/// Seconds between a charge being thrown and detonating.
pub const AREA_FUSE_SECS: f32 = 1.5;
/// Upward fraction mixed into a thrown charge's launch direction.
pub const AREA_THROW_LIFT: f32 = 0.4;
/// Upward fraction mixed into explosion knockback.
pub const AREA_KNOCKBACK_LIFT: f32 = 0.3;

/// Stateless strategy key, one per weapon archetype. Dispatch is a plain
/// match; new archetypes are additive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Reflect)]
pub enum WeaponArchetype {
    Melee,
    MultiProjectile,
    Area,
    Spell,
    Beam,
    ChainBeam,
}

/// Crit-roll source for the authoritative role. Seedable so tests are
/// deterministic.
#[derive(Resource)]
pub struct CombatRng(pub StdRng);

impl Default for CombatRng {
    fn default() -> Self {
        Self(StdRng::from_os_rng())
    }
}

impl CombatRng {
    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

/// What an attack resolution did. Zero hits is a valid outcome, not an
/// error; the cooldown still applies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttackOutcome {
    pub hits: u32,
    pub projectiles_spawned: u32,
}

/// Resolve one attack on the authoritative side. `stats` is a snapshot of
/// the attacker's live weapon stats taken at dispatch time.
#[allow(clippy::too_many_arguments)]
pub fn execute_attack(
    services: &mut CombatServices,
    attacker: Entity,
    team: Team,
    origin: Vec3,
    forward: Vec3,
    archetype: WeaponArchetype,
    stats: &WeaponStats,
    depth: u8,
) -> AttackOutcome {
    let Some(forward) = forward.try_normalize() else {
        warn!("Attack from {:?} has a degenerate firing direction", attacker);
        return AttackOutcome::default();
    };
    match archetype {
        WeaponArchetype::Melee => melee_sweep(services, attacker, team, origin, forward, stats),
        WeaponArchetype::MultiProjectile => {
            multi_projectile(services, attacker, team, origin, forward, stats, depth)
        }
        WeaponArchetype::Area => area_throw(services, attacker, team, origin, forward, stats),
        WeaponArchetype::Spell => spell_burst(services, attacker, team, origin, stats),
        WeaponArchetype::Beam => beam(services, attacker, team, origin, forward, stats),
        WeaponArchetype::ChainBeam => chain_beam(services, attacker, team, origin, forward, stats),
    }
}

/// Instantaneous cone sweep. The overlap query itself deduplicates targets,
/// so no hit history is needed.
fn melee_sweep(
    services: &mut CombatServices,
    attacker: Entity,
    team: Team,
    origin: Vec3,
    forward: Vec3,
    stats: &WeaponStats,
) -> AttackOutcome {
    let mut outcome = AttackOutcome::default();
    let center = origin + forward * MELEE_ORIGIN_OFFSET;
    let filter = SpatialQueryFilter::from_mask(GameLayer::Character)
        .with_excluded_entities([attacker]);
    let candidates = services.spatial.shape_intersections(
        &Collider::sphere(stats.range),
        center,
        Quat::IDENTITY,
        &filter,
    );

    let forward_flat = forward.with_y(0.0).normalize_or_zero();
    let half_angle = (stats.attack_angle / 2.0).to_radians();

    for target in candidates {
        let Ok((_, position, _, target_team, mut health, mut velocity, mut registry, invulnerable)) =
            services.targets.get_mut(target)
        else {
            continue;
        };
        if !team.hostile_to(*target_team) || health.is_dead() {
            continue;
        }
        let to_target = (position.0 - origin).with_y(0.0);
        if to_target.length() > 0.01 && forward_flat.angle_between(to_target) > half_angle {
            continue;
        }

        let crit = services.rng.0.random::<f32>() < stats.crit_chance;
        let damage = stats.damage * if crit { stats.crit_multiplier } else { 1.0 };
        deal_damage(&mut health, invulnerable, damage);
        apply_knockback(&mut velocity, origin, position.0, stats.knockback, 0.0);

        if let Some(effect) = &stats.status_effect {
            if registry.apply(effect, &services.catalog) {
                let target_id = services.net_ids.get(target).map(|n| n.0).unwrap_or(0);
                services.cues.write(PresentationCue::StatusApplied {
                    target: target_id,
                    effect: effect.clone(),
                });
            }
        }
        outcome.hits += 1;
    }
    outcome
}

/// Fan of `max(1, projectile_count)` projectiles across `spread` degrees,
/// evenly stepped and symmetric around forward. Each projectile is seeded
/// with a cloned copy of the weapon's current on-hit effect list.
fn multi_projectile(
    services: &mut CombatServices,
    attacker: Entity,
    team: Team,
    origin: Vec3,
    forward: Vec3,
    stats: &WeaponStats,
    depth: u8,
) -> AttackOutcome {
    let mut outcome = AttackOutcome::default();
    let count = stats.projectile_count.max(1);
    let step = if count > 1 {
        stats.spread / (count - 1) as f32
    } else {
        0.0
    };
    let tick = services.tick.0;

    for i in 0..count {
        let offset_deg = if count > 1 {
            -stats.spread / 2.0 + i as f32 * step
        } else {
            0.0
        };
        let direction = Quat::from_rotation_y(offset_deg.to_radians()) * forward;
        spawn_projectile(
            &mut services.commands,
            tick,
            origin + direction * PROJECTILE_SPAWN_OFFSET,
            direction,
            ProjectileParams {
                owner: attacker,
                team,
                damage: stats.damage,
                speed: stats.projectile_speed,
                range: stats.range,
                pierce: stats.pierce,
                status_effect: stats.status_effect.clone(),
                effects: stats.on_hit.clone(),
                depth,
            },
        );
        outcome.projectiles_spawned += 1;
    }
    outcome
}

/// Throw one physically simulated charge that detonates on a fixed fuse
/// (see `detonate_area_charges`).
fn area_throw(
    services: &mut CombatServices,
    attacker: Entity,
    team: Team,
    origin: Vec3,
    forward: Vec3,
    stats: &WeaponStats,
) -> AttackOutcome {
    let velocity = (forward + Vec3::Y * AREA_THROW_LIFT).normalize() * stats.projectile_speed;
    let tick = services.tick.0;
    spawn_area_charge(
        &mut services.commands,
        origin + forward * PROJECTILE_SPAWN_OFFSET,
        velocity,
        AreaCharge {
            thrower: attacker,
            team,
            damage: stats.damage,
            knockback: stats.knockback,
            explosion_radius: stats.explosion_radius,
            status_effect: stats.status_effect.clone(),
            detonate_at: tick + secs_to_ticks(AREA_FUSE_SECS),
        },
    );
    AttackOutcome {
        hits: 0,
        projectiles_spawned: 1,
    }
}

/// Self-centered burst: hostiles in range take damage and status, allies
/// (the caster included) heal a fixed amount.
fn spell_burst(
    services: &mut CombatServices,
    _attacker: Entity,
    team: Team,
    origin: Vec3,
    stats: &WeaponStats,
) -> AttackOutcome {
    let mut outcome = AttackOutcome::default();
    let filter = SpatialQueryFilter::from_mask(GameLayer::Character);
    let candidates = services.spatial.shape_intersections(
        &Collider::sphere(stats.range),
        origin,
        Quat::IDENTITY,
        &filter,
    );

    for target in candidates {
        let Ok((_, _, _, target_team, mut health, _, mut registry, invulnerable)) =
            services.targets.get_mut(target)
        else {
            continue;
        };
        if team.hostile_to(*target_team) {
            if health.is_dead() {
                continue;
            }
            deal_damage(&mut health, invulnerable, stats.damage);
            if let Some(effect) = &stats.status_effect {
                if registry.apply(effect, &services.catalog) {
                    let target_id = services.net_ids.get(target).map(|n| n.0).unwrap_or(0);
                    services.cues.write(PresentationCue::StatusApplied {
                        target: target_id,
                        effect: effect.clone(),
                    });
                }
            }
            outcome.hits += 1;
        } else {
            health.heal(SPELL_HEAL_AMOUNT);
        }
    }
    outcome
}

/// Instant-hit ray: exactly the first valid entity within range takes damage
/// and status, pierce notwithstanding.
fn beam(
    services: &mut CombatServices,
    attacker: Entity,
    team: Team,
    origin: Vec3,
    forward: Vec3,
    stats: &WeaponStats,
) -> AttackOutcome {
    let mut outcome = AttackOutcome::default();
    let Ok(direction) = Dir3::new(forward) else {
        warn!("Beam from {:?} has no firing direction", attacker);
        return outcome;
    };
    let filter = SpatialQueryFilter::from_mask(GameLayer::Character)
        .with_excluded_entities([attacker]);

    if let Some(hit) = services
        .spatial
        .cast_ray(origin, direction, stats.range, true, &filter)
    {
        let point = origin + forward * hit.distance;
        if let Ok((_, _, _, target_team, mut health, _, mut registry, invulnerable)) =
            services.targets.get_mut(hit.entity)
        {
            if team.hostile_to(*target_team) && !health.is_dead() {
                deal_damage(&mut health, invulnerable, stats.damage);
                if let Some(effect) = &stats.status_effect {
                    if registry.apply(effect, &services.catalog) {
                        let target_id =
                            services.net_ids.get(hit.entity).map(|n| n.0).unwrap_or(0);
                        services.cues.write(PresentationCue::StatusApplied {
                            target: target_id,
                            effect: effect.clone(),
                        });
                    }
                }
                services.cues.write(PresentationCue::Impact {
                    position: point,
                    normal: hit.normal,
                });
                outcome.hits = 1;
            }
        }
    }
    outcome
}

/// Chain lightning: an initial ray acquires the first target, then the beam
/// bounces to the nearest not-yet-struck valid target within
/// [`CHAIN_BOUNCE_RADIUS`], requiring obstacle-free line of sight before each
/// bounce. The polyline cue is broadcast once, whatever the bounce count.
fn chain_beam(
    services: &mut CombatServices,
    attacker: Entity,
    team: Team,
    origin: Vec3,
    forward: Vec3,
    stats: &WeaponStats,
) -> AttackOutcome {
    let mut outcome = AttackOutcome::default();
    let mut points = vec![origin];
    let mut struck: Vec<Entity> = Vec::new();

    let bounces = if stats.projectile_count == 0 {
        CHAIN_DEFAULT_BOUNCES
    } else {
        stats.projectile_count
    };

    if let Ok(direction) = Dir3::new(forward) {
        let filter = SpatialQueryFilter::from_mask(GameLayer::Character)
            .with_excluded_entities([attacker]);
        if let Some(hit) = services
            .spatial
            .cast_ray(origin, direction, stats.range, true, &filter)
        {
            if let Some(position) = strike_chain_target(services, team, hit.entity, stats) {
                points.push(position);
                struck.push(hit.entity);
                outcome.hits += 1;
            }
        }
    } else {
        warn!("Chain beam from {:?} has no firing direction", attacker);
    }

    if !struck.is_empty() {
        let mut current = *points.last().unwrap_or(&origin);
        for _ in 0..bounces {
            let Some((next, next_pos)) =
                next_chain_target(services, attacker, team, current, &struck)
            else {
                break;
            };
            if strike_chain_target(services, team, next, stats).is_none() {
                break;
            }
            points.push(next_pos);
            struck.push(next);
            current = next_pos;
            outcome.hits += 1;
        }
    }

    services.cues.write(PresentationCue::BeamPolyline { points });
    outcome
}

/// Nearest living hostile within bounce range of `from` that has not been
/// struck yet and has unobstructed line of sight from the current point.
fn next_chain_target(
    services: &CombatServices,
    attacker: Entity,
    team: Team,
    from: Vec3,
    struck: &[Entity],
) -> Option<(Entity, Vec3)> {
    let mut candidates: Vec<(Entity, Vec3, f32)> = services
        .targets
        .iter()
        .filter_map(|(entity, position, _, target_team, health, ..)| {
            if entity == attacker || struck.contains(&entity) {
                return None;
            }
            if !team.hostile_to(*target_team) || health.is_dead() {
                return None;
            }
            let distance = position.0.distance(from);
            (distance <= CHAIN_BOUNCE_RADIUS).then_some((entity, position.0, distance))
        })
        .collect();
    candidates.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));

    let los_filter = SpatialQueryFilter::from_mask(GameLayer::Obstacle);
    candidates
        .into_iter()
        .find(|(_, position, distance)| match Dir3::new(*position - from) {
            Ok(direction) => services
                .spatial
                .cast_ray(from, direction, *distance, true, &los_filter)
                .is_none(),
            Err(_) => true,
        })
        .map(|(entity, position, _)| (entity, position))
}

/// Damage + status for one chain node. Returns the node position when the
/// strike landed.
fn strike_chain_target(
    services: &mut CombatServices,
    team: Team,
    target: Entity,
    stats: &WeaponStats,
) -> Option<Vec3> {
    let Ok((_, position, _, target_team, mut health, _, mut registry, invulnerable)) =
        services.targets.get_mut(target)
    else {
        return None;
    };
    if !team.hostile_to(*target_team) || health.is_dead() {
        return None;
    }
    let position = position.0;
    deal_damage(&mut health, invulnerable, stats.damage);
    if let Some(effect) = &stats.status_effect {
        if registry.apply(effect, &services.catalog) {
            let target_id = services.net_ids.get(target).map(|n| n.0).unwrap_or(0);
            services.cues.write(PresentationCue::StatusApplied {
                target: target_id,
                effect: effect.clone(),
            });
        }
    }
    Some(position)
}
