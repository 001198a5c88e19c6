use avian3d::prelude::*;
use bevy::ecs::entity::EntityHashSet;
use bevy::prelude::*;

use crate::effect::{apply_hit_effects, HitEffect};
use crate::hit_detection::{
    apply_knockback, deal_damage, projectile_collision_layers, CombatServices, GameLayer,
};
use crate::replication::PresentationCue;
use crate::status::EffectId;
use crate::{secs_to_ticks, CharacterMarker, SimTick, Team, FIXED_TIMESTEP_HZ};

pub const PROJECTILE_COLLIDER_RADIUS: f32 = 0.25;
pub const AREA_CHARGE_COLLIDER_RADIUS: f32 = 0.3;
/// Hard lifetime ceiling. A projectile never outlives this, whatever its
/// remaining range.
pub const PROJECTILE_LIFETIME_SECS: f32 = 5.0;

/// A simulated shot in flight, owned by the authoritative role. The effect
/// list is cloned at spawn; upgrades to the firing weapon never reach
/// projectiles already in the air.
#[derive(Component, Clone, Debug)]
pub struct Projectile {
    pub owner: Entity,
    pub team: Team,
    pub damage: f32,
    pub speed: f32,
    pub range: f32,
    pub pierce_remaining: u32,
    pub direction: Vec3,
    pub traveled: f32,
    pub spawn_tick: u32,
    pub status_effect: Option<EffectId>,
    pub effects: Vec<HitEffect>,
    /// Targets this projectile already processed. Entries are kept even if
    /// the target dies mid-flight; generational entity ids make stale
    /// entries inert.
    pub hit_targets: EntityHashSet,
    pub depth: u8,
}

pub struct ProjectileParams {
    pub owner: Entity,
    pub team: Team,
    pub damage: f32,
    pub speed: f32,
    pub range: f32,
    pub pierce: u32,
    pub status_effect: Option<EffectId>,
    pub effects: Vec<HitEffect>,
    pub depth: u8,
}

pub fn spawn_projectile(
    commands: &mut Commands,
    tick: u32,
    position: Vec3,
    direction: Vec3,
    params: ProjectileParams,
) -> Entity {
    commands
        .spawn((
            Projectile {
                owner: params.owner,
                team: params.team,
                damage: params.damage,
                speed: params.speed,
                range: params.range,
                pierce_remaining: params.pierce,
                direction,
                traveled: 0.0,
                spawn_tick: tick,
                status_effect: params.status_effect,
                effects: params.effects,
                hit_targets: EntityHashSet::default(),
                depth: params.depth,
            },
            Position(position),
            Rotation::default(),
            LinearVelocity(direction * params.speed),
            RigidBody::Kinematic,
            Collider::sphere(PROJECTILE_COLLIDER_RADIUS),
            Sensor,
            CollisionEventsEnabled,
            CollidingEntities::default(),
            projectile_collision_layers(),
            Name::new("Projectile"),
        ))
        .id()
}

/// A thrown charge waiting on its fuse. Despawning the entity is also what
/// cancels the fuse; there is no timer to clean up separately.
#[derive(Component, Clone, Debug)]
pub struct AreaCharge {
    pub thrower: Entity,
    pub team: Team,
    pub damage: f32,
    pub knockback: f32,
    pub explosion_radius: f32,
    pub status_effect: Option<EffectId>,
    pub detonate_at: u32,
}

pub fn spawn_area_charge(
    commands: &mut Commands,
    position: Vec3,
    velocity: Vec3,
    charge: AreaCharge,
) -> Entity {
    commands
        .spawn((
            charge,
            Position(position),
            Rotation::default(),
            LinearVelocity(velocity),
            RigidBody::Dynamic,
            Collider::sphere(AREA_CHARGE_COLLIDER_RADIUS),
            projectile_collision_layers(),
            Name::new("AreaCharge"),
        ))
        .id()
}

/// Accumulate traveled distance and destroy projectiles past their range.
/// Distance is accrued per fixed step from the seeded speed, so travel
/// bookkeeping stays deterministic.
pub fn projectile_travel(
    mut commands: Commands,
    mut query: Query<(Entity, &mut Projectile)>,
) {
    for (entity, mut projectile) in &mut query {
        projectile.traveled += projectile.speed / FIXED_TIMESTEP_HZ as f32;
        if projectile.traveled >= projectile.range {
            commands.entity(entity).try_despawn();
        }
    }
}

/// Destroy projectiles that hit the hard lifetime ceiling, whatever their
/// travel state.
pub fn projectile_lifetime(
    mut commands: Commands,
    tick: Res<SimTick>,
    query: Query<(Entity, &Projectile)>,
) {
    let ceiling = secs_to_ticks(PROJECTILE_LIFETIME_SECS);
    for (entity, projectile) in &query {
        if tick.0.wrapping_sub(projectile.spawn_tick) >= ceiling {
            commands.entity(entity).try_despawn();
        }
    }
}

/// Resolve projectile overlaps: first-time valid hits take base damage and
/// the elemental status, then the cloned effect list runs. Pierce counts
/// down per valid hit; exhaustion destroys the projectile.
pub fn process_projectile_hits(
    mut services: CombatServices,
    mut bullets: Query<
        (Entity, &mut Projectile, &CollidingEntities, &Position),
        Without<CharacterMarker>,
    >,
) {
    for (bullet, mut projectile, colliding, position) in &mut bullets {
        for &target in colliding.iter() {
            if target == projectile.owner {
                continue;
            }
            if projectile.hit_targets.contains(&target) {
                continue;
            }

            let applied_status = {
                let Ok((_, _, _, target_team, mut health, _, mut registry, invulnerable)) =
                    services.targets.get_mut(target)
                else {
                    continue;
                };
                if !projectile.team.hostile_to(*target_team) || health.is_dead() {
                    continue;
                }
                projectile.hit_targets.insert(target);
                deal_damage(&mut health, invulnerable, projectile.damage);
                match &projectile.status_effect {
                    Some(effect) if registry.apply(effect, &services.catalog) => {
                        Some(effect.clone())
                    }
                    _ => None,
                }
            };

            if let Some(effect) = applied_status {
                let target_id = services.net_ids.get(target).map(|n| n.0).unwrap_or(0);
                services.cues.write(PresentationCue::StatusApplied {
                    target: target_id,
                    effect,
                });
            }
            services.cues.write(PresentationCue::Impact {
                position: position.0,
                normal: -projectile.direction,
            });

            apply_hit_effects(
                &mut services,
                &projectile.effects,
                position.0,
                target,
                projectile.owner,
                projectile.team,
                projectile.depth,
            );

            if projectile.pierce_remaining == 0 {
                services.commands.entity(bullet).try_despawn();
                break;
            }
            projectile.pierce_remaining -= 1;
        }
    }
}

/// Detonate thrown charges whose fuse has run down: sphere overlap, damage +
/// large knockback + status to every valid target except the thrower.
pub fn detonate_area_charges(
    mut services: CombatServices,
    charges: Query<(Entity, &AreaCharge, &Position), Without<CharacterMarker>>,
) {
    let tick = services.tick.0;
    for (entity, charge, position) in &charges {
        if tick < charge.detonate_at {
            continue;
        }

        let filter = SpatialQueryFilter::from_mask(GameLayer::Character)
            .with_excluded_entities([charge.thrower]);
        let caught = services.spatial.shape_intersections(
            &Collider::sphere(charge.explosion_radius),
            position.0,
            Quat::IDENTITY,
            &filter,
        );

        for target in caught {
            let Ok((_, target_pos, _, target_team, mut health, mut velocity, mut registry, invulnerable)) =
                services.targets.get_mut(target)
            else {
                continue;
            };
            if !charge.team.hostile_to(*target_team) || health.is_dead() {
                continue;
            }
            deal_damage(&mut health, invulnerable, charge.damage);
            apply_knockback(
                &mut velocity,
                position.0,
                target_pos.0,
                charge.knockback,
                crate::attack::AREA_KNOCKBACK_LIFT,
            );
            if let Some(effect) = &charge.status_effect {
                if registry.apply(effect, &services.catalog) {
                    let target_id = services.net_ids.get(target).map(|n| n.0).unwrap_or(0);
                    services.cues.write(PresentationCue::StatusApplied {
                        target: target_id,
                        effect: effect.clone(),
                    });
                }
            }
        }

        services.cues.write(PresentationCue::Impact {
            position: position.0,
            normal: Vec3::Y,
        });
        services.commands.entity(entity).try_despawn();
    }
}
