use avian3d::prelude::*;
use bevy::ecs::system::SystemParam;
use bevy::prelude::*;

use crate::attack::CombatRng;
use crate::replication::{NetworkId, PresentationCue};
use crate::status::{EffectCatalog, StatusRegistry};
use crate::weapon::EquippedWeapon;
use crate::{CharacterMarker, Health, Invulnerable, SimTick, Team};

#[derive(PhysicsLayer, Default)]
pub enum GameLayer {
    #[default]
    Default,
    Character,
    Projectile,
    Obstacle,
}

/// Collision layer config for characters.
pub fn character_collision_layers() -> CollisionLayers {
    CollisionLayers::new(
        GameLayer::Character,
        [
            GameLayer::Character,
            GameLayer::Obstacle,
            GameLayer::Projectile,
        ],
    )
}

/// Collision layer config for static obstacles. Obstacles are what chain
/// bounces check line of sight against.
pub fn obstacle_collision_layers() -> CollisionLayers {
    CollisionLayers::new(GameLayer::Obstacle, [GameLayer::Character])
}

/// Collision layer config for projectiles and thrown charges.
pub fn projectile_collision_layers() -> CollisionLayers {
    CollisionLayers::new(GameLayer::Projectile, [GameLayer::Character])
}

/// Everything a target can have done to it during combat resolution.
pub type TargetData = (
    Entity,
    &'static Position,
    &'static Rotation,
    &'static Team,
    &'static mut Health,
    &'static mut LinearVelocity,
    &'static mut StatusRegistry,
    Option<&'static Invulnerable>,
);

/// The injected collaborator bundle for authoritative combat resolution:
/// the geometry service (spatial queries), the entity/health service (target
/// query + damage helpers), the spawner (commands), shared catalogs, and the
/// advisory cue channel. Strategies and effect nodes receive this instead of
/// reaching for globals.
#[derive(SystemParam)]
pub struct CombatServices<'w, 's> {
    pub commands: Commands<'w, 's>,
    pub spatial: SpatialQuery<'w, 's>,
    pub targets: Query<'w, 's, TargetData, With<CharacterMarker>>,
    pub weapons: Query<'w, 's, &'static mut EquippedWeapon>,
    pub net_ids: Query<'w, 's, &'static NetworkId>,
    pub catalog: Res<'w, EffectCatalog>,
    pub rng: ResMut<'w, CombatRng>,
    pub cues: MessageWriter<'w, PresentationCue>,
    pub tick: Res<'w, SimTick>,
}

impl CombatServices<'_, '_> {
    /// Network id of an entity, or 0 if none was assigned yet. Observers
    /// drop cues referencing id 0.
    pub fn net_id_of(&self, entity: Entity) -> u64 {
        self.net_ids.get(entity).map(|id| id.0).unwrap_or(0)
    }
}

/// The single authoritative damage path. Direct hits, on-hit effect nodes,
/// explosions and status ticks all route through here so death handling is
/// uniform downstream.
pub fn deal_damage(health: &mut Health, invulnerable: Option<&Invulnerable>, amount: f32) {
    if invulnerable.is_some() {
        return;
    }
    health.apply_damage(amount);
}

/// Push a target away from a source point. `lift` adds an upward component
/// (0.0 keeps the impulse horizontal-only, as melee sweeps require).
pub fn apply_knockback(velocity: &mut LinearVelocity, source: Vec3, target_pos: Vec3, force: f32, lift: f32) {
    let horizontal = (target_pos - source).with_y(0.0);
    let direction = if horizontal.length() > 0.01 {
        (horizontal.normalize() + Vec3::Y * lift).normalize()
    } else {
        Vec3::Y
    };
    velocity.0 += direction * force;
}
