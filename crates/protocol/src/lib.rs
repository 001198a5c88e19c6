use avian3d::prelude::*;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

pub mod attack;
pub mod effect;
pub mod hit_detection;
pub mod projectile;
pub mod replication;
pub mod status;
pub mod weapon;

pub use attack::{execute_attack, WeaponArchetype};
pub use effect::HitEffect;
pub use hit_detection::{
    character_collision_layers, obstacle_collision_layers, projectile_collision_layers,
    CombatServices, GameLayer,
};
pub use projectile::{AreaCharge, Projectile};
pub use replication::{
    link_pair, sign_intent, verify_intent, ClientEndpoint, ClientMessage, EntitySpawn,
    EntityUpdate, NetworkId, PresentationCue, ReplicatedKind, ServerEndpoint, ServerMessage,
    StateDelta,
};
pub use status::{ActiveStatusEffect, EffectCatalog, EffectId, StatusEffectDef, StatusRegistry};
pub use weapon::{
    EquipCommand, EquippedWeapon, UpgradeCommand, WeaponDef, WeaponDefs, WeaponId, WeaponStats,
};

pub const PROTOCOL_ID: u64 = 0;
pub const PRIVATE_KEY: [u8; 32] = [0; 32];
pub const FIXED_TIMESTEP_HZ: f64 = 64.0;

pub const CHARACTER_CAPSULE_RADIUS: f32 = 1.0;
pub const CHARACTER_CAPSULE_HEIGHT: f32 = 1.0;

/// Convert a duration in seconds to whole simulation ticks (rounded up so
/// sub-tick durations still take at least one step).
pub fn secs_to_ticks(secs: f32) -> u32 {
    (secs * FIXED_TIMESTEP_HZ as f32).ceil() as u32
}

pub fn facing_direction(rotation: &Rotation) -> Vec3 {
    (rotation.0 * Vec3::NEG_Z).normalize()
}

/// Startup gate: combat systems only run once every definition asset
/// (weapons, effect catalog, loadout) has finished loading.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, States)]
pub enum AppState {
    #[default]
    Loading,
    Ready,
}

/// Handles that must finish loading before the `Loading -> Ready`
/// transition.
#[derive(Resource, Default)]
pub struct TrackedAssets(Vec<bevy::asset::UntypedHandle>);

impl TrackedAssets {
    pub fn add(&mut self, handle: impl Into<bevy::asset::UntypedHandle>) {
        self.0.push(handle.into());
    }
}

fn check_assets_loaded(
    asset_server: Res<AssetServer>,
    tracked: Res<TrackedAssets>,
    mut next_state: ResMut<NextState<AppState>>,
) {
    let all_loaded = tracked
        .0
        .iter()
        .all(|handle| asset_server.is_loaded_with_dependencies(handle));

    if all_loaded {
        info!("Definition assets loaded, combat simulation ready");
        next_state.set(AppState::Ready);
    }
}

/// Monotonic simulation step counter. Each participant advances its own;
/// only the authoritative side's counter gates combat state.
#[derive(Resource, Default, Clone, Copy, Debug)]
pub struct SimTick(pub u32);

pub fn advance_sim_tick(mut tick: ResMut<SimTick>) {
    tick.0 = tick.0.wrapping_add(1);
}

/// Identifies which client owns this character. Replicated so observers can
/// associate mirrored characters with connection ids.
#[derive(Component, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Reflect)]
pub struct PlayerId(pub u64);

#[derive(Component, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CharacterMarker;

/// Marker to distinguish dummy targets from player characters.
#[derive(Component, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DummyTarget;

/// Marks a respawn location. Server-only, not replicated.
#[derive(Component, Clone, Debug)]
pub struct RespawnPoint;

/// Symmetric hostility: entities on different teams are valid targets for
/// each other, entities on the same team are allies for heals.
#[derive(Component, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Reflect)]
pub struct Team(pub u8);

impl Team {
    pub fn hostile_to(&self, other: Team) -> bool {
        self.0 != other.0
    }
}

#[derive(Component, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

impl Health {
    pub fn new(max: f32) -> Self {
        Self { current: max, max }
    }

    pub fn apply_damage(&mut self, damage: f32) {
        self.current = (self.current - damage).max(0.0);
    }

    pub fn heal(&mut self, amount: f32) {
        self.current = (self.current + amount).min(self.max);
    }

    pub fn is_dead(&self) -> bool {
        self.current <= 0.0
    }

    pub fn restore_full(&mut self) {
        self.current = self.max;
    }
}

/// Post-respawn invulnerability. Prevents damage while present.
#[derive(Component, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Invulnerable {
    pub expires_at: u32,
}

#[derive(Bundle)]
pub struct CharacterPhysicsBundle {
    pub collider: Collider,
    pub rigid_body: RigidBody,
    pub locked_axes: LockedAxes,
    pub friction: Friction,
    pub collision_layers: CollisionLayers,
}

impl Default for CharacterPhysicsBundle {
    fn default() -> Self {
        Self {
            collider: Collider::capsule(CHARACTER_CAPSULE_RADIUS, CHARACTER_CAPSULE_HEIGHT),
            rigid_body: RigidBody::Dynamic,
            locked_axes: LockedAxes::ROTATION_LOCKED,
            friction: Friction::default(),
            collision_layers: hit_detection::character_collision_layers(),
        }
    }
}

/// Shared asset/message wiring used by both the authoritative role and
/// observers. Combat mutation systems live in [`CombatAuthorityPlugin`] and
/// are added on the server only.
pub struct ProtocolPlugin;

impl Plugin for ProtocolPlugin {
    fn build(&self, app: &mut App) {
        app.init_state::<AppState>();
        app.init_resource::<TrackedAssets>();
        app.add_systems(
            Update,
            check_assets_loaded.run_if(in_state(AppState::Loading)),
        );

        app.add_plugins(weapon::WeaponAssetPlugin);
        app.add_plugins(status::EffectCatalogPlugin);

        app.init_resource::<SimTick>();
        app.add_message::<PresentationCue>();
    }
}

/// Systems that mutate combat state. Added exclusively by the authoritative
/// role; observers never register these, so authority violations are
/// structurally impossible rather than merely rejected.
pub struct CombatAuthorityPlugin;

impl Plugin for CombatAuthorityPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<attack::CombatRng>();
        app.add_message::<UpgradeCommand>();
        app.add_message::<EquipCommand>();

        let ready = in_state(AppState::Ready);

        app.add_systems(
            FixedUpdate,
            (
                advance_sim_tick,
                projectile::projectile_travel,
                projectile::projectile_lifetime,
                projectile::process_projectile_hits,
                projectile::detonate_area_charges,
                status::tick_status_effects,
            )
                .chain()
                .run_if(ready.clone()),
        );

        app.add_systems(
            FixedUpdate,
            (weapon::apply_upgrade_commands, weapon::apply_equip_commands)
                .after(status::tick_status_effects)
                .run_if(ready),
        );
    }
}
