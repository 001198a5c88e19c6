use bevy::asset::{AssetPath, LoadedFolder};
use bevy::prelude::*;
use bevy_common_assets::ron::RonAssetPlugin;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::attack::WeaponArchetype;
use crate::effect::HitEffect;
use crate::secs_to_ticks;
use crate::status::EffectId;

/// String-based weapon identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Reflect)]
pub struct WeaponId(pub String);

/// Live stat block for one weapon. Copied out of a [`WeaponDef`] at equip
/// time and mutated in place by upgrades; projectiles clone what they need
/// at spawn so in-flight shots never observe later mutations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeaponStats {
    #[serde(default)]
    pub damage: f32,
    #[serde(default)]
    pub cooldown: f32,
    /// Reach for melee/spell/beam, travel budget for projectiles.
    #[serde(default)]
    pub range: f32,
    /// Full cone angle in degrees for melee sweeps.
    #[serde(default)]
    pub attack_angle: f32,
    #[serde(default)]
    pub knockback: f32,
    #[serde(default)]
    pub crit_chance: f32,
    #[serde(default = "default_crit_multiplier")]
    pub crit_multiplier: f32,
    #[serde(default)]
    pub projectile_speed: f32,
    /// Projectile fan size, or chain bounce count for chain beams.
    #[serde(default)]
    pub projectile_count: u32,
    /// Fan width in degrees, symmetric around forward.
    #[serde(default)]
    pub spread: f32,
    /// Extra targets a projectile may pass through after its first hit.
    #[serde(default)]
    pub pierce: u32,
    #[serde(default)]
    pub explosion_radius: f32,
    /// Elemental status applied alongside direct damage.
    #[serde(default)]
    pub status_effect: Option<EffectId>,
    /// Ordered on-hit effect nodes, cloned onto projectiles at spawn.
    #[serde(default)]
    pub on_hit: Vec<HitEffect>,
}

fn default_crit_multiplier() -> f32 {
    2.0
}

impl Default for WeaponStats {
    fn default() -> Self {
        Self {
            damage: 0.0,
            cooldown: 0.0,
            range: 0.0,
            attack_angle: 0.0,
            knockback: 0.0,
            crit_chance: 0.0,
            crit_multiplier: default_crit_multiplier(),
            projectile_speed: 0.0,
            projectile_count: 0,
            spread: 0.0,
            pierce: 0,
            explosion_radius: 0.0,
            status_effect: None,
            on_hit: Vec::new(),
        }
    }
}

/// Definition of a single weapon, loaded from an individual `.weapon.ron` file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Asset, TypePath)]
pub struct WeaponDef {
    pub archetype: WeaponArchetype,
    pub stats: WeaponStats,
}

/// Resource holding loaded weapon definitions, keyed by `WeaponId`.
#[derive(Resource, Clone, Debug)]
pub struct WeaponDefs {
    pub weapons: HashMap<WeaponId, WeaponDef>,
}

impl WeaponDefs {
    pub fn get(&self, id: &WeaponId) -> Option<&WeaponDef> {
        self.weapons.get(id)
    }
}

/// The weapon a spawned character starts with, loaded from
/// `default.loadout.ron`.
#[derive(Clone, Debug, Serialize, Deserialize, Asset, TypePath)]
pub struct Loadout {
    pub weapon: WeaponId,
}

/// Resource holding the handle for the default loadout asset.
#[derive(Resource)]
pub struct DefaultLoadout(pub Handle<Loadout>);

/// Per-attacker weapon runtime state: the bound strategy archetype, the live
/// (upgradeable) stat block and the cooldown gate. Server-exclusive mutation.
#[derive(Component, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquippedWeapon {
    pub def_id: WeaponId,
    pub archetype: WeaponArchetype,
    pub stats: WeaponStats,
    pub last_fired: Option<u32>,
}

impl EquippedWeapon {
    pub fn from_def(def_id: WeaponId, def: &WeaponDef) -> Self {
        Self {
            def_id,
            archetype: def.archetype,
            stats: def.stats.clone(),
            last_fired: None,
        }
    }

    pub fn cooldown_ticks(&self) -> u32 {
        secs_to_ticks(self.stats.cooldown)
    }

    /// Cooldown gate: false within `stats.cooldown` of the last successful
    /// attack. A gated attack is a no-op, not an error.
    pub fn ready(&self, tick: u32) -> bool {
        match self.last_fired {
            None => true,
            Some(last) => tick.wrapping_sub(last) >= self.cooldown_ticks(),
        }
    }

    pub fn mark_fired(&mut self, tick: u32) {
        self.last_fired = Some(tick);
    }

    /// Swap to a new weapon definition: rebind the strategy and reset the
    /// live stats from the new base. Projectiles already in flight keep
    /// their cloned effect lists and are unaffected.
    pub fn equip(&mut self, def_id: WeaponId, def: &WeaponDef) {
        self.def_id = def_id;
        self.archetype = def.archetype;
        self.stats = def.stats.clone();
    }

    /// Authoritative in-place stat upgrade. Takes effect on the next attack.
    pub fn upgrade(&mut self, damage_multiplier: f32, cooldown_multiplier: f32) {
        self.stats.damage *= damage_multiplier;
        self.stats.cooldown *= cooldown_multiplier;
    }

    pub fn add_effect(&mut self, effect: HitEffect) {
        self.stats.on_hit.push(effect);
    }

    pub fn remove_effect(&mut self, index: usize) -> Option<HitEffect> {
        if index < self.stats.on_hit.len() {
            Some(self.stats.on_hit.remove(index))
        } else {
            None
        }
    }

    pub fn move_effect(&mut self, from: usize, to: usize) {
        let len = self.stats.on_hit.len();
        if from < len && to < len {
            let effect = self.stats.on_hit.remove(from);
            self.stats.on_hit.insert(to, effect);
        }
    }
}

/// Server-local command from the upgrade/shop collaborator.
#[derive(Message, Clone, Debug)]
pub struct UpgradeCommand {
    pub attacker: Entity,
    pub damage_multiplier: f32,
    pub cooldown_multiplier: f32,
    pub effect_op: Option<EffectListOp>,
}

#[derive(Clone, Debug)]
pub enum EffectListOp {
    Add(HitEffect),
    Remove(usize),
    Move { from: usize, to: usize },
}

/// Server-local command to swap an attacker's equipped weapon.
#[derive(Message, Clone, Debug)]
pub struct EquipCommand {
    pub attacker: Entity,
    pub weapon: WeaponId,
}

pub fn apply_upgrade_commands(
    mut upgrades: MessageReader<UpgradeCommand>,
    mut weapons: Query<&mut EquippedWeapon>,
) {
    for command in upgrades.read() {
        let Ok(mut weapon) = weapons.get_mut(command.attacker) else {
            warn!("Upgrade target {:?} has no equipped weapon", command.attacker);
            continue;
        };
        weapon.upgrade(command.damage_multiplier, command.cooldown_multiplier);
        match &command.effect_op {
            Some(EffectListOp::Add(effect)) => weapon.add_effect(effect.clone()),
            Some(EffectListOp::Remove(index)) => {
                weapon.remove_effect(*index);
            }
            Some(EffectListOp::Move { from, to }) => weapon.move_effect(*from, *to),
            None => {}
        }
    }
}

pub fn apply_equip_commands(
    mut equips: MessageReader<EquipCommand>,
    defs: Option<Res<WeaponDefs>>,
    mut weapons: Query<&mut EquippedWeapon>,
) {
    let Some(defs) = defs else {
        return;
    };
    for command in equips.read() {
        let Some(def) = defs.get(&command.weapon) else {
            warn!("Equip: weapon {:?} not found in defs", command.weapon);
            continue;
        };
        let Ok(mut weapon) = weapons.get_mut(command.attacker) else {
            warn!("Equip target {:?} has no weapon slot", command.attacker);
            continue;
        };
        weapon.equip(command.weapon.clone(), def);
    }
}

#[derive(Resource)]
struct WeaponFolderHandle(Handle<LoadedFolder>);

pub struct WeaponAssetPlugin;

impl Plugin for WeaponAssetPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(RonAssetPlugin::<WeaponDef>::new(&["weapon.ron"]));
        app.add_plugins(RonAssetPlugin::<Loadout>::new(&["loadout.ron"]));

        app.add_systems(Startup, (load_weapon_defs, load_default_loadout));
        app.add_systems(Update, (insert_weapon_defs, reload_weapon_defs));
    }
}

fn load_weapon_defs(
    mut commands: Commands,
    asset_server: Res<AssetServer>,
    mut tracked: ResMut<crate::TrackedAssets>,
) {
    let handle = asset_server.load_folder("weapons");
    tracked.add(handle.clone());
    commands.insert_resource(WeaponFolderHandle(handle));
}

fn load_default_loadout(
    mut commands: Commands,
    asset_server: Res<AssetServer>,
    mut tracked: ResMut<crate::TrackedAssets>,
) {
    let handle = asset_server.load::<Loadout>("default.loadout.ron");
    tracked.add(handle.clone());
    commands.insert_resource(DefaultLoadout(handle));
}

fn insert_weapon_defs(
    mut commands: Commands,
    folder_handle: Option<Res<WeaponFolderHandle>>,
    loaded_folders: Res<Assets<LoadedFolder>>,
    weapon_assets: Res<Assets<WeaponDef>>,
    asset_server: Res<AssetServer>,
    existing: Option<Res<WeaponDefs>>,
) {
    if existing.is_some() {
        return;
    }
    let Some(folder_handle) = folder_handle else {
        return;
    };
    let Some(folder) = loaded_folders.get(&folder_handle.0) else {
        return;
    };
    let weapons = collect_weapons_from_folder(folder, &weapon_assets, &asset_server);
    info!("Loaded {} weapon definitions", weapons.len());
    commands.insert_resource(WeaponDefs { weapons });
}

fn reload_weapon_defs(
    mut commands: Commands,
    folder_handle: Option<Res<WeaponFolderHandle>>,
    loaded_folders: Res<Assets<LoadedFolder>>,
    weapon_assets: Res<Assets<WeaponDef>>,
    asset_server: Res<AssetServer>,
    mut events: MessageReader<AssetEvent<WeaponDef>>,
) {
    let Some(folder_handle) = folder_handle else {
        events.clear();
        return;
    };
    let has_changes = events
        .read()
        .any(|e| matches!(e, AssetEvent::Modified { .. }));
    if !has_changes {
        return;
    }
    let Some(folder) = loaded_folders.get(&folder_handle.0) else {
        warn!("weapon assets changed but LoadedFolder not available");
        return;
    };
    let weapons = collect_weapons_from_folder(folder, &weapon_assets, &asset_server);
    info!("Hot-reloaded {} weapon definitions", weapons.len());
    commands.insert_resource(WeaponDefs { weapons });
}

fn collect_weapons_from_folder(
    folder: &LoadedFolder,
    weapon_assets: &Assets<WeaponDef>,
    asset_server: &AssetServer,
) -> HashMap<WeaponId, WeaponDef> {
    folder
        .handles
        .iter()
        .filter_map(|handle| {
            let path = asset_server.get_path(handle.id())?;
            let name = path.path().file_name()?.to_str()?;
            if !name.ends_with(".weapon.ron") {
                return None;
            }
            let typed = handle.clone().typed::<WeaponDef>();
            let def = weapon_assets.get(&typed)?;
            let id = weapon_id_from_path(&path)?;
            Some((id, def.clone()))
        })
        .collect()
}

fn weapon_id_from_path(path: &AssetPath) -> Option<WeaponId> {
    let name = path.path().file_name()?.to_str()?;
    Some(WeaponId(name.strip_suffix(".weapon.ron")?.to_string()))
}
