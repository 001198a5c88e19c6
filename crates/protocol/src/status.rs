use bevy::asset::{AssetPath, LoadedFolder};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::hit_detection::deal_damage;
use crate::replication::{NetworkId, PresentationCue};
use crate::{secs_to_ticks, Health, Invulnerable};

/// String-based status effect identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Reflect)]
pub struct EffectId(pub String);

/// Catalog entry for one named status condition, loaded from an individual
/// `.effect.ron` file. Shared immutable data; runtime state lives in
/// [`ActiveStatusEffect`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Reflect, Asset)]
pub struct StatusEffectDef {
    /// Seconds the effect stays active after (re)application.
    pub duration: f32,
    /// Seconds between periodic damage applications. 0 disables ticking.
    #[serde(default)]
    pub tick_interval: f32,
    #[serde(default)]
    pub damage_per_tick: f32,
    #[serde(default = "default_speed_multiplier")]
    pub speed_multiplier: f32,
    #[serde(default)]
    pub stun: bool,
    #[serde(default)]
    pub silence: bool,
    #[serde(default)]
    pub stackable: bool,
    #[serde(default = "default_max_stacks")]
    pub max_stacks: u32,
}

fn default_speed_multiplier() -> f32 {
    1.0
}

fn default_max_stacks() -> u32 {
    1
}

/// Resource holding the loaded effect catalog, keyed by `EffectId`.
/// Built once after assets load and treated as immutable from then on.
#[derive(Resource, Clone, Debug, Default)]
pub struct EffectCatalog {
    pub effects: HashMap<EffectId, StatusEffectDef>,
}

impl EffectCatalog {
    pub fn get(&self, id: &EffectId) -> Option<&StatusEffectDef> {
        self.effects.get(id)
    }
}

/// Runtime state of one named effect on one target.
/// Lifecycle: Applied -> (Refreshed)* -> Expired.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveStatusEffect {
    pub id: EffectId,
    pub remaining_ticks: u32,
    pub tick_accum: u32,
    pub stacks: u32,
}

/// Per-target collection of active timed effects plus the aggregates derived
/// from them. Mutated only inside the authoritative step; the published
/// aggregate fields are rewritten in one pass at the end of
/// [`tick_status_effects`] so readers between steps never see a partial
/// update.
#[derive(Component, Clone, Debug, Serialize, Deserialize)]
pub struct StatusRegistry {
    pub active: Vec<ActiveStatusEffect>,
    pub speed_multiplier: f32,
    pub stunned: bool,
    pub silenced: bool,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            speed_multiplier: 1.0,
            stunned: false,
            silenced: false,
        }
    }
}

impl StatusRegistry {
    /// Apply or refresh a named effect. Returns false (and changes nothing)
    /// when the catalog has no such entry.
    ///
    /// Reapplication always resets the duration; the stack count only grows
    /// when the catalog entry is stackable and below its cap.
    pub fn apply(&mut self, id: &EffectId, catalog: &EffectCatalog) -> bool {
        let Some(def) = catalog.get(id) else {
            warn!("Status effect {:?} not found in catalog", id);
            return false;
        };
        let duration = secs_to_ticks(def.duration);
        if let Some(existing) = self.active.iter_mut().find(|e| e.id == *id) {
            existing.remaining_ticks = duration;
            if def.stackable && existing.stacks < def.max_stacks {
                existing.stacks += 1;
            }
        } else {
            self.active.push(ActiveStatusEffect {
                id: id.clone(),
                remaining_ticks: duration,
                tick_accum: 0,
                stacks: 1,
            });
        }
        true
    }

    pub fn has(&self, id: &EffectId) -> bool {
        self.active.iter().any(|e| e.id == *id)
    }

    /// Drop every active effect and reset aggregates. Returns the removed
    /// ids in insertion order so the caller can emit removal cues.
    pub fn clear_all(&mut self) -> Vec<EffectId> {
        let removed = self.active.drain(..).map(|e| e.id).collect();
        self.speed_multiplier = 1.0;
        self.stunned = false;
        self.silenced = false;
        removed
    }
}

/// Authoritative per-step status processing, in stable insertion order:
/// advance tick accumulators (periodic damage goes through the shared damage
/// path), fold modifier aggregates, count down durations, then remove expired
/// effects and publish the aggregates.
pub fn tick_status_effects(
    catalog: Res<EffectCatalog>,
    net_ids: Query<&NetworkId>,
    mut cues: MessageWriter<PresentationCue>,
    mut query: Query<(
        Entity,
        &mut StatusRegistry,
        &mut Health,
        Option<&Invulnerable>,
    )>,
) {
    for (entity, mut registry, mut health, invulnerable) in &mut query {
        let mut speed = 1.0f32;
        let mut stunned = false;
        let mut silenced = false;

        for effect in registry.active.iter_mut() {
            let Some(def) = catalog.get(&effect.id) else {
                // Catalog entry vanished out from under us; let it expire.
                effect.remaining_ticks = 0;
                continue;
            };

            effect.tick_accum += 1;
            if def.tick_interval > 0.0 && effect.tick_accum >= secs_to_ticks(def.tick_interval) {
                deal_damage(
                    &mut health,
                    invulnerable,
                    def.damage_per_tick * effect.stacks as f32,
                );
                effect.tick_accum = 0;
            }

            speed *= def.speed_multiplier;
            stunned |= def.stun;
            silenced |= def.silence;

            effect.remaining_ticks = effect.remaining_ticks.saturating_sub(1);
        }

        let target_id = net_ids.get(entity).map(|id| id.0).unwrap_or(0);
        registry.active.retain(|effect| {
            if effect.remaining_ticks == 0 {
                cues.write(PresentationCue::StatusRemoved {
                    target: target_id,
                    effect: effect.id.clone(),
                });
                false
            } else {
                true
            }
        });

        registry.speed_multiplier = speed;
        registry.stunned = stunned;
        registry.silenced = silenced;
    }
}

#[derive(Resource)]
struct EffectFolderHandle(Handle<LoadedFolder>);

/// Loads every `.effect.ron` under `assets/effects` into the catalog.
/// Registered by [`EffectCatalogPlugin`]; the catalog resource appears once
/// the folder finishes loading and is never rebuilt afterwards.
pub struct EffectCatalogPlugin;

impl Plugin for EffectCatalogPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(bevy_common_assets::ron::RonAssetPlugin::<StatusEffectDef>::new(&[
            "effect.ron",
        ]));
        app.add_systems(Startup, load_effect_defs);
        app.add_systems(Update, insert_effect_catalog);
    }
}

fn load_effect_defs(
    mut commands: Commands,
    asset_server: Res<AssetServer>,
    mut tracked: ResMut<crate::TrackedAssets>,
) {
    let handle = asset_server.load_folder("effects");
    tracked.add(handle.clone());
    commands.insert_resource(EffectFolderHandle(handle));
}

fn insert_effect_catalog(
    mut commands: Commands,
    folder_handle: Option<Res<EffectFolderHandle>>,
    loaded_folders: Res<Assets<LoadedFolder>>,
    effect_assets: Res<Assets<StatusEffectDef>>,
    asset_server: Res<AssetServer>,
    existing: Option<Res<EffectCatalog>>,
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
    let effects: HashMap<EffectId, StatusEffectDef> = folder
        .handles
        .iter()
        .filter_map(|handle| {
            let path = asset_server.get_path(handle.id())?;
            let id = effect_id_from_path(&path)?;
            let typed = handle.clone().typed::<StatusEffectDef>();
            let def = effect_assets.get(&typed)?;
            Some((id, def.clone()))
        })
        .collect();
    info!("Loaded {} status effect definitions", effects.len());
    commands.insert_resource(EffectCatalog { effects });
}

fn effect_id_from_path(path: &AssetPath) -> Option<EffectId> {
    let name = path.path().file_name()?.to_str()?;
    Some(EffectId(name.strip_suffix(".effect.ron")?.to_string()))
}
