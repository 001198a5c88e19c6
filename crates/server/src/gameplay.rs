use avian3d::prelude::*;
use bevy::prelude::*;
use protocol::*;

use crate::network::ServerLinks;

const RESPAWN_INVULNERABLE_TICKS: u32 = 128;
const DUMMY_TEAM: Team = Team(200);

pub struct ServerGameplayPlugin;

impl Plugin for ServerGameplayPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            Startup,
            (spawn_ground, spawn_dummy_targets, spawn_respawn_points),
        );

        let ready = in_state(AppState::Ready);

        app.add_systems(Update, spawn_connected_characters.run_if(ready.clone()));
        app.add_systems(
            FixedUpdate,
            process_attack_intents
                .after(protocol::advance_sim_tick)
                .before(protocol::projectile::projectile_travel)
                .run_if(ready.clone()),
        );
        app.add_systems(
            FixedUpdate,
            (
                check_death_and_respawn.after(protocol::status::tick_status_effects),
                expire_invulnerability,
            )
                .run_if(ready),
        );
    }
}

pub fn spawn_ground(mut commands: Commands) {
    commands.spawn((
        Name::new("Ground"),
        Position(Vec3::new(0.0, -0.5, 0.0)),
        Rotation::default(),
        RigidBody::Static,
        Collider::cuboid(200.0, 1.0, 200.0),
        obstacle_collision_layers(),
    ));
}

pub fn spawn_dummy_targets(mut commands: Commands) {
    for (i, position) in [Vec3::new(3.0, 1.0, -4.0), Vec3::new(-3.0, 1.0, -4.0)]
        .into_iter()
        .enumerate()
    {
        commands.spawn((
            Name::new(format!("DummyTarget{i}")),
            Position(position),
            Rotation::default(),
            CharacterPhysicsBundle::default(),
            CharacterMarker,
            DummyTarget,
            DUMMY_TEAM,
            Health::new(100.0),
            StatusRegistry::default(),
        ));
    }
}

pub fn spawn_respawn_points(mut commands: Commands) {
    commands.spawn((RespawnPoint, Position(Vec3::new(0.0, 1.0, 0.0))));
}

/// Spawn a character for every link that does not have one yet, equipped
/// from the default loadout. Teams alternate per connection so opposing
/// players exist from the second join on.
pub fn spawn_connected_characters(
    mut commands: Commands,
    mut links: ResMut<ServerLinks>,
    defs: Option<Res<WeaponDefs>>,
    default_loadout: Option<Res<weapon::DefaultLoadout>>,
    loadouts: Res<Assets<weapon::Loadout>>,
) {
    let Some(defs) = defs else {
        return;
    };
    let Some(default_loadout) = default_loadout else {
        return;
    };
    let Some(loadout) = loadouts.get(&default_loadout.0) else {
        return;
    };
    let Some(def) = defs.get(&loadout.weapon) else {
        warn!("Default loadout weapon {:?} not found in defs", loadout.weapon);
        return;
    };

    for link in links.links.iter_mut().filter(|l| !l.character_spawned) {
        let angle = link.client_id as f32 * 5.0;
        let position = Vec3::new(2.0 * angle.cos(), 1.0, 2.0 * angle.sin());
        info!("Spawning character for client {}", link.client_id);
        commands.spawn((
            Name::new("Character"),
            PlayerId(link.client_id),
            Team((link.client_id % 2) as u8),
            Position(position),
            Rotation::default(),
            CharacterPhysicsBundle::default(),
            CharacterMarker,
            Health::new(100.0),
            StatusRegistry::default(),
            EquippedWeapon::from_def(loadout.weapon.clone(), def),
        ));
        link.character_spawned = true;
    }
}

/// Drain attack intents from every link and resolve the valid ones. Every
/// gate failure is a silent no-op for the sender: bad signatures and stale
/// counters are dropped, stunned/silenced/dead attackers do nothing, and a
/// cooldown miss simply does not fire.
pub fn process_attack_intents(
    mut services: CombatServices,
    mut links: ResMut<ServerLinks>,
    players: Query<(Entity, &PlayerId)>,
) {
    let tick = services.tick.0;
    for link in links.links.iter_mut() {
        while let Some(message) = link.endpoint.try_recv() {
            let ClientMessage::AttackIntent {
                player,
                counter,
                signature,
            } = message;

            if player != link.client_id {
                warn!(
                    "Client {} sent an intent for player {player}, dropping",
                    link.client_id
                );
                continue;
            }
            if counter <= link.last_counter {
                continue;
            }
            if !verify_intent(&PRIVATE_KEY, player, counter, signature) {
                warn!("Client {} sent a badly signed intent, dropping", link.client_id);
                continue;
            }
            link.last_counter = counter;

            let Some(attacker) = players
                .iter()
                .find(|(_, id)| id.0 == player)
                .map(|(entity, _)| entity)
            else {
                continue;
            };
            let Ok((_, position, rotation, team, health, _, registry, _)) =
                services.targets.get(attacker)
            else {
                continue;
            };
            if health.is_dead() || registry.stunned || registry.silenced {
                continue;
            }
            let team = *team;
            let origin = position.0;
            let forward = facing_direction(rotation);

            let Ok(mut weapon) = services.weapons.get_mut(attacker) else {
                continue;
            };
            if !weapon.ready(tick) {
                continue;
            }
            weapon.mark_fired(tick);
            let archetype = weapon.archetype;
            let stats = weapon.stats.clone();

            execute_attack(
                &mut services,
                attacker,
                team,
                origin,
                forward,
                archetype,
                &stats,
                0,
            );

            let attacker_id = services.net_ids.get(attacker).map(|n| n.0).unwrap_or(0);
            services.cues.write(PresentationCue::WeaponFired {
                attacker: attacker_id,
                cooldown: stats.cooldown,
            });
        }
    }
}

/// Death handling: clearing the status registry happens synchronously with
/// the death, before anything else can observe the corpse. Players respawn
/// at the nearest respawn point with an invulnerability window; dummy
/// targets despawn.
pub fn check_death_and_respawn(
    mut commands: Commands,
    tick: Res<SimTick>,
    net_ids: Query<&NetworkId>,
    mut cues: MessageWriter<PresentationCue>,
    mut dead_query: Query<
        (
            Entity,
            &mut Health,
            &mut Position,
            &mut LinearVelocity,
            &mut StatusRegistry,
            Has<DummyTarget>,
        ),
        With<CharacterMarker>,
    >,
    respawn_query: Query<&Position, (With<RespawnPoint>, Without<CharacterMarker>)>,
) {
    for (entity, mut health, mut position, mut velocity, mut registry, is_dummy) in &mut dead_query
    {
        if !health.is_dead() {
            continue;
        }
        let target_id = net_ids.get(entity).map(|n| n.0).unwrap_or(0);
        for effect in registry.clear_all() {
            cues.write(PresentationCue::StatusRemoved {
                target: target_id,
                effect,
            });
        }
        if is_dummy {
            info!("Dummy target {:?} destroyed", entity);
            commands.entity(entity).try_despawn();
            continue;
        }
        let respawn_pos = nearest_respawn_pos(&position, &respawn_query);
        info!("Entity {:?} died, respawning at {:?}", entity, respawn_pos);
        position.0 = respawn_pos;
        velocity.0 = Vec3::ZERO;
        health.restore_full();
        commands.entity(entity).insert(Invulnerable {
            expires_at: tick.0 + RESPAWN_INVULNERABLE_TICKS,
        });
    }
}

fn nearest_respawn_pos(
    current_pos: &Position,
    respawn_query: &Query<&Position, (With<RespawnPoint>, Without<CharacterMarker>)>,
) -> Vec3 {
    respawn_query
        .iter()
        .min_by(|a, b| {
            a.0.distance_squared(current_pos.0)
                .partial_cmp(&b.0.distance_squared(current_pos.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|p| p.0)
        .unwrap_or(Vec3::new(0.0, 1.0, 0.0))
}

pub fn expire_invulnerability(
    mut commands: Commands,
    tick: Res<SimTick>,
    query: Query<(Entity, &Invulnerable)>,
) {
    for (entity, invulnerable) in &query {
        if tick.0 >= invulnerable.expires_at {
            commands.entity(entity).remove::<Invulnerable>();
        }
    }
}
