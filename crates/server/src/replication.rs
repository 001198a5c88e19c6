use avian3d::prelude::*;
use bevy::prelude::*;
use protocol::*;
use std::collections::HashSet;

use crate::network::{ServerLinks, ServerNetworkConfig};

#[derive(Resource, Default)]
pub struct NetworkIdAllocator(u64);

/// Network ids of everything replicated in the previous broadcast, used to
/// derive spawn/despawn entries for the next delta.
#[derive(Resource, Default)]
pub struct ReplicatedIndex(HashSet<u64>);

pub struct ServerReplicationPlugin;

impl Plugin for ServerReplicationPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<NetworkIdAllocator>();
        app.init_resource::<ReplicatedIndex>();
        app.add_systems(
            FixedUpdate,
            (assign_network_ids, broadcast_state)
                .chain()
                .after(protocol::status::tick_status_effects)
                .run_if(in_state(AppState::Ready)),
        );
    }
}

/// Give every replicated entity a stable network id the step after it
/// spawns. Id 0 is reserved for "not yet assigned".
pub fn assign_network_ids(
    mut commands: Commands,
    mut allocator: ResMut<NetworkIdAllocator>,
    query: Query<
        Entity,
        (
            Without<NetworkId>,
            Or<(With<CharacterMarker>, With<Projectile>, With<AreaCharge>)>,
        ),
    >,
) {
    for entity in &query {
        allocator.0 += 1;
        commands.entity(entity).insert(NetworkId(allocator.0));
    }
}

/// Forward presentation cues every step and a state delta every replication
/// interval. Cues and deltas go out as structurally distinct messages so an
/// observer cannot mistake a cosmetic event for a state mutation.
#[allow(clippy::type_complexity)]
pub fn broadcast_state(
    tick: Res<SimTick>,
    config: Res<ServerNetworkConfig>,
    mut links: ResMut<ServerLinks>,
    mut known: ResMut<ReplicatedIndex>,
    mut cues: MessageReader<PresentationCue>,
    replicated: Query<(
        &NetworkId,
        &Position,
        Option<&Team>,
        Option<&Health>,
        Option<&StatusRegistry>,
        Option<&PlayerId>,
        Has<DummyTarget>,
        Has<Projectile>,
    )>,
) {
    for cue in cues.read() {
        links.broadcast(&ServerMessage::Cue(cue.clone()));
    }

    let interval = config.replication_interval_ticks.max(1);
    if tick.0 % interval != 0 {
        return;
    }

    let mut delta = StateDelta {
        tick: tick.0,
        ..Default::default()
    };
    let mut seen = HashSet::new();

    for (id, position, team, health, registry, player, is_dummy, is_projectile) in &replicated {
        seen.insert(id.0);
        if !known.0.contains(&id.0) {
            let team = team.copied().unwrap_or(Team(0));
            let kind = if is_projectile {
                ReplicatedKind::Projectile
            } else if is_dummy {
                ReplicatedKind::Dummy { team }
            } else {
                ReplicatedKind::Character {
                    team,
                    player: player.map(|p| p.0).unwrap_or(0),
                }
            };
            delta.spawns.push(EntitySpawn {
                id: id.0,
                kind,
                position: position.0,
            });
        }
        delta.updates.push(EntityUpdate {
            id: id.0,
            position: position.0,
            health: health.map(|h| h.current),
            speed_multiplier: registry.map(|r| r.speed_multiplier).unwrap_or(1.0),
            stunned: registry.map(|r| r.stunned).unwrap_or(false),
        });
    }

    delta.despawns = known.0.difference(&seen).copied().collect();
    known.0 = seen;

    links.broadcast(&ServerMessage::Delta(delta));
}
