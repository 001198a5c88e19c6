use avian3d::prelude::Position;
use bevy::prelude::*;
use protocol::{
    EntitySpawn, EntityUpdate, Health, NetworkId, PresentationCue, ReplicatedKind, ServerMessage,
    StateDelta,
};
use std::collections::HashMap;

use crate::network::ClientSession;

/// Net-id -> local mirror entity map.
#[derive(Resource, Default)]
pub struct Mirror {
    pub by_id: HashMap<u64, Entity>,
    /// Last authoritative tick applied, for presentation interpolation.
    pub tick: u32,
}

/// Read-only replica of one authoritative entity.
#[derive(Component, Clone, Copy, Debug, PartialEq)]
pub struct MirroredEntity {
    pub kind: ReplicatedKind,
}

/// Replicated status aggregate summary, for movement/animation presentation.
#[derive(Component, Clone, Copy, Debug, PartialEq)]
pub struct MirroredStatus {
    pub speed_multiplier: f32,
    pub stunned: bool,
}

impl Default for MirroredStatus {
    fn default() -> Self {
        Self {
            speed_multiplier: 1.0,
            stunned: false,
        }
    }
}

/// Drain the link: deltas mutate the mirror, cues are re-emitted as local
/// messages for the presentation layer and nothing else.
pub fn apply_server_messages(
    mut commands: Commands,
    session: Option<Res<ClientSession>>,
    mut mirror: ResMut<Mirror>,
    mut cues: MessageWriter<PresentationCue>,
    mut replicas: Query<(&mut Position, Option<&mut Health>, Option<&mut MirroredStatus>)>,
) {
    let Some(session) = session else {
        return;
    };
    while let Some(message) = session.endpoint.try_recv() {
        match message {
            ServerMessage::Delta(delta) => {
                apply_delta(&mut commands, &mut mirror, &mut replicas, delta);
            }
            ServerMessage::Cue(cue) => {
                cues.write(cue);
            }
        }
    }
}

fn apply_delta(
    commands: &mut Commands,
    mirror: &mut Mirror,
    replicas: &mut Query<(&mut Position, Option<&mut Health>, Option<&mut MirroredStatus>)>,
    delta: StateDelta,
) {
    mirror.tick = delta.tick;

    for spawn in delta.spawns {
        spawn_mirror(commands, mirror, spawn);
    }

    for update in delta.updates {
        let Some(&entity) = mirror.by_id.get(&update.id) else {
            continue;
        };
        apply_update(replicas, entity, &update);
    }

    for id in delta.despawns {
        if let Some(entity) = mirror.by_id.remove(&id) {
            if let Ok(mut c) = commands.get_entity(entity) {
                c.try_despawn();
            }
        }
    }
}

fn spawn_mirror(commands: &mut Commands, mirror: &mut Mirror, spawn: EntitySpawn) {
    if mirror.by_id.contains_key(&spawn.id) {
        return;
    }
    let mut entity = commands.spawn((
        NetworkId(spawn.id),
        MirroredEntity { kind: spawn.kind },
        Position(spawn.position),
    ));
    if !matches!(spawn.kind, ReplicatedKind::Projectile) {
        entity.insert((Health::new(1.0), MirroredStatus::default()));
    }
    let entity = entity.id();
    debug!("Mirroring entity {} as {:?}", spawn.id, entity);
    mirror.by_id.insert(spawn.id, entity);
}

fn apply_update(
    replicas: &mut Query<(&mut Position, Option<&mut Health>, Option<&mut MirroredStatus>)>,
    entity: Entity,
    update: &EntityUpdate,
) {
    let Ok((mut position, health, status)) = replicas.get_mut(entity) else {
        return;
    };
    position.0 = update.position;
    if let (Some(mut health), Some(current)) = (health, update.health) {
        health.max = health.max.max(current);
        health.current = current;
    }
    if let Some(mut status) = status {
        status.speed_multiplier = update.speed_multiplier;
        status.stunned = update.stunned;
    }
}
