use avian3d::prelude::*;
use bevy::prelude::*;
use client::ClientSession;
use protocol::attack::CombatRng;
use protocol::*;
use server::replication::{NetworkIdAllocator, ReplicatedIndex};
use server::{gameplay, replication, ServerLinks, ServerNetworkConfig};
use std::collections::HashMap;

fn test_catalog() -> EffectCatalog {
    let mut effects = HashMap::new();
    effects.insert(
        EffectId("burn".into()),
        StatusEffectDef {
            duration: 3.0,
            tick_interval: 1.0,
            damage_per_tick: 5.0,
            speed_multiplier: 1.0,
            stun: false,
            silence: false,
            stackable: true,
            max_stacks: 3,
        },
    );
    effects.insert(
        EffectId("stun".into()),
        StatusEffectDef {
            duration: 1.0,
            tick_interval: 0.0,
            damage_per_tick: 0.0,
            speed_multiplier: 1.0,
            stun: true,
            silence: false,
            stackable: false,
            max_stacks: 1,
        },
    );
    EffectCatalog { effects }
}

fn server_app() -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.add_plugins(PhysicsPlugins::new(PostUpdate));
    app.insert_resource(SimTick(0));
    app.insert_resource(CombatRng::seeded(5));
    app.insert_resource(test_catalog());
    app.insert_resource(ServerNetworkConfig {
        replication_interval_ticks: 1,
    });
    app.init_resource::<ServerLinks>();
    app.init_resource::<NetworkIdAllocator>();
    app.init_resource::<ReplicatedIndex>();
    app.add_message::<PresentationCue>();
    app.add_systems(
        Update,
        (
            gameplay::process_attack_intents,
            projectile::process_projectile_hits,
            status::tick_status_effects,
            gameplay::check_death_and_respawn,
            replication::assign_network_ids,
            replication::broadcast_state,
        )
            .chain(),
    );
    app
}

fn melee_weapon() -> EquippedWeapon {
    EquippedWeapon::from_def(
        WeaponId("sword".into()),
        &WeaponDef {
            archetype: WeaponArchetype::Melee,
            stats: WeaponStats {
                damage: 10.0,
                cooldown: 1.0,
                range: 3.0,
                attack_angle: 180.0,
                ..Default::default()
            },
        },
    )
}

fn spawn_player(app: &mut App, client_id: u64, position: Vec3) -> Entity {
    app.world_mut()
        .spawn((
            CharacterMarker,
            PlayerId(client_id),
            Team(0),
            Health::new(100.0),
            StatusRegistry::default(),
            Position(position),
            Rotation::default(),
            LinearVelocity::default(),
            Collider::capsule(0.5, 1.0),
            character_collision_layers(),
            melee_weapon(),
        ))
        .id()
}

fn spawn_dummy(app: &mut App, position: Vec3) -> Entity {
    app.world_mut()
        .spawn((
            CharacterMarker,
            DummyTarget,
            Team(200),
            Health::new(100.0),
            StatusRegistry::default(),
            Position(position),
            Rotation::default(),
            LinearVelocity::default(),
            Collider::capsule(0.5, 1.0),
            character_collision_layers(),
        ))
        .id()
}

fn connect(app: &mut App) -> ClientSession {
    let (client_id, endpoint) = app
        .world_mut()
        .resource_mut::<ServerLinks>()
        .open_link();
    ClientSession::new(client_id, endpoint)
}

fn drain(session: &ClientSession) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Some(message) = session.endpoint.try_recv() {
        messages.push(message);
    }
    messages
}

fn cues(messages: &[ServerMessage]) -> Vec<PresentationCue> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Cue(cue) => Some(cue.clone()),
            _ => None,
        })
        .collect()
}

fn deltas(messages: &[ServerMessage]) -> Vec<StateDelta> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Delta(delta) => Some(delta.clone()),
            _ => None,
        })
        .collect()
}

fn health_of(app: &App, entity: Entity) -> f32 {
    app.world().get::<Health>(entity).unwrap().current
}

#[test_log::test]
fn signed_intent_resolves_an_attack() {
    let mut app = server_app();
    let mut session = connect(&mut app);
    spawn_player(&mut app, session.player, Vec3::ZERO);
    let enemy = spawn_dummy(&mut app, Vec3::new(0.0, 0.0, -2.0));
    app.update();
    drain(&session);

    assert!(session.request_attack());
    app.update();

    assert_eq!(health_of(&app, enemy), 90.0);

    let messages = drain(&session);
    let fired: Vec<_> = cues(&messages)
        .into_iter()
        .filter(|c| matches!(c, PresentationCue::WeaponFired { .. }))
        .collect();
    assert_eq!(fired.len(), 1, "one advisory fired event per attack");
    if let PresentationCue::WeaponFired { cooldown, .. } = &fired[0] {
        assert_eq!(*cooldown, 1.0);
    }

    let updates: Vec<_> = deltas(&messages)
        .iter()
        .flat_map(|d| d.updates.clone())
        .filter(|u| u.health == Some(90.0))
        .collect();
    assert!(
        !updates.is_empty(),
        "damage shows up in the replicated state deltas"
    );
}

#[test]
fn cooldown_makes_repeat_intents_no_ops() {
    let mut app = server_app();
    let mut session = connect(&mut app);
    spawn_player(&mut app, session.player, Vec3::ZERO);
    let enemy = spawn_dummy(&mut app, Vec3::new(0.0, 0.0, -2.0));
    app.update();

    assert!(session.request_attack());
    app.update();
    drain(&session);

    // SimTick never advanced, so the cooldown cannot have elapsed.
    assert!(session.request_attack());
    app.update();

    assert_eq!(
        health_of(&app, enemy),
        90.0,
        "no damage from the gated attack"
    );
    let fired = cues(&drain(&session))
        .into_iter()
        .filter(|c| matches!(c, PresentationCue::WeaponFired { .. }))
        .count();
    assert_eq!(fired, 0, "no fired event from the gated attack");
}

#[test_log::test]
fn forged_and_misaddressed_intents_are_dropped() {
    let mut app = server_app();
    let session = connect(&mut app);
    spawn_player(&mut app, session.player, Vec3::ZERO);
    let enemy = spawn_dummy(&mut app, Vec3::new(0.0, 0.0, -2.0));
    app.update();

    // Bad signature.
    session.endpoint.send(&ClientMessage::AttackIntent {
        player: session.player,
        counter: 10,
        signature: 0xdecafbad,
    });
    // Correctly signed, but for a player this link does not own.
    let other = session.player + 1;
    session.endpoint.send(&ClientMessage::AttackIntent {
        player: other,
        counter: 11,
        signature: sign_intent(&PRIVATE_KEY, other, 11),
    });
    app.update();

    assert_eq!(health_of(&app, enemy), 100.0, "neither intent executed");
}

#[test]
fn replayed_intent_counters_are_dropped() {
    let mut app = server_app();
    let mut session = connect(&mut app);
    let player = spawn_player(&mut app, session.player, Vec3::ZERO);
    let enemy = spawn_dummy(&mut app, Vec3::new(0.0, 0.0, -2.0));
    app.update();

    assert!(session.request_attack());
    app.update();
    assert_eq!(health_of(&app, enemy), 90.0);

    // Clear the cooldown, then replay the first intent verbatim.
    app.world_mut()
        .get_mut::<EquippedWeapon>(player)
        .unwrap()
        .last_fired = None;
    session.endpoint.send(&ClientMessage::AttackIntent {
        player: session.player,
        counter: 1,
        signature: sign_intent(&PRIVATE_KEY, session.player, 1),
    });
    app.update();

    assert_eq!(health_of(&app, enemy), 90.0, "replayed counter is ignored");
}

#[test]
fn stunned_attacker_intents_are_no_ops() {
    let mut app = server_app();
    let mut session = connect(&mut app);
    let player = spawn_player(&mut app, session.player, Vec3::ZERO);
    let enemy = spawn_dummy(&mut app, Vec3::new(0.0, 0.0, -2.0));

    let catalog = test_catalog();
    app.world_mut()
        .get_mut::<StatusRegistry>(player)
        .unwrap()
        .apply(&EffectId("stun".into()), &catalog);
    // One step so the stun aggregate is published.
    app.update();

    assert!(session.request_attack());
    app.update();

    assert_eq!(health_of(&app, enemy), 100.0, "stunned attackers cannot fire");
}

#[test]
fn death_clears_status_and_despawns_dummies() {
    let mut app = server_app();
    let mut session = connect(&mut app);
    spawn_player(&mut app, session.player, Vec3::ZERO);
    let enemy = spawn_dummy(&mut app, Vec3::new(0.0, 0.0, -2.0));

    let catalog = test_catalog();
    {
        let mut world = app.world_mut();
        let mut registry = world.get_mut::<StatusRegistry>(enemy).unwrap();
        registry.apply(&EffectId("burn".into()), &catalog);
        world.get_mut::<Health>(enemy).unwrap().current = 5.0;
    }
    app.update();
    let enemy_id = app.world().get::<NetworkId>(enemy).unwrap().0;
    drain(&session);

    assert!(session.request_attack());
    app.update();

    assert!(
        app.world().get_entity(enemy).is_err(),
        "dead dummy targets despawn"
    );
    let messages = drain(&session);
    let removed = cues(&messages).into_iter().any(|c| {
        matches!(c, PresentationCue::StatusRemoved { target, ref effect }
            if target == enemy_id && *effect == EffectId("burn".into()))
    });
    assert!(removed, "clearing the registry on death emits removal cues");

    // The following delta reports the despawn.
    app.update();
    let despawned = deltas(&drain(&session))
        .iter()
        .any(|d| d.despawns.contains(&enemy_id));
    assert!(despawned);
}

#[test]
fn deltas_describe_spawned_entities() {
    let mut app = server_app();
    let session = connect(&mut app);
    spawn_player(&mut app, session.player, Vec3::ZERO);
    spawn_dummy(&mut app, Vec3::new(0.0, 0.0, -2.0));

    // First update assigns ids, second broadcasts them as spawns.
    app.update();
    app.update();

    let all = deltas(&drain(&session));
    let spawns: Vec<_> = all.iter().flat_map(|d| d.spawns.clone()).collect();
    assert!(spawns
        .iter()
        .any(|s| matches!(s.kind, ReplicatedKind::Character { player, .. } if player == session.player)));
    assert!(spawns
        .iter()
        .any(|s| matches!(s.kind, ReplicatedKind::Dummy { .. })));
}
