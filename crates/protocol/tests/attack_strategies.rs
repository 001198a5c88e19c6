use approx::assert_relative_eq;
use avian3d::prelude::*;
use bevy::prelude::*;
use protocol::attack::{AttackOutcome, CombatRng};
use protocol::*;
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
    EffectCatalog { effects }
}

/// One queued attack, resolved by `execute_pending` on the next update.
#[derive(Resource)]
struct PendingAttack {
    attacker: Entity,
    archetype: WeaponArchetype,
    stats: WeaponStats,
}

#[derive(Resource, Default)]
struct LastOutcome(AttackOutcome);

#[derive(Resource, Default)]
struct CueLog(Vec<PresentationCue>);

fn execute_pending(mut services: CombatServices, pending: Option<Res<PendingAttack>>) {
    let Some(pending) = pending else {
        return;
    };
    let Ok((_, position, rotation, team, ..)) = services.targets.get(pending.attacker) else {
        return;
    };
    let origin = position.0;
    let forward = facing_direction(rotation);
    let team = *team;
    let outcome = execute_attack(
        &mut services,
        pending.attacker,
        team,
        origin,
        forward,
        pending.archetype,
        &pending.stats,
        0,
    );
    services.commands.insert_resource(LastOutcome(outcome));
    services.commands.remove_resource::<PendingAttack>();
}

fn capture_cues(mut reader: MessageReader<PresentationCue>, mut log: ResMut<CueLog>) {
    for cue in reader.read() {
        log.0.push(cue.clone());
    }
}

fn test_app() -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.add_plugins(PhysicsPlugins::new(PostUpdate));
    app.insert_resource(SimTick(0));
    app.insert_resource(CombatRng::seeded(7));
    app.insert_resource(test_catalog());
    app.init_resource::<LastOutcome>();
    app.init_resource::<CueLog>();
    app.add_message::<PresentationCue>();
    app.add_systems(Update, (execute_pending, capture_cues).chain());
    app
}

fn spawn_combatant(app: &mut App, position: Vec3, team: u8) -> Entity {
    app.world_mut()
        .spawn((
            CharacterMarker,
            Team(team),
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

fn health_of(app: &App, entity: Entity) -> f32 {
    app.world().get::<Health>(entity).unwrap().current
}

fn queue_attack(app: &mut App, attacker: Entity, archetype: WeaponArchetype, stats: WeaponStats) {
    app.insert_resource(PendingAttack {
        attacker,
        archetype,
        stats,
    });
}

#[test]
fn melee_hits_single_target_for_exact_damage() {
    let mut app = test_app();
    let attacker = spawn_combatant(&mut app, Vec3::ZERO, 0);
    // Distance 1 directly ahead (default facing is -Z).
    let target = spawn_combatant(&mut app, Vec3::new(0.0, 0.0, -1.0), 1);
    app.update();

    queue_attack(
        &mut app,
        attacker,
        WeaponArchetype::Melee,
        WeaponStats {
            damage: 10.0,
            crit_chance: 0.0,
            range: 2.0,
            attack_angle: 90.0,
            ..Default::default()
        },
    );
    app.update();

    assert_eq!(health_of(&app, target), 90.0, "exactly 10 damage, once");
    assert_eq!(app.world().resource::<LastOutcome>().0.hits, 1);
}

#[test]
fn melee_cone_excludes_targets_behind() {
    let mut app = test_app();
    let attacker = spawn_combatant(&mut app, Vec3::ZERO, 0);
    let behind = spawn_combatant(&mut app, Vec3::new(0.0, 0.0, 1.5), 1);
    let ally = spawn_combatant(&mut app, Vec3::new(0.0, 0.0, -1.0), 0);
    app.update();

    queue_attack(
        &mut app,
        attacker,
        WeaponArchetype::Melee,
        WeaponStats {
            damage: 10.0,
            range: 4.0,
            attack_angle: 90.0,
            ..Default::default()
        },
    );
    app.update();

    assert_eq!(health_of(&app, behind), 100.0, "outside the cone");
    assert_eq!(health_of(&app, ally), 100.0, "allies are not valid targets");
    assert_eq!(app.world().resource::<LastOutcome>().0.hits, 0);
    assert!(
        app.world().get_resource::<PendingAttack>().is_none(),
        "zero targets is still a completed attack"
    );
}

#[test]
fn melee_knockback_is_horizontal() {
    let mut app = test_app();
    let attacker = spawn_combatant(&mut app, Vec3::ZERO, 0);
    let target = spawn_combatant(&mut app, Vec3::new(0.0, 0.0, -1.5), 1);
    app.update();

    queue_attack(
        &mut app,
        attacker,
        WeaponArchetype::Melee,
        WeaponStats {
            damage: 1.0,
            range: 3.0,
            attack_angle: 180.0,
            knockback: 8.0,
            ..Default::default()
        },
    );
    app.update();

    let velocity = app.world().get::<LinearVelocity>(target).unwrap().0;
    assert!(velocity.z < -1.0, "pushed away from the attacker");
    assert_relative_eq!(velocity.y, 0.0, epsilon = 1e-4);
}

#[test]
fn multi_projectile_fans_symmetrically() {
    let mut app = test_app();
    let attacker = spawn_combatant(&mut app, Vec3::ZERO, 0);
    app.update();

    queue_attack(
        &mut app,
        attacker,
        WeaponArchetype::MultiProjectile,
        WeaponStats {
            damage: 8.0,
            range: 25.0,
            projectile_speed: 30.0,
            projectile_count: 3,
            spread: 30.0,
            pierce: 1,
            on_hit: vec![HitEffect::DirectDamage { amount: 4.0 }],
            ..Default::default()
        },
    );
    app.update();

    let mut query = app.world_mut().query::<&Projectile>();
    let mut yaws: Vec<f32> = query
        .iter(app.world())
        .map(|p| p.direction.x.atan2(-p.direction.z).to_degrees())
        .collect();
    yaws.sort_by(|a, b| a.partial_cmp(b).unwrap());

    assert_eq!(yaws.len(), 3, "exactly 3 projectiles");
    assert_relative_eq!(yaws[0], -15.0, epsilon = 1e-3);
    assert_relative_eq!(yaws[1], 0.0, epsilon = 1e-3);
    assert_relative_eq!(yaws[2], 15.0, epsilon = 1e-3);
    assert_eq!(app.world().resource::<LastOutcome>().0.projectiles_spawned, 3);

    // Every projectile carries its own cloned effect list.
    for projectile in query.iter(app.world()) {
        assert_eq!(
            projectile.effects,
            vec![HitEffect::DirectDamage { amount: 4.0 }]
        );
        assert_eq!(projectile.pierce_remaining, 1);
    }
}

#[test]
fn zero_count_still_spawns_one_projectile() {
    let mut app = test_app();
    let attacker = spawn_combatant(&mut app, Vec3::ZERO, 0);
    app.update();

    queue_attack(
        &mut app,
        attacker,
        WeaponArchetype::MultiProjectile,
        WeaponStats {
            projectile_speed: 10.0,
            range: 10.0,
            projectile_count: 0,
            ..Default::default()
        },
    );
    app.update();

    assert_eq!(app.world().resource::<LastOutcome>().0.projectiles_spawned, 1);
}

#[test]
fn spell_damages_hostiles_and_heals_allies() {
    let mut app = test_app();
    let attacker = spawn_combatant(&mut app, Vec3::ZERO, 0);
    let ally = spawn_combatant(&mut app, Vec3::new(1.5, 0.0, 0.0), 0);
    let enemy = spawn_combatant(&mut app, Vec3::new(-1.5, 0.0, 0.0), 1);
    let outside = spawn_combatant(&mut app, Vec3::new(40.0, 0.0, 0.0), 1);
    app.world_mut().get_mut::<Health>(ally).unwrap().current = 50.0;
    app.update();

    queue_attack(
        &mut app,
        attacker,
        WeaponArchetype::Spell,
        WeaponStats {
            damage: 10.0,
            range: 5.0,
            status_effect: Some(EffectId("burn".into())),
            ..Default::default()
        },
    );
    app.update();

    assert_eq!(health_of(&app, enemy), 90.0);
    assert_eq!(health_of(&app, ally), 65.0, "allies heal a fixed amount");
    assert_eq!(health_of(&app, outside), 100.0, "outside the sphere");
    assert!(
        app.world()
            .get::<StatusRegistry>(enemy)
            .unwrap()
            .has(&EffectId("burn".into())),
        "elemental status lands with spell damage"
    );
}

#[test]
fn beam_hits_only_the_first_target() {
    let mut app = test_app();
    let attacker = spawn_combatant(&mut app, Vec3::ZERO, 0);
    let near = spawn_combatant(&mut app, Vec3::new(0.0, 0.0, -4.0), 1);
    let far = spawn_combatant(&mut app, Vec3::new(0.0, 0.0, -8.0), 1);
    app.update();

    queue_attack(
        &mut app,
        attacker,
        WeaponArchetype::Beam,
        WeaponStats {
            damage: 16.0,
            range: 40.0,
            pierce: 5,
            ..Default::default()
        },
    );
    app.update();

    assert_eq!(health_of(&app, near), 84.0);
    assert_eq!(health_of(&app, far), 100.0, "a beam never pierces");
    assert_eq!(app.world().resource::<LastOutcome>().0.hits, 1);

    let impacts = app
        .world()
        .resource::<CueLog>()
        .0
        .iter()
        .filter(|cue| matches!(cue, PresentationCue::Impact { .. }))
        .count();
    assert_eq!(impacts, 1);
}

#[test_log::test]
fn chain_beam_bounces_and_emits_polyline() {
    let mut app = test_app();
    let attacker = spawn_combatant(&mut app, Vec3::ZERO, 0);
    let first = spawn_combatant(&mut app, Vec3::new(0.0, 0.0, -4.0), 1);
    let second = spawn_combatant(&mut app, Vec3::new(2.0, 0.0, -4.0), 1);
    let third = spawn_combatant(&mut app, Vec3::new(4.0, 0.0, -4.0), 1);
    app.update();

    queue_attack(
        &mut app,
        attacker,
        WeaponArchetype::ChainBeam,
        WeaponStats {
            damage: 9.0,
            range: 20.0,
            projectile_count: 2,
            ..Default::default()
        },
    );
    app.update();

    assert_eq!(health_of(&app, first), 91.0);
    assert_eq!(health_of(&app, second), 91.0);
    assert_eq!(health_of(&app, third), 91.0);
    assert_eq!(
        app.world().resource::<LastOutcome>().0.hits,
        3,
        "1 initial hit + 2 bounces"
    );

    let log = app.world().resource::<CueLog>();
    let polylines: Vec<&Vec<Vec3>> = log
        .0
        .iter()
        .filter_map(|cue| match cue {
            PresentationCue::BeamPolyline { points } => Some(points),
            _ => None,
        })
        .collect();
    assert_eq!(polylines.len(), 1, "polyline broadcast exactly once");
    assert_eq!(polylines[0].len(), 4, "origin + 3 struck targets");
}

#[test]
fn chain_beam_requires_line_of_sight() {
    let mut app = test_app();
    let attacker = spawn_combatant(&mut app, Vec3::ZERO, 0);
    let first = spawn_combatant(&mut app, Vec3::new(0.0, 0.0, -4.0), 1);
    let second = spawn_combatant(&mut app, Vec3::new(4.0, 0.0, -4.0), 1);
    // Wall between the two targets, on the obstacle layer.
    app.world_mut().spawn((
        Position(Vec3::new(2.0, 0.0, -4.0)),
        Rotation::default(),
        Collider::cuboid(0.2, 4.0, 4.0),
        obstacle_collision_layers(),
    ));
    app.update();

    queue_attack(
        &mut app,
        attacker,
        WeaponArchetype::ChainBeam,
        WeaponStats {
            damage: 9.0,
            range: 20.0,
            projectile_count: 3,
            ..Default::default()
        },
    );
    app.update();

    assert_eq!(health_of(&app, first), 91.0);
    assert_eq!(health_of(&app, second), 100.0, "bounce blocked by the wall");
    assert_eq!(app.world().resource::<LastOutcome>().0.hits, 1);
}

#[test]
fn area_charge_detonates_after_fuse() {
    let mut app = test_app();
    app.add_systems(PreUpdate, projectile::detonate_area_charges);
    let attacker = spawn_combatant(&mut app, Vec3::ZERO, 0);
    let enemy = spawn_combatant(&mut app, Vec3::new(0.0, 0.0, -3.0), 1);
    app.update();

    queue_attack(
        &mut app,
        attacker,
        WeaponArchetype::Area,
        WeaponStats {
            damage: 20.0,
            knockback: 14.0,
            projectile_speed: 0.0,
            explosion_radius: 6.0,
            status_effect: Some(EffectId("burn".into())),
            ..Default::default()
        },
    );
    app.update();

    let mut charge_query = app.world_mut().query::<&AreaCharge>();
    let charges = charge_query.iter(app.world()).count();
    assert_eq!(charges, 1, "charge waits on its fuse");
    assert_eq!(health_of(&app, enemy), 100.0, "no damage before detonation");

    // Jump past the fuse.
    app.world_mut().resource_mut::<SimTick>().0 += secs_to_ticks(attack::AREA_FUSE_SECS) + 1;
    app.update();

    assert_eq!(health_of(&app, enemy), 80.0);
    assert_eq!(
        health_of(&app, attacker),
        100.0,
        "the thrower is excluded from its own blast"
    );
    let velocity = app.world().get::<LinearVelocity>(enemy).unwrap().0;
    assert!(velocity.length() > 1.0, "blast applies knockback");
    let charges = charge_query.iter(app.world()).count();
    assert_eq!(charges, 0, "charge destroyed on detonation");
}
