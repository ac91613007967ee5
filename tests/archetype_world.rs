use weft_ecs::{EcsError, EntityId, World};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    dx: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct A(u64);

#[derive(Debug, Clone, Copy, PartialEq)]
struct B(u32);

#[test]
fn test_views_select_exactly_matching_entities() {
    let mut world = World::new();
    let entities: Vec<EntityId> = (0..3).map(|_| world.create_entity()).collect();

    for &entity in &entities {
        world.add_component(entity, Position { x: 1.0, y: 2.0 }).unwrap();
    }
    world.add_component(entities[0], Velocity { dx: 1.0 }).unwrap();
    world.add_component(entities[2], Velocity { dx: 1.0 }).unwrap();

    let mut both: Vec<EntityId> = world
        .view::<(Position, Velocity)>()
        .into_iter()
        .map(|(entity, _, _)| entity)
        .collect();
    both.sort();
    assert_eq!(both, vec![entities[0], entities[2]]);

    let mut all: Vec<EntityId> = world
        .view::<(Position,)>()
        .into_iter()
        .map(|(entity, _)| entity)
        .collect();
    all.sort();
    assert_eq!(all, entities);
}

#[test]
fn test_transition_moves_entity_between_tables() {
    let mut world = World::new();
    let entity = world.create_entity();
    world.add_component(entity, A(7)).unwrap();

    let tables_with_entity = |world: &World| {
        world
            .tables()
            .iter()
            .filter(|table| table.contains(entity))
            .count()
    };
    assert_eq!(tables_with_entity(&world), 1);

    world.add_component(entity, B(11)).unwrap();

    // Exactly one table lists the entity, and it is the {A, B} one.
    let listing: Vec<_> = world
        .tables()
        .iter()
        .filter(|table| table.contains(entity))
        .collect();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].signature().len(), 2);

    // The prior value survived the transition byte-for-byte.
    assert_eq!(world.try_get_component::<A>(entity), Some(&A(7)));
    assert_eq!(world.try_get_component::<B>(entity), Some(&B(11)));
}

#[test]
fn test_transition_preserves_unrelated_values() {
    let mut world = World::new();
    let entity = world
        .spawn((Position { x: 3.5, y: -1.25 }, A(99)))
        .unwrap();

    world.add_component(entity, Velocity { dx: 0.5 }).unwrap();
    assert_eq!(
        world.try_get_component::<Position>(entity),
        Some(&Position { x: 3.5, y: -1.25 })
    );
    assert_eq!(world.try_get_component::<A>(entity), Some(&A(99)));

    world.remove_component::<A>(entity).unwrap();
    assert_eq!(world.try_get_component::<A>(entity), None);
    assert_eq!(
        world.try_get_component::<Position>(entity),
        Some(&Position { x: 3.5, y: -1.25 })
    );
    assert_eq!(
        world.try_get_component::<Velocity>(entity),
        Some(&Velocity { dx: 0.5 })
    );
}

#[test]
fn test_delete_frees_smallest_id_first() {
    let mut world = World::new();
    let entities: Vec<EntityId> = (0..3).map(|_| world.create_entity()).collect();
    world.add_component(entities[1], Position { x: 0.0, y: 0.0 }).unwrap();
    world.add_component(entities[1], Velocity { dx: 0.0 }).unwrap();

    world.delete_entity(entities[1]).unwrap();
    assert!(!world.is_registered(entities[1]));

    // No storage reports the deleted entity.
    assert!(world.tables().iter().all(|table| !table.contains(entities[1])));
    assert_eq!(world.try_get_component::<Position>(entities[1]), None);

    // The freed ID is handed out again before the counter grows.
    assert_eq!(world.create_entity(), entities[1]);
    assert_eq!(world.try_get_component::<Position>(entities[1]), None);
}

#[test]
fn test_delete_removes_from_exactly_one_table() {
    let mut world = World::new();
    let entity = world
        .spawn((Position { x: 1.0, y: 1.0 }, Velocity { dx: 2.0 }, A(3)))
        .unwrap();

    let listing = world
        .tables()
        .iter()
        .filter(|table| table.contains(entity))
        .count();
    assert_eq!(listing, 1);

    world.delete_entity(entity).unwrap();
    assert_eq!(world.entity_count(), 0);
}

#[test]
fn test_unregistered_entity_errors() {
    let mut world = World::new();
    let entity = world.create_entity();
    world.delete_entity(entity).unwrap();

    assert_eq!(
        world.add_component(entity, A(1)),
        Err(EcsError::EntityNotRegistered(entity))
    );
    assert_eq!(
        world.delete_entity(entity),
        Err(EcsError::EntityNotRegistered(entity))
    );
    assert_eq!(
        world.remove_component::<A>(entity),
        Err(EcsError::EntityNotRegistered(entity))
    );
}

#[test]
fn test_empty_view_iterates_zero_times() {
    let mut world = World::new();
    world.create_entity();

    let view = world.view::<(Position, Velocity)>();
    assert_eq!(view.entity_count(), 0);
    assert_eq!(view.into_iter().count(), 0);
}

#[test]
fn test_view_indexed_access_spans_tables() {
    let mut world = World::new();

    // Two archetypes match a view over Position: {Position} and
    // {Position, Velocity}.
    let mut expected = Vec::new();
    for i in 0..4 {
        let entity = world
            .spawn((Position { x: i as f32, y: 0.0 },))
            .unwrap();
        expected.push(entity);
    }
    for i in 4..7 {
        let entity = world
            .spawn((Position { x: i as f32, y: 0.0 }, Velocity { dx: 1.0 }))
            .unwrap();
        expected.push(entity);
    }

    let mut view = world.view::<(Position,)>();
    assert_eq!(view.entity_count(), 7);

    let mut seen: Vec<EntityId> = (0..7)
        .map(|index| view.get(index).map(|(entity, _)| entity).unwrap())
        .collect();
    assert!(view.get(7).is_none());

    seen.sort();
    expected.sort();
    assert_eq!(seen, expected);
}

#[test]
fn test_view_mutation_is_visible_through_world() {
    let mut world = World::new();
    let entity = world
        .spawn((Position { x: 0.0, y: 0.0 }, Velocity { dx: 2.5 }))
        .unwrap();

    for (_, position, velocity) in world.view::<(Position, Velocity)>() {
        position.x += velocity.dx;
    }

    assert_eq!(
        world.try_get_component::<Position>(entity),
        Some(&Position { x: 2.5, y: 0.0 })
    );
}

#[test]
fn test_every_table_row_maps_back_to_its_table() {
    let mut world = World::new();
    for i in 0..5 {
        let entity = world.create_entity();
        world.add_component(entity, A(i)).unwrap();
        if i % 2 == 0 {
            world.add_component(entity, B(i as u32)).unwrap();
        }
    }

    for table in world.tables() {
        for &entity in table.entities() {
            assert_eq!(world.signature_of(entity), Some(table.signature()));
        }
    }
}

#[test]
fn test_unrelated_component_add_leaves_view_unchanged() {
    let mut world = World::new();
    let entities: Vec<EntityId> = (0..4u64)
        .map(|i| world.spawn((A(i),)).unwrap())
        .collect();

    let snapshot = |world: &mut World| {
        let mut rows: Vec<(EntityId, u64)> = world
            .view::<(A,)>()
            .into_iter()
            .map(|(entity, a)| (entity, a.0))
            .collect();
        rows.sort();
        rows
    };

    let before = snapshot(&mut world);
    // B is outside the view's component set.
    world.add_component(entities[2], B(9)).unwrap();
    assert_eq!(snapshot(&mut world), before);
}

#[test]
fn test_remove_last_component_keeps_entity_registered() {
    let mut world = World::new();
    let entity = world.spawn((A(5),)).unwrap();
    world.remove_component::<A>(entity).unwrap();

    assert!(world.is_registered(entity));
    assert_eq!(world.try_get_component::<A>(entity), None);
    assert_eq!(world.signature_of(entity).map(|s| s.len()), Some(0));
}
