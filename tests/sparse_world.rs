use weft_ecs::{EcsError, EntityId, SparseWorld};

#[derive(Debug, Clone, Copy, PartialEq)]
struct A(u32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct B(u32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct C(u32);

#[test]
fn test_intersection_of_difference_selects_a_and_b_without_c() {
    let mut world = SparseWorld::new();
    let with_ab = world.create_entity();
    let with_abc = world.create_entity();
    let with_a = world.create_entity();

    world.add_component(with_ab, A(1)).unwrap();
    world.add_component(with_ab, B(1)).unwrap();
    world.add_component(with_abc, A(2)).unwrap();
    world.add_component(with_abc, B(2)).unwrap();
    world.add_component(with_abc, C(2)).unwrap();
    world.add_component(with_a, A(3)).unwrap();

    let leaf_a = world.leaf_node::<A>().unwrap();
    let leaf_b = world.leaf_node::<B>().unwrap();
    let leaf_c = world.leaf_node::<C>().unwrap();
    let b_without_c = world.difference_node(leaf_b, leaf_c).unwrap();
    let root = world.intersection_node(vec![leaf_a, b_without_c]).unwrap();

    let mut query = world.create_query::<(A, B)>(Some(root)).unwrap();
    let matched: Vec<EntityId> = query
        .iter(&mut world)
        .map(|(entity, _, _)| entity)
        .collect();
    assert_eq!(matched, vec![with_ab]);
}

#[test]
fn test_query_rejects_unguaranteed_component() {
    let mut world = SparseWorld::new();
    let entity = world.create_entity();
    world.add_component(entity, A(0)).unwrap();

    let leaf_a = world.leaf_node::<A>().unwrap();
    let result = world.create_query::<(A, B)>(Some(leaf_a));
    assert!(matches!(
        result,
        Err(EcsError::ComponentNotGuaranteed { .. })
    ));
}

#[test]
fn test_query_tracks_mutations_through_change_signals() {
    let mut world = SparseWorld::new();
    let first = world.create_entity();
    world.add_component(first, A(1)).unwrap();
    world.add_component(first, B(1)).unwrap();

    let mut query = world.create_query::<(A, B)>(None).unwrap();
    assert_eq!(query.entity_count(&world), 1);

    // A new matching entity appears on the next materialization.
    let second = world.create_entity();
    world.add_component(second, A(2)).unwrap();
    world.add_component(second, B(2)).unwrap();
    let mut matched: Vec<EntityId> = query.entities(&world).to_vec();
    matched.sort();
    assert_eq!(matched, vec![first, second]);

    // Removing a bound component drops the entity from the result.
    world.remove_component::<B>(first).unwrap();
    assert_eq!(query.entities(&world), &[second]);

    // Deleting the survivor empties the query.
    world.delete_entity(second).unwrap();
    assert_eq!(query.entity_count(&world), 0);
}

#[test]
fn test_difference_reacts_to_exclusion_side() {
    let mut world = SparseWorld::new();
    let entity = world.create_entity();
    world.add_component(entity, A(1)).unwrap();
    world.add_component(entity, B(1)).unwrap();

    let leaf_b = world.leaf_node::<B>().unwrap();
    let leaf_c = world.leaf_node::<C>().unwrap();
    let root = world.difference_node(leaf_b, leaf_c).unwrap();
    let mut query = world.create_query::<(B,)>(Some(root)).unwrap();
    assert_eq!(query.entity_count(&world), 1);

    // Tagging the entity with C excludes it via the difference node.
    world.add_component(entity, C(0)).unwrap();
    assert_eq!(query.entity_count(&world), 0);

    world.remove_component::<C>(entity).unwrap();
    assert_eq!(query.entity_count(&world), 1);
}

#[test]
fn test_query_values_are_mutable() {
    let mut world = SparseWorld::new();
    let entity = world.create_entity();
    world.add_component(entity, A(10)).unwrap();
    world.add_component(entity, B(0)).unwrap();

    let mut query = world.create_query::<(A, B)>(None).unwrap();
    for (_, a, b) in query.iter(&mut world) {
        b.0 = a.0 * 2;
    }
    assert_eq!(world.try_get_component::<B>(entity), Some(&B(20)));
}

#[test]
fn test_node_membership_follows_graph_shape() {
    let mut world = SparseWorld::new();
    let entity = world.create_entity();
    world.add_component(entity, A(0)).unwrap();
    world.add_component(entity, C(0)).unwrap();

    let leaf_a = world.leaf_node::<A>().unwrap();
    let leaf_c = world.leaf_node::<C>().unwrap();
    let root = world.difference_node(leaf_a, leaf_c).unwrap();

    assert!(world.node_has_entity(leaf_a, entity));
    assert!(!world.node_has_entity(root, entity));
    assert!(world.node_entities(root).is_empty());
}

#[test]
fn test_recycled_id_starts_clean() {
    let mut world = SparseWorld::new();
    let a = world.create_entity();
    let b = world.create_entity();
    world.add_component(a, A(1)).unwrap();
    world.add_component(a, B(1)).unwrap();

    world.delete_entity(a).unwrap();
    let reused = world.create_entity();
    assert_eq!(reused, a);
    assert_eq!(world.try_get_component::<A>(reused), None);
    assert_eq!(world.try_get_component::<B>(reused), None);
    assert!(world.is_registered(b));
}

#[test]
fn test_leaf_order_is_dense_insertion_order() {
    let mut world = SparseWorld::new();
    let entities: Vec<EntityId> = (0..4).map(|_| world.create_entity()).collect();
    for (value, &entity) in entities.iter().enumerate() {
        world.add_component(entity, A(value as u32)).unwrap();
    }

    let leaf_a = world.leaf_node::<A>().unwrap();
    assert_eq!(world.node_entities(leaf_a), entities);
}
