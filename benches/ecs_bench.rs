#![allow(dead_code)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use weft_ecs::{SparseWorld, World};

#[derive(Debug, Clone, Copy)]
struct Position(f32, f32, f32);

#[derive(Debug, Clone, Copy)]
struct Velocity(f32, f32, f32);

#[derive(Debug, Clone, Copy)]
struct Health(u32);

fn spawn_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_bench");

    group.bench_function("spawn_2_components", |b| {
        let mut world = World::new();
        b.iter(|| {
            for _ in 0..1000 {
                black_box(
                    world
                        .spawn((Position(1.0, 2.0, 3.0), Velocity(1.0, 0.0, 0.0)))
                        .unwrap(),
                );
            }
        });
    });

    group.bench_function("spawn_3_components", |b| {
        let mut world = World::new();
        b.iter(|| {
            for _ in 0..1000 {
                black_box(
                    world
                        .spawn((
                            Position(1.0, 2.0, 3.0),
                            Velocity(1.0, 0.0, 0.0),
                            Health(100),
                        ))
                        .unwrap(),
                );
            }
        });
    });

    group.finish();
}

fn iterate_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate_bench");

    group.bench_function("archetype_view_10k", |b| {
        let mut world = World::new();
        for i in 0..10_000 {
            world
                .spawn((Position(i as f32, 0.0, 0.0), Velocity(1.0, 1.0, 0.0)))
                .unwrap();
        }
        b.iter(|| {
            for (_, position, velocity) in world.view::<(Position, Velocity)>() {
                position.0 += velocity.0;
                position.1 += velocity.1;
            }
        });
    });

    group.bench_function("sparse_query_10k", |b| {
        let mut world = SparseWorld::new();
        for i in 0..10_000 {
            let entity = world.create_entity();
            world
                .add_component(entity, Position(i as f32, 0.0, 0.0))
                .unwrap();
            if i % 2 == 0 {
                world.add_component(entity, Velocity(1.0, 1.0, 0.0)).unwrap();
            }
        }
        let mut query = world.create_query::<(Position, Velocity)>(None).unwrap();
        b.iter(|| {
            for (_, position, velocity) in query.iter(&mut world) {
                position.0 += velocity.0;
                position.1 += velocity.1;
            }
        });
    });

    group.finish();
}

criterion_group!(benches, spawn_benchmark, iterate_benchmark);
criterion_main!(benches);
