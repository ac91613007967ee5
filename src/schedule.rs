//! Engine: system groups with priority-ordered, optionally partitioned
//! dispatch
//!
//! The engine hosts a world, a command buffer, and a worker pool.
//! Systems are registered into named groups; `call_system_group` runs a
//! group's systems in descending priority order (ties keep insertion
//! order), then flushes the command buffer against the world, so
//! deferred structural mutations from the finished group are visible to
//! the next one.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use rustc_hash::FxHashMap;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::command::CommandBuffer;
use crate::error::Result;
use crate::executor::WorkerPool;
use crate::system::{EntityCommandSystem, EntitySystem, SystemGroupId, SystemId};
use crate::view::{ViewBundle, ViewPart};
use crate::world::World;

type SystemExecutor =
    Box<dyn Fn(&mut World, &CommandBuffer<World>, &WorkerPool) -> Result<()> + Send + Sync>;

struct SystemEntry {
    executor: SystemExecutor,
    id: SystemId,
    priority: i32,
}

#[derive(Default)]
struct SystemGroup {
    systems: Vec<SystemEntry>,
    dirty: bool,
}

/// ECS engine: world, command buffer, worker pool, and system groups
pub struct Engine {
    world: World,
    commands: CommandBuffer<World>,
    pool: WorkerPool,
    groups: BTreeMap<SystemGroupId, SystemGroup>,
    system_to_group: FxHashMap<SystemId, SystemGroupId>,
    next_group_id: u64,
    next_system_id: u64,
}

impl Engine {
    /// Engine with the default worker count (hardware concurrency,
    /// 4 when unknown)
    pub fn new() -> Self {
        Self::with_threads(WorkerPool::default_threads())
    }

    /// Engine with an explicit worker count
    pub fn with_threads(threads: usize) -> Self {
        Self {
            world: World::new(),
            commands: CommandBuffer::new(),
            pool: WorkerPool::new(threads),
            groups: BTreeMap::new(),
            system_to_group: FxHashMap::default(),
            next_group_id: 0,
            next_system_id: 0,
        }
    }

    /// Hosted world
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Hosted world, mutable
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// The engine's command buffer
    pub fn commands(&self) -> &CommandBuffer<World> {
        &self.commands
    }

    /// Number of pool workers
    pub fn worker_count(&self) -> usize {
        self.pool.thread_count()
    }

    /// Fresh group identifier
    pub fn create_system_group(&mut self) -> SystemGroupId {
        let id = SystemGroupId(self.next_group_id);
        self.next_group_id += 1;
        id
    }

    /// Drop a group and all its systems
    pub fn retire_system_group(&mut self, group: SystemGroupId) {
        if let Some(entry) = self.groups.remove(&group) {
            for system in entry.systems {
                self.system_to_group.remove(&system.id);
            }
        }
    }

    /// Remove one system from its group
    pub fn retire_system(&mut self, system: SystemId) {
        let Some(group_id) = self.system_to_group.remove(&system) else {
            return;
        };
        if let Some(group) = self.groups.get_mut(&group_id) {
            let before = group.systems.len();
            group.systems.retain(|entry| entry.id != system);
            if group.systems.len() != before {
                group.dirty = true;
            }
        }
    }

    /// Register a whole-world system.
    pub fn register_system<F>(
        &mut self,
        group: SystemGroupId,
        system: F,
        priority: i32,
    ) -> SystemId
    where
        F: Fn(&mut World) -> Result<()> + Send + Sync + 'static,
    {
        self.register_executor(
            group,
            Box::new(move |world, _commands, _pool| system(world)),
            priority,
        )
    }

    /// Register a per-entity system over the view of `Q`.
    pub fn register_entity_system<Q, F>(
        &mut self,
        group: SystemGroupId,
        system: F,
        priority: i32,
    ) -> SystemId
    where
        Q: ViewBundle,
        F: EntitySystem<Q>,
    {
        self.register_executor(
            group,
            Box::new(move |world, _commands, _pool| {
                let view = world.view::<Q>();
                let total = view.entity_count();
                run_segments(&view.segments(0, total), &system);
                Ok(())
            }),
            priority,
        )
    }

    /// Per-entity system that also receives the command buffer.
    pub fn register_entity_command_system<Q, F>(
        &mut self,
        group: SystemGroupId,
        system: F,
        priority: i32,
    ) -> SystemId
    where
        Q: ViewBundle,
        F: EntityCommandSystem<Q>,
    {
        self.register_executor(
            group,
            Box::new(move |world, commands, _pool| {
                let view = world.view::<Q>();
                let total = view.entity_count();
                run_command_segments(&view.segments(0, total), &system, commands);
                Ok(())
            }),
            priority,
        )
    }

    /// Per-entity system partitioned across the worker pool.
    ///
    /// For `W` workers and `N` entities, worker `t` gets the half-open
    /// range `[t·chunk, min((t+1)·chunk, N))` with `chunk = ⌈N/W⌉`.
    /// With fewer entities than workers, iteration stays on the calling
    /// thread.
    pub fn register_entity_system_threaded<Q, F>(
        &mut self,
        group: SystemGroupId,
        system: F,
        priority: i32,
    ) -> SystemId
    where
        Q: ViewBundle,
        F: EntitySystem<Q>,
    {
        let system = Arc::new(system);
        self.register_executor(
            group,
            Box::new(move |world, _commands, pool| {
                let view = world.view::<Q>();
                let total = view.entity_count();
                if total == 0 {
                    return Ok(());
                }
                let workers = pool.thread_count();
                if total < workers {
                    run_segments(&view.segments(0, total), system.as_ref());
                    return Ok(());
                }

                let chunk = (total + workers - 1) / workers;
                let mut dispatch = Ok(());
                for t in 0..workers {
                    let start = t * chunk;
                    let end = ((t + 1) * chunk).min(total);
                    if start >= end {
                        break;
                    }
                    let task = ChunkTask {
                        segments: view.segments(start, end),
                        system: Arc::clone(&system),
                    };
                    if let Err(error) = pool.execute(move || task.run()) {
                        dispatch = Err(error);
                        break;
                    }
                }
                // The view's pointers must outlive every dispatched task.
                pool.wait_all();
                dispatch
            }),
            priority,
        )
    }

    /// Threaded variant of [`Self::register_entity_command_system`].
    pub fn register_entity_command_system_threaded<Q, F>(
        &mut self,
        group: SystemGroupId,
        system: F,
        priority: i32,
    ) -> SystemId
    where
        Q: ViewBundle,
        F: EntityCommandSystem<Q>,
    {
        let system = Arc::new(system);
        self.register_executor(
            group,
            Box::new(move |world, commands, pool| {
                let view = world.view::<Q>();
                let total = view.entity_count();
                if total == 0 {
                    return Ok(());
                }
                let workers = pool.thread_count();
                if total < workers {
                    run_command_segments(&view.segments(0, total), system.as_ref(), commands);
                    return Ok(());
                }

                let chunk = (total + workers - 1) / workers;
                let mut dispatch = Ok(());
                for t in 0..workers {
                    let start = t * chunk;
                    let end = ((t + 1) * chunk).min(total);
                    if start >= end {
                        break;
                    }
                    let task = ChunkCommandTask {
                        segments: view.segments(start, end),
                        system: Arc::clone(&system),
                        commands: commands as *const CommandBuffer<World>,
                    };
                    if let Err(error) = pool.execute(move || task.run()) {
                        dispatch = Err(error);
                        break;
                    }
                }
                pool.wait_all();
                dispatch
            }),
            priority,
        )
    }

    /// Execute a group's systems in priority order, then flush the
    /// command buffer.
    ///
    /// A dirty group (registration or retirement since the last call) is
    /// stable-sorted by descending priority first. The first failing
    /// system aborts the group. Unknown groups are a no-op.
    pub fn call_system_group(&mut self, group: SystemGroupId) -> Result<()> {
        let Some(entry) = self.groups.get_mut(&group) else {
            return Ok(());
        };
        if entry.dirty {
            entry.systems.sort_by_key(|system| Reverse(system.priority));
            entry.dirty = false;
        }

        #[cfg(feature = "profiling")]
        let _span = info_span!("engine.call_system_group", group = group.0).entered();
        tracing::trace!(
            group = group.0,
            systems = entry.systems.len(),
            "dispatching system group"
        );

        for system in &entry.systems {
            (system.executor)(&mut self.world, &self.commands, &self.pool)?;
        }

        // Deferred structural mutations become visible once the group is
        // done.
        self.commands.flush(&mut self.world)
    }

    fn register_executor(
        &mut self,
        group: SystemGroupId,
        executor: SystemExecutor,
        priority: i32,
    ) -> SystemId {
        let id = SystemId(self.next_system_id);
        self.next_system_id += 1;
        let entry = self.groups.entry(group).or_default();
        entry.systems.push(SystemEntry {
            executor,
            id,
            priority,
        });
        entry.dirty = true;
        self.system_to_group.insert(id, group);
        id
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn run_segments<Q: ViewBundle>(
    segments: &[(ViewPart<Q>, Range<usize>)],
    system: &impl EntitySystem<Q>,
) {
    for (part, range) in segments {
        for row in range.clone() {
            // SAFETY: segments come from a live view; rows are in bounds
            // and visited once.
            unsafe {
                let entity = *part.entities.add(row);
                system.invoke(part.ptrs, entity, row);
            }
        }
    }
}

fn run_command_segments<Q: ViewBundle>(
    segments: &[(ViewPart<Q>, Range<usize>)],
    system: &impl EntityCommandSystem<Q>,
    commands: &CommandBuffer<World>,
) {
    for (part, range) in segments {
        for row in range.clone() {
            // SAFETY: as in run_segments.
            unsafe {
                let entity = *part.entities.add(row);
                system.invoke(part.ptrs, entity, row, commands);
            }
        }
    }
}

struct ChunkTask<Q: ViewBundle, F: EntitySystem<Q>> {
    segments: Vec<(ViewPart<Q>, Range<usize>)>,
    system: Arc<F>,
}

// SAFETY: the raw column pointers stay valid for the dispatching
// executor's lifetime, which wait_all()s before returning; distinct
// tasks receive disjoint row ranges, so no row is touched twice.
unsafe impl<Q: ViewBundle, F: EntitySystem<Q>> Send for ChunkTask<Q, F> {}

impl<Q: ViewBundle, F: EntitySystem<Q>> ChunkTask<Q, F> {
    fn run(self) {
        run_segments(&self.segments, self.system.as_ref());
    }
}

struct ChunkCommandTask<Q: ViewBundle, F: EntityCommandSystem<Q>> {
    segments: Vec<(ViewPart<Q>, Range<usize>)>,
    system: Arc<F>,
    commands: *const CommandBuffer<World>,
}

// SAFETY: as for ChunkTask; the command buffer outlives the executor
// call and its queue is internally synchronized.
unsafe impl<Q: ViewBundle, F: EntityCommandSystem<Q>> Send for ChunkCommandTask<Q, F> {}

impl<Q: ViewBundle, F: EntityCommandSystem<Q>> ChunkCommandTask<Q, F> {
    fn run(self) {
        // SAFETY: the dispatching executor wait_all()s before its borrow
        // of the command buffer ends.
        let commands = unsafe { &*self.commands };
        run_command_segments(&self.segments, self.system.as_ref(), commands);
    }
}
