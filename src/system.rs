//! System identifiers and per-entity system-function adapters

use crate::command::CommandBuffer;
use crate::component::Component;
use crate::entity::EntityId;
use crate::view::ViewBundle;
use crate::world::World;

/// Unique identifier of a registered system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemId(pub u64);

/// Identifier of a system group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemGroupId(pub u64);

/// Function over `(EntityId, &mut C…)`, invoked once per matching entity.
///
/// Implemented for closures whose component parameters mirror the view
/// tuple `Q`.
pub trait EntitySystem<Q: ViewBundle>: Send + Sync + 'static {
    /// Call the function on one view row.
    ///
    /// # Safety
    /// Same contract as [`crate::view::ViewFetch::fetch`]: `ptrs` bound
    /// from a live table, `row` in bounds, no aliasing access to the row.
    unsafe fn invoke(&self, ptrs: Q::Ptrs, entity: EntityId, row: usize);
}

/// [`EntitySystem`] variant that also receives the engine's command
/// buffer for deferred structural mutation.
pub trait EntityCommandSystem<Q: ViewBundle>: Send + Sync + 'static {
    /// Call the function on one view row.
    ///
    /// # Safety
    /// Same contract as [`EntitySystem::invoke`].
    unsafe fn invoke(
        &self,
        ptrs: Q::Ptrs,
        entity: EntityId,
        row: usize,
        commands: &CommandBuffer<World>,
    );
}

macro_rules! impl_entity_system {
    ($(($T:ident, $idx:tt)),+) => {
        impl<$($T: Component,)+ F> EntitySystem<($($T,)+)> for F
        where
            F: Fn(EntityId, $(&mut $T),+) + Send + Sync + 'static,
        {
            unsafe fn invoke(
                &self,
                ptrs: <($($T,)+) as ViewBundle>::Ptrs,
                entity: EntityId,
                row: usize,
            ) {
                // SAFETY: forwarded from the trait contract.
                (self)(entity, $(unsafe { &mut *ptrs.$idx.add(row) }),+)
            }
        }

        impl<$($T: Component,)+ F> EntityCommandSystem<($($T,)+)> for F
        where
            F: Fn(EntityId, $(&mut $T,)+ &CommandBuffer<World>) + Send + Sync + 'static,
        {
            unsafe fn invoke(
                &self,
                ptrs: <($($T,)+) as ViewBundle>::Ptrs,
                entity: EntityId,
                row: usize,
                commands: &CommandBuffer<World>,
            ) {
                // SAFETY: forwarded from the trait contract.
                (self)(entity, $(unsafe { &mut *ptrs.$idx.add(row) },)+ commands)
            }
        }
    };
}

impl_entity_system!((A, 0));
impl_entity_system!((A, 0), (B, 1));
impl_entity_system!((A, 0), (B, 1), (C, 2));
impl_entity_system!((A, 0), (B, 1), (C, 2), (D, 3));
