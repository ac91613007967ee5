// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! World: archetype-mode entity and component registry
//!
//! Owns every archetype table and moves entities between them as their
//! component sets change. Structural mutation always goes through
//! `&mut World`, which is the world-level exclusive latch: views borrow
//! the world for their whole lifetime, so iteration and structural
//! mutation cannot overlap.

use ahash::AHashMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::ArchetypeTable;
use crate::component::{Bundle, Component, Signature, TypeKey, TypeRegistry, MAX_BUNDLE_COMPONENTS};
use crate::entity::{EntityId, IdAllocator};
use crate::error::{EcsError, Result};
use crate::view::{ViewBundle, ViewPart, WorldView};

/// Central archetype-mode ECS world
pub struct World {
    registry: TypeRegistry,
    allocator: IdAllocator,

    /// All archetype tables; tables are created lazily on first signature
    /// observation and live until world teardown.
    tables: Vec<ArchetypeTable>,

    /// Signature → table index
    table_index: AHashMap<Signature, usize>,

    /// Each live entity's current table
    entity_to_table: AHashMap<EntityId, usize>,

    /// Component type → tables whose signature contains it, used to prune
    /// view construction
    component_to_tables: FxHashMap<TypeKey, Vec<usize>>,
}

impl World {
    /// Create a world holding only the empty-signature table
    pub fn new() -> Self {
        let mut world = Self {
            registry: TypeRegistry::new(),
            allocator: IdAllocator::new(),
            tables: Vec::new(),
            table_index: AHashMap::new(),
            entity_to_table: AHashMap::new(),
            component_to_tables: FxHashMap::default(),
        };
        // Componentless entities live in the empty table, so every live
        // entity always has exactly one owning table.
        world.get_or_create_table(Signature::new());
        world
    }

    /// Mint an entity, recycling the smallest freed ID first.
    pub fn create_entity(&mut self) -> EntityId {
        let entity = self.allocator.allocate();
        self.tables[0].push_row(entity);
        self.entity_to_table.insert(entity, 0);
        entity
    }

    /// Create an entity and attach `bundle` in one transition.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Result<EntityId> {
        let entity = self.create_entity();
        self.add_components(entity, bundle)?;
        Ok(entity)
    }

    /// Remove `entity` from its table and free its ID for reuse.
    pub fn delete_entity(&mut self, entity: EntityId) -> Result<()> {
        if !self.is_registered(entity) {
            return Err(EcsError::EntityNotRegistered(entity));
        }
        if let Some(table_id) = self.entity_to_table.remove(&entity) {
            let table = &mut self.tables[table_id];
            if let Some(row) = table.row_of(entity) {
                table.remove_row_dropping(row);
            }
        }
        self.allocator.release(entity);
        Ok(())
    }

    /// `entity < next ∧ entity ∉ freed`
    pub fn is_registered(&self, entity: EntityId) -> bool {
        self.allocator.is_registered(entity)
    }

    /// Number of live entities
    pub fn entity_count(&self) -> usize {
        self.allocator.live_count()
    }

    /// Attach or replace one component.
    pub fn add_component<T: Component>(&mut self, entity: EntityId, value: T) -> Result<()> {
        self.add_components(entity, (value,))
    }

    /// Attach or replace a bundle of components in one archetype
    /// transition.
    ///
    /// The entity moves to the table for `old ∪ new`; rows of types shared
    /// between the signatures are byte-copied, newly provided values are
    /// written into their columns. When the signature is unchanged the
    /// values are replaced in place.
    pub fn add_components<B: Bundle>(&mut self, entity: EntityId, bundle: B) -> Result<()> {
        if !self.is_registered(entity) {
            return Err(EcsError::EntityNotRegistered(entity));
        }

        #[cfg(feature = "profiling")]
        let _span = info_span!("world.add_components", entity = entity.0).entered();

        let keys = B::type_keys(&mut self.registry);
        let old_table_id = self.owning_table(entity)?;
        let old_signature = self.tables[old_table_id].signature().clone();

        let mut new_signature = old_signature.clone();
        for &key in keys.iter() {
            new_signature = new_signature.inserted(key);
        }

        // Re-added types overwrite a live slot; fresh types fill an
        // uninitialized one.
        let replace: SmallVec<[bool; MAX_BUNDLE_COMPONENTS]> =
            keys.iter().map(|&key| old_signature.contains(key)).collect();

        if new_signature == old_signature {
            let table = &mut self.tables[old_table_id];
            let row = table
                .row_of(entity)
                .ok_or(EcsError::EntityNotRegistered(entity))?;
            return bundle.write_into(table, &keys, row, &replace);
        }

        let new_table_id = self.get_or_create_table(new_signature);
        let (old_table, new_table) =
            table_pair_mut(&mut self.tables, old_table_id, new_table_id);

        let old_row = old_table
            .row_of(entity)
            .ok_or(EcsError::EntityNotRegistered(entity))?;
        let new_row = new_table.push_row(entity);

        // Shared rows first: re-added values land byte-for-byte and are
        // then dropped by the replacing write below, so nothing leaks.
        new_table.copy_shared_row_from(old_table, old_row, new_row);
        bundle.write_into(new_table, &keys, new_row, &replace)?;

        // The moved-out source row must not run destructors.
        old_table.forget_row(old_row);
        self.entity_to_table.insert(entity, new_table_id);
        Ok(())
    }

    /// Detach one component; absent components are a no-op.
    pub fn remove_component<T: Component>(&mut self, entity: EntityId) -> Result<()> {
        if !self.is_registered(entity) {
            return Err(EcsError::EntityNotRegistered(entity));
        }
        match self.registry.lookup::<T>() {
            Some(key) => self.remove_keys(entity, &[key]),
            // A type nothing ever registered cannot be present.
            None => Ok(()),
        }
    }

    /// Detach several component types in one transition.
    pub fn remove_components<B: Bundle>(&mut self, entity: EntityId) -> Result<()> {
        if !self.is_registered(entity) {
            return Err(EcsError::EntityNotRegistered(entity));
        }
        let keys = B::type_keys(&mut self.registry);
        self.remove_keys(entity, &keys)
    }

    fn remove_keys(&mut self, entity: EntityId, keys: &[TypeKey]) -> Result<()> {
        let old_table_id = self.owning_table(entity)?;
        let old_signature = self.tables[old_table_id].signature().clone();

        let present: SmallVec<[TypeKey; MAX_BUNDLE_COMPONENTS]> = keys
            .iter()
            .copied()
            .filter(|&key| old_signature.contains(key))
            .collect();
        if present.is_empty() {
            return Ok(());
        }

        let mut new_signature = old_signature;
        for &key in present.iter() {
            new_signature = new_signature.removed(key);
        }

        let new_table_id = self.get_or_create_table(new_signature);
        let (old_table, new_table) =
            table_pair_mut(&mut self.tables, old_table_id, new_table_id);

        let old_row = old_table
            .row_of(entity)
            .ok_or(EcsError::EntityNotRegistered(entity))?;
        let new_row = new_table.push_row(entity);
        new_table.copy_shared_row_from(old_table, old_row, new_row);

        // Values being removed are dropped in place; the slots are then
        // overwritten or discarded by the swap-remove.
        for &key in present.iter() {
            if let Some(column) = old_table.column_mut(key) {
                column.drop_in_row(old_row);
            }
        }
        old_table.forget_row(old_row);
        self.entity_to_table.insert(entity, new_table_id);
        Ok(())
    }

    /// Borrowed component read, `None` for missing entity or component
    pub fn try_get_component<T: Component>(&self, entity: EntityId) -> Option<&T> {
        if !self.is_registered(entity) {
            return None;
        }
        let key = self.registry.lookup::<T>()?;
        let table_id = *self.entity_to_table.get(&entity)?;
        self.tables[table_id].get::<T>(key, entity)
    }

    /// Borrowed mutable component access
    pub fn get_component_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        if !self.is_registered(entity) {
            return None;
        }
        let key = self.registry.lookup::<T>()?;
        let table_id = *self.entity_to_table.get(&entity)?;
        self.tables[table_id].get_mut::<T>(key, entity)
    }

    /// Signature of the entity's current archetype
    pub fn signature_of(&self, entity: EntityId) -> Option<&Signature> {
        let table_id = *self.entity_to_table.get(&entity)?;
        Some(self.tables[table_id].signature())
    }

    /// All archetype tables, in creation order
    pub fn tables(&self) -> &[ArchetypeTable] {
        &self.tables
    }

    /// Number of archetype tables
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Iterable over `(EntityId, &mut C…)` for every entity carrying all
    /// of `Q`'s components.
    ///
    /// Matching tables come from intersecting the component → tables
    /// index; empty tables are skipped, so an empty view iterates zero
    /// times.
    pub fn view<'w, Q: ViewBundle>(&'w mut self) -> WorldView<'w, Q> {
        let keys = Q::type_keys(&mut self.registry);
        crate::component::assert_distinct_keys(&keys);

        let candidates: Vec<usize> = match self.component_to_tables.get(&keys[0]) {
            Some(tables) => tables
                .iter()
                .copied()
                .filter(|&table_id| {
                    let signature = self.tables[table_id].signature();
                    keys.iter().all(|&key| signature.contains(key))
                })
                .collect(),
            None => Vec::new(),
        };

        let mut parts = Vec::with_capacity(candidates.len());
        for table_id in candidates {
            let table = &mut self.tables[table_id];
            if table.is_empty() {
                continue;
            }
            if let Some(ptrs) = Q::bind(table, &keys) {
                parts.push(ViewPart {
                    entities: table.entities().as_ptr(),
                    len: table.len(),
                    ptrs,
                });
            }
        }
        WorldView::new(parts)
    }

    fn owning_table(&self, entity: EntityId) -> Result<usize> {
        self.entity_to_table
            .get(&entity)
            .copied()
            .ok_or(EcsError::EntityNotRegistered(entity))
    }

    fn get_or_create_table(&mut self, signature: Signature) -> usize {
        if let Some(&table_id) = self.table_index.get(&signature) {
            return table_id;
        }
        let table_id = self.tables.len();
        let table = ArchetypeTable::new(signature.clone(), &self.registry);
        for key in signature.iter() {
            self.component_to_tables.entry(key).or_default().push(table_id);
        }
        self.table_index.insert(signature, table_id);
        self.tables.push(table);
        tracing::debug!(table = table_id, "created archetype table");
        table_id
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Disjoint mutable borrows of two distinct tables.
fn table_pair_mut(
    tables: &mut [ArchetypeTable],
    a: usize,
    b: usize,
) -> (&mut ArchetypeTable, &mut ArchetypeTable) {
    debug_assert_ne!(a, b, "source and destination table must differ");
    if a < b {
        let (head, tail) = tables.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = tables.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        dx: f32,
    }

    #[test]
    fn test_componentless_entity_lives_in_empty_table() {
        let mut world = World::new();
        let entity = world.create_entity();
        assert!(world.is_registered(entity));
        assert_eq!(world.signature_of(entity).map(Signature::len), Some(0));
        world.delete_entity(entity).unwrap();
        assert!(!world.is_registered(entity));
    }

    #[test]
    fn test_add_replaces_existing_value() {
        let mut world = World::new();
        let entity = world.create_entity();
        world.add_component(entity, Position { x: 1.0, y: 1.0 }).unwrap();
        let before = world.table_count();
        world.add_component(entity, Position { x: 9.0, y: 9.0 }).unwrap();

        assert_eq!(world.table_count(), before);
        assert_eq!(
            world.try_get_component::<Position>(entity),
            Some(&Position { x: 9.0, y: 9.0 })
        );
    }

    #[test]
    fn test_remove_unknown_type_is_noop() {
        let mut world = World::new();
        let entity = world.create_entity();
        world.add_component(entity, Position { x: 0.0, y: 0.0 }).unwrap();
        world.remove_component::<Velocity>(entity).unwrap();
        assert!(world.try_get_component::<Position>(entity).is_some());
    }

    #[test]
    fn test_operations_on_unregistered_entity_fail() {
        let mut world = World::new();
        let ghost = EntityId(42);
        assert_eq!(
            world.add_component(ghost, Velocity { dx: 1.0 }),
            Err(EcsError::EntityNotRegistered(ghost))
        );
        assert_eq!(
            world.delete_entity(ghost),
            Err(EcsError::EntityNotRegistered(ghost))
        );
        assert!(world.try_get_component::<Velocity>(ghost).is_none());
    }
}
