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

//! World: sparse-set-mode entity and component registry
//!
//! Behaviorally interchangeable with the archetype world: the same
//! entity lifecycle and component contract, backed by one paged sparse
//! set per component type instead of SoA tables. Owns the query-node
//! arena and hands out `Query` objects bound to its storages.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::component::{Component, TypeKey, TypeRegistry};
use crate::entity::{EntityId, IdAllocator};
use crate::error::{EcsError, Result};
use crate::query::{NodeId, Query, QueryGraph, SparseBundle, SparseFetch};
use crate::sparse::{SparseSet, SparseStore};

/// Central sparse-set-mode ECS world
pub struct SparseWorld {
    registry: TypeRegistry,
    allocator: IdAllocator,
    storages: FxHashMap<TypeKey, Box<dyn SparseStore>>,
    graph: QueryGraph,
}

impl SparseWorld {
    /// Create an empty world
    pub fn new() -> Self {
        Self {
            registry: TypeRegistry::new(),
            allocator: IdAllocator::new(),
            storages: FxHashMap::default(),
            graph: QueryGraph::new(),
        }
    }

    /// Mint an entity, recycling the smallest freed ID first.
    pub fn create_entity(&mut self) -> EntityId {
        self.allocator.allocate()
    }

    /// Remove `entity` from every storage and free its ID for reuse.
    pub fn delete_entity(&mut self, entity: EntityId) -> Result<()> {
        if !self.is_registered(entity) {
            return Err(EcsError::EntityNotRegistered(entity));
        }
        for store in self.storages.values_mut() {
            store.remove(entity)?;
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

    /// Insert or replace `entity`'s `T` value.
    pub fn add_component<T: Component>(&mut self, entity: EntityId, value: T) -> Result<()> {
        if !self.is_registered(entity) {
            return Err(EcsError::EntityNotRegistered(entity));
        }
        let key = self.registry.key_of::<T>();
        let store = self
            .storages
            .entry(key)
            .or_insert_with(|| Box::new(SparseSet::<T>::new()));
        let stored = store.type_name();
        let set = store
            .as_any_mut()
            .downcast_mut::<SparseSet<T>>()
            .ok_or(EcsError::ComponentTypeMismatch {
                expected: stored,
                actual: std::any::type_name::<T>(),
            })?;
        set.set(entity, value)
    }

    /// Remove `entity`'s `T` value; absent components are a no-op.
    pub fn remove_component<T: Component>(&mut self, entity: EntityId) -> Result<()> {
        if !self.is_registered(entity) {
            return Err(EcsError::EntityNotRegistered(entity));
        }
        let Some(key) = self.registry.lookup::<T>() else {
            return Ok(());
        };
        if let Some(store) = self.storages.get_mut(&key) {
            store.remove(entity)?;
        }
        Ok(())
    }

    /// Borrowed component read, `None` for missing entity or component
    pub fn try_get_component<T: Component>(&self, entity: EntityId) -> Option<&T> {
        if !self.is_registered(entity) {
            return None;
        }
        let key = self.registry.lookup::<T>()?;
        self.typed_storage::<T>(key)?.get(entity)
    }

    /// Borrowed mutable component access
    pub fn get_component_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        if !self.is_registered(entity) {
            return None;
        }
        let key = self.registry.lookup::<T>()?;
        self.storages
            .get_mut(&key)?
            .as_any_mut()
            .downcast_mut::<SparseSet<T>>()?
            .get_mut(entity)
    }

    /// Number of entities carrying `T`
    pub fn component_count<T: Component>(&self) -> usize {
        self.registry
            .lookup::<T>()
            .and_then(|key| self.storages.get(&key))
            .map(|store| store.len())
            .unwrap_or(0)
    }

    /// Leaf query node over `T`'s sparse set, cached per type.
    pub fn leaf_node<T: Component>(&mut self) -> Result<NodeId> {
        let key = self.registry.key_of::<T>();
        let store = self
            .storages
            .entry(key)
            .or_insert_with(|| Box::new(SparseSet::<T>::new()));
        self.graph.leaf(key, store.on_updated())
    }

    /// Intersection (AND) node over `children`
    pub fn intersection_node(&mut self, children: Vec<NodeId>) -> Result<NodeId> {
        self.graph.intersection(children)
    }

    /// Difference node: entities of `main` not in `exclude`
    pub fn difference_node(&mut self, main: NodeId, exclude: NodeId) -> Result<NodeId> {
        self.graph.difference(main, exclude)
    }

    /// Materialized entity list of a node, for inspection
    pub fn node_entities(&self, node: NodeId) -> Vec<EntityId> {
        self.graph.valid_entities(node, &self.storages)
    }

    /// Whether `node` currently includes `entity`
    pub fn node_has_entity(&self, node: NodeId, entity: EntityId) -> bool {
        self.graph.has_entity(node, entity, &self.storages)
    }

    /// Change signal of a node, fired when any upstream storage changes
    pub fn node_on_updated(&self, node: NodeId) -> &crate::event::Event {
        self.graph.signal(node).as_ref()
    }

    /// Build a query over `Q`'s component tuple.
    ///
    /// Without an explicit root, intersects the tuple's leaf nodes (the
    /// common case). Construction verifies that every bound component is
    /// in the root's guarantees and that every root-listed entity is
    /// present in every bound storage.
    pub fn create_query<Q: SparseBundle>(&mut self, root: Option<NodeId>) -> Result<Query<Q>> {
        let keys = Q::ensure(&mut self.registry, &mut self.storages);
        crate::component::assert_distinct_keys(&keys);

        let root = match root {
            Some(node) => node,
            None => {
                let mut leaves = Vec::with_capacity(keys.len());
                for &key in keys.iter() {
                    let store = &self.storages[&key];
                    leaves.push(self.graph.leaf(key, store.on_updated())?);
                }
                self.graph.intersection(leaves)?
            }
        };

        let guaranteed = self.graph.guaranteed(root);
        for &key in keys.iter() {
            if !guaranteed.contains(&key) {
                return Err(EcsError::ComponentNotGuaranteed {
                    component: self.registry.name_of(key),
                });
            }
        }

        let cached = self.graph.valid_entities(root, &self.storages);
        for &entity in &cached {
            for &key in keys.iter() {
                let store = &self.storages[&key];
                if !store.has(entity) {
                    return Err(EcsError::EntityMissingFromStorage {
                        entity,
                        component: store.type_name(),
                    });
                }
            }
        }

        let dirty = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dirty);
        self.graph.signal(root).subscribe(move |_| {
            flag.store(true, Ordering::Release);
        })?;

        Ok(Query::new(root, keys, dirty, cached))
    }

    /// Iterate `(EntityId, &mut C…)` over entities carrying all of `Q`'s
    /// components, without building query nodes.
    ///
    /// Starts from the smallest bound sparse set and filters the rest by
    /// membership.
    pub fn view<'w, Q: SparseFetch<'w>>(&'w mut self) -> SparseViewIter<'w, Q> {
        let keys = Q::ensure(&mut self.registry, &mut self.storages);
        crate::component::assert_distinct_keys(&keys);

        let smallest = keys
            .iter()
            .copied()
            .min_by_key(|key| self.storages[key].len());
        let entities: Vec<EntityId> = match smallest {
            Some(small_key) => self.storages[&small_key]
                .entities()
                .iter()
                .copied()
                .filter(|&entity| keys.iter().all(|key| self.storages[key].has(entity)))
                .collect(),
            None => Vec::new(),
        };

        let ptrs = Q::bind(&mut self.storages, &keys);
        SparseViewIter {
            entities,
            index: 0,
            ptrs,
            _world: PhantomData,
        }
    }

    pub(crate) fn graph(&self) -> &QueryGraph {
        &self.graph
    }

    pub(crate) fn storages(&self) -> &FxHashMap<TypeKey, Box<dyn SparseStore>> {
        &self.storages
    }

    pub(crate) fn storages_mut(&mut self) -> &mut FxHashMap<TypeKey, Box<dyn SparseStore>> {
        &mut self.storages
    }

    fn typed_storage<T: Component>(&self, key: TypeKey) -> Option<&SparseSet<T>> {
        self.storages.get(&key)?.as_any().downcast_ref()
    }
}

impl Default for SparseWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a direct sparse-mode view
pub struct SparseViewIter<'w, Q: SparseBundle> {
    entities: Vec<EntityId>,
    index: usize,
    ptrs: Option<Q::Ptrs>,
    _world: PhantomData<&'w mut ()>,
}

impl<'w, Q: SparseBundle> SparseViewIter<'w, Q> {
    /// Number of matching entities
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

impl<'w, Q: SparseFetch<'w>> Iterator for SparseViewIter<'w, Q> {
    type Item = Q::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let ptrs = self.ptrs?;
        while self.index < self.entities.len() {
            let entity = self.entities[self.index];
            self.index += 1;
            // SAFETY: ptrs were bound against the world borrowed for 'w;
            // every entity is yielded at most once.
            if let Some(item) = unsafe { Q::fetch(ptrs, entity) } {
                return Some(item);
            }
        }
        None
    }
}
