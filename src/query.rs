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

//! Composable query nodes with change propagation
//!
//! Nodes live in an arena owned by the sparse world; edges are arena
//! indices, so ownership stays acyclic while change signals flow upward:
//! each node's `Event` re-fires when any child (or the underlying sparse
//! set) fires. A `Query` binds a root node to typed storages and caches
//! the materialized entity list until the root signals a change.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};

use crate::component::{Component, TypeKey, TypeRegistry, MAX_BUNDLE_COMPONENTS};
use crate::entity::EntityId;
use crate::error::Result;
use crate::event::Event;
use crate::sparse::{SparseSet, SparseStore};
use crate::sparse_world::SparseWorld;

/// Arena index of a query node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

enum NodeKind {
    /// Entities of one component's sparse set
    Leaf(TypeKey),
    /// Entities present in every child
    Intersection(Vec<NodeId>),
    /// Entities of `main` not present in `exclude`
    Difference { main: NodeId, exclude: NodeId },
}

struct Node {
    kind: NodeKind,
    signal: Arc<Event>,
}

/// Arena of query nodes plus the per-type leaf cache
pub(crate) struct QueryGraph {
    nodes: Vec<Node>,
    leaves: FxHashMap<TypeKey, NodeId>,
}

impl QueryGraph {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            leaves: FxHashMap::default(),
        }
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            signal: Arc::new(Event::new()),
        });
        id
    }

    /// Relay `source` into `target`: fired events re-fire upward.
    fn chain(source: &Event, target: &Arc<Event>) -> Result<()> {
        let downstream = Arc::clone(target);
        source.subscribe(move |_| {
            // A reentrant failure here would mean a cyclic graph; node
            // construction only ever links to existing nodes, so ignore.
            let _ = downstream.invoke(&());
        })?;
        Ok(())
    }

    /// Leaf node over one component's sparse set, cached per type.
    pub(crate) fn leaf(&mut self, key: TypeKey, source: &Event) -> Result<NodeId> {
        if let Some(&id) = self.leaves.get(&key) {
            return Ok(id);
        }
        let id = self.push(NodeKind::Leaf(key));
        Self::chain(source, &self.nodes[id.0].signal)?;
        self.leaves.insert(key, id);
        Ok(id)
    }

    /// Intersection (AND) over `children`
    pub(crate) fn intersection(&mut self, children: Vec<NodeId>) -> Result<NodeId> {
        for child in &children {
            assert!(child.0 < self.nodes.len(), "intersection child does not exist");
        }
        let id = self.push(NodeKind::Intersection(children.clone()));
        for child in children {
            let child_signal = Arc::clone(&self.nodes[child.0].signal);
            Self::chain(&child_signal, &self.nodes[id.0].signal)?;
        }
        Ok(id)
    }

    /// Difference (`main \ exclude`)
    pub(crate) fn difference(&mut self, main: NodeId, exclude: NodeId) -> Result<NodeId> {
        assert!(main.0 < self.nodes.len(), "difference main node does not exist");
        assert!(exclude.0 < self.nodes.len(), "difference exclusion node does not exist");
        let id = self.push(NodeKind::Difference { main, exclude });
        for source in [main, exclude] {
            let source_signal = Arc::clone(&self.nodes[source.0].signal);
            Self::chain(&source_signal, &self.nodes[id.0].signal)?;
        }
        Ok(id)
    }

    pub(crate) fn signal(&self, id: NodeId) -> &Arc<Event> {
        &self.nodes[id.0].signal
    }

    /// Materialized entity list of a node.
    ///
    /// Leaves yield dense insertion order; intersections and differences
    /// preserve the iteration order of their chosen base set.
    pub(crate) fn valid_entities(
        &self,
        id: NodeId,
        storages: &FxHashMap<TypeKey, Box<dyn SparseStore>>,
    ) -> Vec<EntityId> {
        match &self.nodes[id.0].kind {
            NodeKind::Leaf(key) => storages
                .get(key)
                .map(|store| store.entities().to_vec())
                .unwrap_or_default(),

            NodeKind::Intersection(children) => {
                if children.is_empty() {
                    return Vec::new();
                }
                let lists: Vec<Vec<EntityId>> = children
                    .iter()
                    .map(|&child| self.valid_entities(child, storages))
                    .collect();

                // Start from the smallest child to minimize membership tests.
                let base_index = lists
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, list)| list.len())
                    .map(|(index, _)| index)
                    .unwrap_or(0);

                let mut result = lists[base_index].clone();
                for (index, list) in lists.iter().enumerate() {
                    if index == base_index {
                        continue;
                    }
                    let members: FxHashSet<EntityId> = list.iter().copied().collect();
                    result.retain(|entity| members.contains(entity));
                }
                result
            }

            NodeKind::Difference { main, exclude } => {
                let excluded: FxHashSet<EntityId> =
                    self.valid_entities(*exclude, storages).into_iter().collect();
                self.valid_entities(*main, storages)
                    .into_iter()
                    .filter(|entity| !excluded.contains(entity))
                    .collect()
            }
        }
    }

    pub(crate) fn has_entity(
        &self,
        id: NodeId,
        entity: EntityId,
        storages: &FxHashMap<TypeKey, Box<dyn SparseStore>>,
    ) -> bool {
        match &self.nodes[id.0].kind {
            NodeKind::Leaf(key) => storages
                .get(key)
                .map(|store| store.has(entity))
                .unwrap_or(false),
            NodeKind::Intersection(children) => !children.is_empty()
                && children
                    .iter()
                    .all(|&child| self.has_entity(child, entity, storages)),
            NodeKind::Difference { main, exclude } => {
                self.has_entity(*main, entity, storages)
                    && !self.has_entity(*exclude, entity, storages)
            }
        }
    }

    /// Component types every entity returned by the node is known to carry
    pub(crate) fn guaranteed(&self, id: NodeId) -> FxHashSet<TypeKey> {
        match &self.nodes[id.0].kind {
            NodeKind::Leaf(key) => std::iter::once(*key).collect(),
            NodeKind::Intersection(children) => {
                let mut union = FxHashSet::default();
                for &child in children {
                    union.extend(self.guaranteed(child));
                }
                union
            }
            NodeKind::Difference { main, .. } => self.guaranteed(*main),
        }
    }
}

/// Tuple of component types a sparse query yields.
pub trait SparseBundle: 'static {
    /// Raw pointers to the bound sparse sets
    type Ptrs: Copy + 'static;

    /// Register types and make sure their storages exist; returns keys in
    /// tuple order.
    fn ensure(
        registry: &mut TypeRegistry,
        storages: &mut FxHashMap<TypeKey, Box<dyn SparseStore>>,
    ) -> SmallVec<[TypeKey; MAX_BUNDLE_COMPONENTS]>;

    /// Downcast the tuple's storages; `None` when a storage is missing or
    /// of the wrong element type.
    fn bind(
        storages: &mut FxHashMap<TypeKey, Box<dyn SparseStore>>,
        keys: &[TypeKey],
    ) -> Option<Self::Ptrs>;
}

/// Row materialization for a sparse-bound tuple.
pub trait SparseFetch<'w>: SparseBundle {
    /// `(EntityId, &mut C…)`
    type Item;

    /// Look `entity` up in every bound set.
    ///
    /// # Safety
    /// `ptrs` must come from [`SparseBundle::bind`] on storages that are
    /// still alive and structurally unmodified, and no other live
    /// reference may alias the fetched values.
    unsafe fn fetch(ptrs: Self::Ptrs, entity: EntityId) -> Option<Self::Item>;
}

macro_rules! impl_sparse_tuple {
    ($(($T:ident, $idx:tt)),+) => {
        impl<$($T: Component),+> SparseBundle for ($($T,)+) {
            type Ptrs = ($(*mut SparseSet<$T>,)+);

            fn ensure(
                registry: &mut TypeRegistry,
                storages: &mut FxHashMap<TypeKey, Box<dyn SparseStore>>,
            ) -> SmallVec<[TypeKey; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$({
                    let key = registry.key_of::<$T>();
                    storages
                        .entry(key)
                        .or_insert_with(|| Box::new(SparseSet::<$T>::new()));
                    key
                }),+]
            }

            fn bind(
                storages: &mut FxHashMap<TypeKey, Box<dyn SparseStore>>,
                keys: &[TypeKey],
            ) -> Option<Self::Ptrs> {
                Some(($(
                    storages
                        .get_mut(&keys[$idx])?
                        .as_any_mut()
                        .downcast_mut::<SparseSet<$T>>()? as *mut SparseSet<$T>,
                )+))
            }
        }

        impl<'w, $($T: Component),+> SparseFetch<'w> for ($($T,)+) {
            type Item = (EntityId, $(&'w mut $T,)+);

            unsafe fn fetch(ptrs: Self::Ptrs, entity: EntityId) -> Option<Self::Item> {
                // SAFETY: forwarded from the trait contract; distinct tuple
                // members point at distinct sets.
                Some((entity, $(unsafe { (*ptrs.$idx).get_mut(entity)? },)+))
            }
        }
    };
}

impl_sparse_tuple!((A, 0));
impl_sparse_tuple!((A, 0), (B, 1));
impl_sparse_tuple!((A, 0), (B, 1), (C, 2));
impl_sparse_tuple!((A, 0), (B, 1), (C, 2), (D, 3));

/// A query: a root node plus typed bindings for its output tuple.
///
/// Subscribed to the root's change signal; the cached entity list is
/// rebuilt lazily on the next access after a change.
pub struct Query<Q: SparseBundle> {
    root: NodeId,
    keys: SmallVec<[TypeKey; MAX_BUNDLE_COMPONENTS]>,
    dirty: Arc<AtomicBool>,
    cached: Vec<EntityId>,
    _marker: PhantomData<fn() -> Q>,
}

impl<Q: SparseBundle> Query<Q> {
    pub(crate) fn new(
        root: NodeId,
        keys: SmallVec<[TypeKey; MAX_BUNDLE_COMPONENTS]>,
        dirty: Arc<AtomicBool>,
        cached: Vec<EntityId>,
    ) -> Self {
        Self {
            root,
            keys,
            dirty,
            cached,
            _marker: PhantomData,
        }
    }

    /// Root node this query materializes
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn refresh(&mut self, world: &SparseWorld) {
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.cached = world.graph().valid_entities(self.root, world.storages());
        }
    }

    /// Matching entities, re-materialized if the root signaled a change
    pub fn entities(&mut self, world: &SparseWorld) -> &[EntityId] {
        self.refresh(world);
        &self.cached
    }

    /// Number of matching entities
    pub fn entity_count(&mut self, world: &SparseWorld) -> usize {
        self.entities(world).len()
    }

    /// Iterate `(EntityId, &mut C…)` over the matching entities.
    pub fn iter<'w>(&'w mut self, world: &'w mut SparseWorld) -> QueryIter<'w, Q>
    where
        Q: SparseFetch<'w>,
    {
        self.refresh(world);
        let ptrs = Q::bind(world.storages_mut(), &self.keys);
        QueryIter {
            entities: &self.cached,
            index: 0,
            ptrs,
            _world: PhantomData,
        }
    }
}

/// Iterator over a query's matching entities
pub struct QueryIter<'w, Q: SparseBundle> {
    entities: &'w [EntityId],
    index: usize,
    ptrs: Option<Q::Ptrs>,
    _world: PhantomData<&'w mut ()>,
}

impl<'w, Q: SparseFetch<'w>> Iterator for QueryIter<'w, Q> {
    type Item = Q::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let ptrs = self.ptrs?;
        while self.index < self.entities.len() {
            let entity = self.entities[self.index];
            self.index += 1;
            // SAFETY: ptrs were bound against the world borrowed for 'w;
            // every entity is yielded at most once per pass.
            if let Some(item) = unsafe { Q::fetch(ptrs, entity) } {
                return Some(item);
            }
        }
        None
    }
}
