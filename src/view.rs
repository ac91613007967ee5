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

//! Typed views over archetype storage
//!
//! A `WorldView` concatenates one sub-view per matching archetype table
//! and offers indexed access in O(log T) via precomputed cumulative
//! sizes, which is what the scheduler's partitioner slices on.

use std::marker::PhantomData;
use std::ops::Range;

use smallvec::{smallvec, SmallVec};

use crate::archetype::ArchetypeTable;
use crate::component::{Component, TypeKey, TypeRegistry, MAX_BUNDLE_COMPONENTS};
use crate::entity::EntityId;

/// Tuple of component types a view binds mutably.
///
/// `Ptrs` carries one raw column base pointer per member; binding fails
/// (returns `None`) when a table lacks a column or its element type
/// doesn't match, so the downcast is checked once per table, not per row.
pub trait ViewBundle: 'static {
    /// Raw column base pointers for one table
    type Ptrs: Copy + 'static;

    /// Keys of the bound component types, in tuple order
    fn type_keys(registry: &mut TypeRegistry) -> SmallVec<[TypeKey; MAX_BUNDLE_COMPONENTS]>;

    /// Resolve the tuple's column base pointers in `table`
    fn bind(table: &mut ArchetypeTable, keys: &[TypeKey]) -> Option<Self::Ptrs>;
}

/// Row materialization for a bound tuple.
pub trait ViewFetch<'w>: ViewBundle {
    /// `(EntityId, &mut C…)`
    type Item;

    /// Materialize row `row`.
    ///
    /// # Safety
    /// `ptrs` must come from [`ViewBundle::bind`] on a table that is still
    /// alive and unmodified, `row` must be below that table's row count,
    /// and no other live reference may alias the row.
    unsafe fn fetch(ptrs: Self::Ptrs, entity: EntityId, row: usize) -> Self::Item;
}

/// One matching table's slice of a view
pub struct ViewPart<Q: ViewBundle> {
    pub(crate) entities: *const EntityId,
    pub(crate) len: usize,
    pub(crate) ptrs: Q::Ptrs,
}

impl<Q: ViewBundle> Clone for ViewPart<Q> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Q: ViewBundle> Copy for ViewPart<Q> {}

/// Iterable binding of a view result to typed column access.
///
/// Holds raw pointers into the world's tables; the `'w` borrow of the
/// world keeps structural mutation out for the view's whole lifetime.
pub struct WorldView<'w, Q: ViewBundle> {
    parts: Vec<ViewPart<Q>>,
    /// `cumulative[i]` = total rows of parts `0..=i`
    cumulative: Vec<usize>,
    total: usize,
    _world: PhantomData<&'w mut ()>,
}

impl<'w, Q: ViewBundle> WorldView<'w, Q> {
    pub(crate) fn new(parts: Vec<ViewPart<Q>>) -> Self {
        let mut cumulative = Vec::with_capacity(parts.len());
        let mut total = 0;
        for part in &parts {
            total += part.len;
            cumulative.push(total);
        }
        Self {
            parts,
            cumulative,
            total,
            _world: PhantomData,
        }
    }

    /// Total number of matching entities
    pub fn entity_count(&self) -> usize {
        self.total
    }

    /// True when no entity matches
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Indexed access by global view position, O(log T) in the number of
    /// matching tables.
    pub fn get(&mut self, index: usize) -> Option<Q::Item>
    where
        Q: ViewFetch<'w>,
    {
        if index >= self.total {
            return None;
        }
        let part_index = self.cumulative.partition_point(|&c| c <= index);
        let base = if part_index == 0 {
            0
        } else {
            self.cumulative[part_index - 1]
        };
        let part = &self.parts[part_index];
        let row = index - base;
        // SAFETY: row < part.len by construction of `cumulative`; the 'w
        // borrow keeps the table alive and structurally frozen.
        unsafe {
            let entity = *part.entities.add(row);
            Some(Q::fetch(part.ptrs, entity, row))
        }
    }

    /// Map the half-open global range `[start, end)` onto per-part local
    /// ranges. Used by the threaded partitioner.
    pub(crate) fn segments(&self, start: usize, end: usize) -> Vec<(ViewPart<Q>, Range<usize>)> {
        let mut segments = Vec::new();
        let mut base = 0;
        for part in &self.parts {
            let part_start = base;
            let part_end = base + part.len;
            let lo = start.max(part_start);
            let hi = end.min(part_end);
            if lo < hi {
                segments.push((*part, (lo - part_start)..(hi - part_start)));
            }
            base = part_end;
        }
        segments
    }
}

impl<'w, Q: ViewFetch<'w>> IntoIterator for WorldView<'w, Q> {
    type Item = Q::Item;
    type IntoIter = ViewIter<'w, Q>;

    fn into_iter(self) -> Self::IntoIter {
        ViewIter {
            parts: self.parts,
            part: 0,
            row: 0,
            _world: PhantomData,
        }
    }
}

/// Row-by-row iterator over a view
pub struct ViewIter<'w, Q: ViewBundle> {
    parts: Vec<ViewPart<Q>>,
    part: usize,
    row: usize,
    _world: PhantomData<&'w mut ()>,
}

impl<'w, Q: ViewFetch<'w>> Iterator for ViewIter<'w, Q> {
    type Item = Q::Item;

    fn next(&mut self) -> Option<Self::Item> {
        while self.part < self.parts.len() {
            let part = &self.parts[self.part];
            if self.row < part.len {
                let row = self.row;
                self.row += 1;
                // SAFETY: row < part.len; each (part, row) pair is visited
                // exactly once, so yielded &mut items never alias.
                unsafe {
                    let entity = *part.entities.add(row);
                    return Some(Q::fetch(part.ptrs, entity, row));
                }
            }
            self.part += 1;
            self.row = 0;
        }
        None
    }
}

macro_rules! impl_view_tuple {
    ($(($T:ident, $idx:tt)),+) => {
        impl<$($T: Component),+> ViewBundle for ($($T,)+) {
            type Ptrs = ($(*mut $T,)+);

            fn type_keys(
                registry: &mut TypeRegistry,
            ) -> SmallVec<[TypeKey; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(registry.key_of::<$T>()),+]
            }

            fn bind(table: &mut ArchetypeTable, keys: &[TypeKey]) -> Option<Self::Ptrs> {
                Some(($(
                    table.column_mut(keys[$idx])?.typed_base_ptr::<$T>()?,
                )+))
            }
        }

        impl<'w, $($T: Component),+> ViewFetch<'w> for ($($T,)+) {
            type Item = (EntityId, $(&'w mut $T,)+);

            unsafe fn fetch(ptrs: Self::Ptrs, entity: EntityId, row: usize) -> Self::Item {
                // SAFETY: forwarded from the trait contract; distinct tuple
                // members point at distinct columns.
                (entity, $(unsafe { &mut *ptrs.$idx.add(row) },)+)
            }
        }
    };
}

impl_view_tuple!((A, 0));
impl_view_tuple!((A, 0), (B, 1));
impl_view_tuple!((A, 0), (B, 1), (C, 2));
impl_view_tuple!((A, 0), (B, 1), (C, 2), (D, 3));
