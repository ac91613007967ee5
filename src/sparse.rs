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

//! Paged sparse-set component storage
//!
//! One set per component type: a paged sparse index maps entity IDs to
//! dense slots holding the values. `set` fires the change event only on
//! insertion (overwrites stay silent), `remove` only when something was
//! actually removed.

use std::any::Any;

use crate::entity::EntityId;
use crate::error::Result;
use crate::event::Event;

/// Entities per sparse page
pub const PAGE_SIZE: usize = 1024;

/// Sentinel for unset sparse slots
const ABSENT: usize = usize::MAX;

type Page = Box<[usize; PAGE_SIZE]>;

/// Sparse set for component type `T`.
///
/// Invariants after every operation:
/// - `dense.len() == dense_entities.len()`
/// - for every dense index `i`, the sparse slot of `dense_entities[i]`
///   holds `i`
/// - removed entities map to the sentinel
pub struct SparseSet<T> {
    pages: Vec<Option<Page>>,
    dense: Vec<T>,
    dense_entities: Vec<EntityId>,
    on_updated: Event,
}

impl<T> SparseSet<T> {
    /// Empty set
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            dense: Vec::new(),
            dense_entities: Vec::new(),
            on_updated: Event::new(),
        }
    }

    #[inline]
    fn split(entity: EntityId) -> (usize, usize) {
        (entity.index() / PAGE_SIZE, entity.index() % PAGE_SIZE)
    }

    fn dense_index(&self, entity: EntityId) -> Option<usize> {
        let (page, slot) = Self::split(entity);
        let index = *self.pages.get(page)?.as_ref()?.get(slot)?;
        if index == ABSENT {
            None
        } else {
            Some(index)
        }
    }

    fn sparse_slot_mut(&mut self, entity: EntityId) -> Option<&mut usize> {
        let (page, slot) = Self::split(entity);
        self.pages.get_mut(page)?.as_mut()?.get_mut(slot)
    }

    /// Insert or overwrite `entity`'s value.
    ///
    /// Fires `on_updated` only when the entity was newly inserted.
    pub fn set(&mut self, entity: EntityId, value: T) -> Result<()> {
        let (page, slot) = Self::split(entity);
        if self.pages.len() <= page {
            self.pages.resize_with(page + 1, || None);
        }
        let page = self.pages[page].get_or_insert_with(|| Box::new([ABSENT; PAGE_SIZE]));

        let current = page[slot];
        if current == ABSENT {
            page[slot] = self.dense.len();
            self.dense.push(value);
            self.dense_entities.push(entity);
            self.on_updated.invoke(&())?;
        } else {
            self.dense[current] = value;
        }
        Ok(())
    }

    /// Swap-remove `entity`'s value; absent entities are a no-op.
    ///
    /// Returns whether a value was removed; fires `on_updated` only then.
    pub fn remove(&mut self, entity: EntityId) -> Result<bool> {
        let Some(index) = self.dense_index(entity) else {
            return Ok(false);
        };
        let last_entity = self.dense_entities[self.dense.len() - 1];

        // Patch the moved element's sparse slot first; when `entity` is
        // itself the last element this writes `index` and the next line
        // clears it again.
        if let Some(slot) = self.sparse_slot_mut(last_entity) {
            *slot = index;
        }
        if let Some(slot) = self.sparse_slot_mut(entity) {
            *slot = ABSENT;
        }

        self.dense.swap_remove(index);
        self.dense_entities.swap_remove(index);
        self.on_updated.invoke(&())?;
        Ok(true)
    }

    /// Borrowed value for `entity`
    pub fn get(&self, entity: EntityId) -> Option<&T> {
        self.dense_index(entity).map(|index| &self.dense[index])
    }

    /// Mutable value for `entity`
    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut T> {
        let index = self.dense_index(entity)?;
        Some(&mut self.dense[index])
    }

    /// Membership test
    pub fn has(&self, entity: EntityId) -> bool {
        self.dense_index(entity).is_some()
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Owning entities in dense insertion order
    pub fn entities(&self) -> &[EntityId] {
        &self.dense_entities
    }

    /// Stored values in dense order
    pub fn dense(&self) -> &[T] {
        &self.dense
    }

    /// Stored values in dense order, mutable
    pub fn dense_mut(&mut self) -> &mut [T] {
        &mut self.dense
    }

    /// Change signal, fired on insertion and removal
    pub fn on_updated(&self) -> &Event {
        &self.on_updated
    }
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased handle over a `SparseSet<T>`.
///
/// The typed set is recovered by downcast at the world boundary only;
/// everything the query graph needs is available untyped.
pub trait SparseStore: Any + Send + Sync {
    /// Number of stored values
    fn len(&self) -> usize;

    /// Membership test
    fn has(&self, entity: EntityId) -> bool;

    /// Remove `entity`'s value if present
    fn remove(&mut self, entity: EntityId) -> Result<bool>;

    /// Owning entities in dense order
    fn entities(&self) -> &[EntityId];

    /// Change signal
    fn on_updated(&self) -> &Event;

    /// Stored element type name, for diagnostics
    fn type_name(&self) -> &'static str;

    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + Sync + 'static> SparseStore for SparseSet<T> {
    fn len(&self) -> usize {
        SparseSet::len(self)
    }

    fn has(&self, entity: EntityId) -> bool {
        SparseSet::has(self, entity)
    }

    fn remove(&mut self, entity: EntityId) -> Result<bool> {
        SparseSet::remove(self, entity)
    }

    fn entities(&self) -> &[EntityId] {
        SparseSet::entities(self)
    }

    fn on_updated(&self) -> &Event {
        SparseSet::on_updated(self)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_set_get_remove_roundtrip() {
        let mut set = SparseSet::new();
        set.set(EntityId(3), "three").unwrap();
        set.set(EntityId(7), "seven").unwrap();

        assert_eq!(set.get(EntityId(3)), Some(&"three"));
        assert!(set.has(EntityId(7)));
        assert_eq!(set.len(), 2);

        assert!(set.remove(EntityId(3)).unwrap());
        assert!(!set.has(EntityId(3)));
        assert_eq!(set.get(EntityId(7)), Some(&"seven"));

        // Absent removal is a no-op
        assert!(!set.remove(EntityId(3)).unwrap());
    }

    #[test]
    fn test_swap_remove_patches_sparse_index() {
        let mut set = SparseSet::new();
        for i in 0..5 {
            set.set(EntityId(i), i * 10).unwrap();
        }
        set.remove(EntityId(0)).unwrap();

        // The last element moved into slot 0; every survivor still
        // resolves to its own value.
        for i in 1..5 {
            assert_eq!(set.get(EntityId(i)), Some(&(i * 10)));
        }
        assert_eq!(set.len(), 4);

        // Round-trip invariant: entities()[i] resolves back to index i.
        for (index, &entity) in set.entities().iter().enumerate() {
            assert_eq!(set.dense_index(entity), Some(index));
        }
    }

    #[test]
    fn test_overwrite_does_not_fire_update() {
        let mut set = SparseSet::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        set.on_updated()
            .subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        set.set(EntityId(1), 1).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        set.set(EntityId(1), 2).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(set.get(EntityId(1)), Some(&2));

        set.remove(EntityId(1)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_entities_span_multiple_pages() {
        let mut set = SparseSet::new();
        let far = EntityId((3 * PAGE_SIZE + 17) as u64);
        set.set(EntityId(0), 'a').unwrap();
        set.set(far, 'b').unwrap();

        assert_eq!(set.get(far), Some(&'b'));
        assert!(!set.has(EntityId((PAGE_SIZE + 1) as u64)));
        assert_eq!(set.entities(), &[EntityId(0), far]);
    }
}
