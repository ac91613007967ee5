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

//! Entity identifiers and ID allocation.

use std::collections::BTreeSet;
use std::fmt;

/// Opaque entity identifier minted by a world.
///
/// Entities carry no data; they exist by being registered. IDs are
/// dense-ish: freed IDs are recycled (smallest first) before the
/// monotone counter grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Raw index form, used by paged sparse storage.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity ID allocator shared by both world flavors.
///
/// Invariant: `free` only contains values strictly below `next`, and an
/// ID is live iff it is below `next` and not in `free`.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
    free: BTreeSet<u64>,
}

impl IdAllocator {
    /// Create an empty allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint an entity ID, recycling the smallest freed ID first.
    pub fn allocate(&mut self) -> EntityId {
        if let Some(&id) = self.free.iter().next() {
            self.free.remove(&id);
            return EntityId(id);
        }
        let id = self.next;
        self.next += 1;
        EntityId(id)
    }

    /// Return an ID to the free pool.
    pub fn release(&mut self, entity: EntityId) {
        debug_assert!(entity.0 < self.next, "released an ID that was never allocated");
        self.free.insert(entity.0);
    }

    /// An ID is registered iff it was allocated and not freed since.
    pub fn is_registered(&self, entity: EntityId) -> bool {
        entity.0 < self.next && !self.free.contains(&entity.0)
    }

    /// Number of live IDs
    pub fn live_count(&self) -> usize {
        self.next as usize - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_allocation() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.allocate(), EntityId(0));
        assert_eq!(alloc.allocate(), EntityId(1));
        assert_eq!(alloc.allocate(), EntityId(2));
        assert_eq!(alloc.live_count(), 3);
    }

    #[test]
    fn test_smallest_freed_id_reused_first() {
        let mut alloc = IdAllocator::new();
        for _ in 0..4 {
            alloc.allocate();
        }
        alloc.release(EntityId(2));
        alloc.release(EntityId(0));

        assert_eq!(alloc.allocate(), EntityId(0));
        assert_eq!(alloc.allocate(), EntityId(2));
        assert_eq!(alloc.allocate(), EntityId(4));
    }

    #[test]
    fn test_registration_tracking() {
        let mut alloc = IdAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        alloc.release(a);

        assert!(!alloc.is_registered(a));
        assert!(alloc.is_registered(b));
        assert!(!alloc.is_registered(EntityId(99)));
        assert_eq!(alloc.live_count(), 1);
    }
}
