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

//! Component identity: type registry, canonical signatures, bundles
//!
//! Components are plain data attached to entities. The registry assigns
//! each component type a totally ordered `TypeKey` on first observation,
//! which gives signatures a canonical form independent of `TypeId`
//! ordering.

use std::any::TypeId;

use ahash::AHashMap;
use smallvec::{smallvec, SmallVec};

use crate::archetype::ArchetypeTable;
use crate::error::Result;

/// Maximum number of components supported by Bundle implementations
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// Marker trait for components
///
/// Components must be 'static (no borrowed data)
pub trait Component: 'static + Send + Sync {}

/// Automatically implement Component for all valid types
impl<T: 'static + Send + Sync> Component for T {}

/// Stable, totally ordered identifier for a component type.
///
/// Keys are assigned per registry in first-observation order, so two
/// signatures over the same member set always serialize identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeKey(u32);

impl TypeKey {
    /// Dense index form, usable for direct table addressing.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Metadata recorded for a registered component type
#[derive(Clone)]
pub struct TypeInfo {
    /// Key assigned by the registry
    pub key: TypeKey,
    /// Runtime type identity
    pub type_id: TypeId,
    /// Rust type name, for diagnostics
    pub name: &'static str,
    /// `size_of` the component in bytes
    pub size: usize,
    /// `align_of` the component in bytes
    pub align: usize,
    pub(crate) drop_fn: Option<unsafe fn(*mut u8)>,
}

/// Per-world mapping from Rust types to compact `TypeKey` values.
///
/// Registration is idempotent: the first `key_of` for a type assigns the
/// next sequential key, later calls return the same key.
#[derive(Default)]
pub struct TypeRegistry {
    by_type: AHashMap<TypeId, TypeKey>,
    infos: Vec<TypeInfo>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for component type `T`, registering it on first observation.
    pub fn key_of<T: Component>(&mut self) -> TypeKey {
        let type_id = TypeId::of::<T>();
        if let Some(&key) = self.by_type.get(&type_id) {
            return key;
        }

        let key = TypeKey(self.infos.len() as u32);
        self.by_type.insert(type_id, key);
        self.infos.push(TypeInfo {
            key,
            type_id,
            name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            // Stored so type-erased columns can destroy removed rows
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(|ptr| {
                    // SAFETY: Only called by column cleanup with a pointer to an
                    // initialized T stored in a column created from this info.
                    unsafe {
                        std::ptr::drop_in_place(ptr as *mut T);
                    }
                })
            } else {
                None
            },
        });
        key
    }

    /// Key for `T` if it has been observed, without registering it.
    pub fn lookup<T: Component>(&self) -> Option<TypeKey> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Metadata for a registered key
    pub fn info(&self, key: TypeKey) -> &TypeInfo {
        &self.infos[key.index()]
    }

    /// Byte size of a registered component type
    pub fn size_of(&self, key: TypeKey) -> usize {
        self.infos[key.index()].size
    }

    /// Type name of a registered component type
    pub fn name_of(&self, key: TypeKey) -> &'static str {
        self.infos[key.index()].name
    }

    /// Number of registered component types
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// True when no types have been observed yet
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

/// Canonical ordered set of component types.
///
/// Members are kept sorted and deduplicated, so structural equality and
/// hashing are order-independent at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    keys: SmallVec<[TypeKey; MAX_BUNDLE_COMPONENTS]>,
}

impl Signature {
    /// Empty signature
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an arbitrary key list (sorted and deduplicated)
    pub fn from_keys(keys: impl IntoIterator<Item = TypeKey>) -> Self {
        let mut keys: SmallVec<[TypeKey; MAX_BUNDLE_COMPONENTS]> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        Self { keys }
    }

    /// Membership test
    pub fn contains(&self, key: TypeKey) -> bool {
        self.keys.binary_search(&key).is_ok()
    }

    /// True when every member of `other` is a member of `self`
    pub fn contains_all(&self, other: &Signature) -> bool {
        other.keys.iter().all(|&key| self.contains(key))
    }

    /// Copy of this signature with `key` added
    pub fn inserted(&self, key: TypeKey) -> Signature {
        let mut next = self.clone();
        if let Err(position) = next.keys.binary_search(&key) {
            next.keys.insert(position, key);
        }
        next
    }

    /// Copy of this signature with `key` removed
    pub fn removed(&self, key: TypeKey) -> Signature {
        let mut next = self.clone();
        if let Ok(position) = next.keys.binary_search(&key) {
            next.keys.remove(position);
        }
        next
    }

    /// Members in canonical (ascending key) order
    pub fn iter(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.keys.iter().copied()
    }

    /// Number of member types
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True for the empty signature
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Views and queries hand out one `&mut` per tuple member, so a type may
/// appear only once per tuple.
pub(crate) fn assert_distinct_keys(keys: &[TypeKey]) {
    for (index, key) in keys.iter().enumerate() {
        assert!(
            !keys[index + 1..].contains(key),
            "duplicate component type in view tuple"
        );
    }
}

/// Bundle of components
///
/// Allows attaching multiple components to an entity in one archetype
/// transition.
pub trait Bundle: Send + Sync + 'static {
    /// Keys of all components in the bundle, in tuple order
    fn type_keys(registry: &mut TypeRegistry) -> SmallVec<[TypeKey; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// Write the bundle's values into `row` of `table`.
    ///
    /// `keys` parallels the tuple order. `replace[i]` selects whether the
    /// destination slot already holds a value that must be dropped first
    /// (a re-added component that was byte-copied during the transition)
    /// or is uninitialized.
    fn write_into(
        self,
        table: &mut ArchetypeTable,
        keys: &[TypeKey],
        row: usize,
        replace: &[bool],
    ) -> Result<()>
    where
        Self: Sized;
}

macro_rules! impl_bundle {
    ($(($T:ident, $idx:tt)),+) => {
        impl<$($T: Component),+> Bundle for ($($T,)+) {
            fn type_keys(
                registry: &mut TypeRegistry,
            ) -> SmallVec<[TypeKey; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(registry.key_of::<$T>()),+]
            }

            #[allow(non_snake_case)]
            fn write_into(
                self,
                table: &mut ArchetypeTable,
                keys: &[TypeKey],
                row: usize,
                replace: &[bool],
            ) -> Result<()> {
                let ($($T,)+) = self;
                $(
                    if replace[$idx] {
                        table.replace_component(keys[$idx], row, $T)?;
                    } else {
                        table.init_component(keys[$idx], row, $T)?;
                    }
                )+
                Ok(())
            }
        }
    };
}

impl_bundle!((A, 0));
impl_bundle!((A, 0), (B, 1));
impl_bundle!((A, 0), (B, 1), (C, 2));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7));
