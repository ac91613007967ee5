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

//! Archetype storage: SoA tables of entities sharing a signature

use std::any::TypeId;
use std::ptr::NonNull;

use rustc_hash::FxHashMap;

use crate::component::{Component, Signature, TypeInfo, TypeKey, TypeRegistry};
use crate::entity::EntityId;
use crate::error::{EcsError, Result};

/// Type-erased component column
///
/// A contiguous byte buffer of `len × item_size` rows. The element
/// `TypeId` is stored so every typed access is checked at the downcast
/// boundary instead of trusted at each use.
pub struct ComponentColumn {
    type_id: TypeId,
    type_name: &'static str,
    item_size: usize,
    drop_fn: Option<unsafe fn(*mut u8)>,
    data: Vec<u8>,
    len: usize,
}

impl ComponentColumn {
    pub(crate) fn for_type(info: &TypeInfo) -> Self {
        Self {
            type_id: info.type_id,
            type_name: info.name,
            item_size: info.size,
            drop_fn: info.drop_fn,
            data: Vec::new(),
            len: 0,
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the column holds no rows
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Row stride in bytes
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Element type name, for diagnostics
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn check_type<T: Component>(&self) -> Result<()> {
        if self.type_id != TypeId::of::<T>() {
            return Err(EcsError::ComponentTypeMismatch {
                expected: self.type_name,
                actual: std::any::type_name::<T>(),
            });
        }
        Ok(())
    }

    /// Grow the buffer so `rows` rows are addressable, without
    /// zero-initializing memory that is about to be overwritten.
    fn grow_to(&mut self, rows: usize) {
        let required = rows * self.item_size;
        if required > self.data.len() {
            if required > self.data.capacity() {
                self.data.reserve(required - self.data.len());
            }
            // SAFETY: u8 is valid for any bit pattern and capacity was just
            // ensured; the fresh region is only ever written before a typed
            // read can observe it (rows beyond `len` are unreachable).
            unsafe { self.data.set_len(required) };
        }
    }

    fn typed_ptr<T: Component>(&self, row: usize) -> *const T {
        if self.item_size == 0 {
            return NonNull::<T>::dangling().as_ptr();
        }
        // SAFETY: callers bound-check `row` against `len` first.
        unsafe { self.data.as_ptr().add(row * self.item_size) as *const T }
    }

    fn typed_ptr_mut<T: Component>(&mut self, row: usize) -> *mut T {
        if self.item_size == 0 {
            return NonNull::<T>::dangling().as_ptr();
        }
        // SAFETY: callers grow or bound-check before dereferencing.
        unsafe { self.data.as_mut_ptr().add(row * self.item_size) as *mut T }
    }

    /// Write `value` into an uninitialized `row`, extending the column.
    pub(crate) fn init_write<T: Component>(&mut self, row: usize, value: T) -> Result<()> {
        self.check_type::<T>()?;
        self.grow_to(row + 1);
        // SAFETY: the slot is addressable after grow_to and holds no live
        // value; ptr::write moves `value` in without dropping the slot.
        unsafe { std::ptr::write(self.typed_ptr_mut::<T>(row), value) };
        self.len = self.len.max(row + 1);
        Ok(())
    }

    /// Replace the live value at `row`, dropping the previous one.
    pub(crate) fn replace<T: Component>(&mut self, row: usize, value: T) -> Result<()> {
        self.check_type::<T>()?;
        if row >= self.len {
            return Err(EcsError::ComponentTypeMismatch {
                expected: self.type_name,
                actual: "(row out of bounds)",
            });
        }
        // SAFETY: row < len, so the slot holds an initialized T; plain
        // assignment drops it before storing the replacement.
        unsafe { *self.typed_ptr_mut::<T>(row) = value };
        Ok(())
    }

    /// Typed read access to one row
    pub fn get<T: Component>(&self, row: usize) -> Option<&T> {
        if self.type_id != TypeId::of::<T>() || row >= self.len {
            return None;
        }
        // SAFETY: type checked above, row < len means the slot was written.
        Some(unsafe { &*self.typed_ptr::<T>(row) })
    }

    /// Typed mutable access to one row
    pub fn get_mut<T: Component>(&mut self, row: usize) -> Option<&mut T> {
        if self.type_id != TypeId::of::<T>() || row >= self.len {
            return None;
        }
        // SAFETY: type checked above, row < len; &mut self gives exclusivity.
        Some(unsafe { &mut *self.typed_ptr_mut::<T>(row) })
    }

    /// Whole column as a typed slice
    pub fn as_slice<T: Component>(&self) -> Result<&[T]> {
        self.check_type::<T>()?;
        // SAFETY: the column was created for T and rows 0..len are initialized.
        Ok(unsafe { std::slice::from_raw_parts(self.typed_ptr::<T>(0), self.len) })
    }

    /// Whole column as a typed mutable slice
    pub fn as_mut_slice<T: Component>(&mut self) -> Result<&mut [T]> {
        self.check_type::<T>()?;
        let len = self.len;
        // SAFETY: as above; exclusivity comes from &mut self.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.typed_ptr_mut::<T>(0), len) })
    }

    /// Checked typed base pointer, used when binding views.
    pub(crate) fn typed_base_ptr<T: Component>(&mut self) -> Option<*mut T> {
        if self.type_id != TypeId::of::<T>() {
            return None;
        }
        Some(self.typed_ptr_mut::<T>(0))
    }

    /// Raw pointer to one row's bytes
    pub(crate) fn row_ptr_mut(&mut self, row: usize) -> *mut u8 {
        debug_assert!(row < self.len || self.item_size == 0);
        if self.item_size == 0 {
            return NonNull::<u8>::dangling().as_ptr();
        }
        // SAFETY: row is in bounds per the assertion above.
        unsafe { self.data.as_mut_ptr().add(row * self.item_size) }
    }

    /// Byte-copy `source_row` of `source` into `dest_row` of `self`.
    ///
    /// The destination slot must be uninitialized: nothing is dropped.
    /// Ownership of the value logically moves, so the caller is expected
    /// to forget (not drop) the source row afterwards.
    pub(crate) fn copy_row_from(
        &mut self,
        source: &ComponentColumn,
        source_row: usize,
        dest_row: usize,
    ) {
        debug_assert_eq!(self.type_id, source.type_id, "column transfer across types");
        debug_assert!(source_row < source.len);
        self.grow_to(dest_row + 1);
        if self.item_size > 0 {
            // SAFETY: both offsets are in their buffers; the buffers are
            // distinct columns, so the regions cannot overlap.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    source.data.as_ptr().add(source_row * source.item_size),
                    self.data.as_mut_ptr().add(dest_row * self.item_size),
                    self.item_size,
                );
            }
        }
        self.len = self.len.max(dest_row + 1);
    }

    /// Run the element destructor on `row` without removing it.
    ///
    /// Used for values that are being removed (not transferred); the row
    /// bytes are dead afterwards and must be overwritten or forgotten.
    pub(crate) fn drop_in_row(&mut self, row: usize) {
        debug_assert!(row < self.len);
        if let Some(drop_fn) = self.drop_fn {
            let ptr = if self.item_size == 0 {
                NonNull::<u8>::dangling().as_ptr()
            } else {
                // SAFETY: row < len.
                unsafe { self.data.as_mut_ptr().add(row * self.item_size) }
            };
            // SAFETY: the slot holds an initialized value of the column's
            // element type; drop_fn came from that type's registration.
            unsafe { drop_fn(ptr) };
        }
    }

    /// Swap-remove `row` without running its destructor.
    ///
    /// The value at `row` must have been moved out (transferred to another
    /// column) or explicitly dropped via [`Self::drop_in_row`].
    pub(crate) fn forget_row(&mut self, row: usize) {
        debug_assert!(row < self.len);
        let last = self.len - 1;
        if row < last && self.item_size > 0 {
            // SAFETY: row < last < len; src and dst are distinct rows of the
            // same stride, so copy_nonoverlapping is sound.
            unsafe {
                let src = self.data.as_ptr().add(last * self.item_size);
                let dst = self.data.as_mut_ptr().add(row * self.item_size);
                std::ptr::copy_nonoverlapping(src, dst, self.item_size);
            }
        }
        self.len = last;
        self.data.truncate(last * self.item_size);
    }
}

impl Drop for ComponentColumn {
    fn drop(&mut self) {
        if let Some(drop_fn) = self.drop_fn {
            for row in 0..self.len {
                let ptr = if self.item_size == 0 {
                    NonNull::<u8>::dangling().as_ptr()
                } else {
                    // SAFETY: row < len, offset stays inside the buffer.
                    unsafe { self.data.as_mut_ptr().add(row * self.item_size) }
                };
                // SAFETY: every row below len is initialized and dropped
                // exactly once here.
                unsafe { drop_fn(ptr) };
            }
        }
    }
}

/// SoA table of all entities sharing one signature.
///
/// Row `i` of every column belongs to `entities[i]`; after every
/// operation all column row counts equal `entities.len()`. Row lookup is
/// a linear scan of the entity vector; archetype populations are expected
/// small relative to total entity count.
pub struct ArchetypeTable {
    signature: Signature,
    entities: Vec<EntityId>,
    columns: Vec<ComponentColumn>,
    column_index: FxHashMap<TypeKey, usize>,
}

impl ArchetypeTable {
    pub(crate) fn new(signature: Signature, registry: &TypeRegistry) -> Self {
        let mut columns = Vec::with_capacity(signature.len());
        let mut column_index = FxHashMap::default();
        for key in signature.iter() {
            column_index.insert(key, columns.len());
            columns.push(ComponentColumn::for_type(registry.info(key)));
        }
        Self {
            signature,
            entities: Vec::new(),
            columns,
            column_index,
        }
    }

    /// Signature shared by every row
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Entities in row order
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when the table has no rows
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Whether the signature contains `key`
    pub fn has(&self, key: TypeKey) -> bool {
        self.column_index.contains_key(&key)
    }

    /// Row index of `entity`, by linear search
    pub fn row_of(&self, entity: EntityId) -> Option<usize> {
        self.entities.iter().position(|&e| e == entity)
    }

    /// Whether the table lists `entity`
    pub fn contains(&self, entity: EntityId) -> bool {
        self.row_of(entity).is_some()
    }

    /// Column for `key`
    pub fn column(&self, key: TypeKey) -> Option<&ComponentColumn> {
        let index = *self.column_index.get(&key)?;
        self.columns.get(index)
    }

    pub(crate) fn column_mut(&mut self, key: TypeKey) -> Option<&mut ComponentColumn> {
        let index = *self.column_index.get(&key)?;
        self.columns.get_mut(index)
    }

    fn column_mut_checked(&mut self, key: TypeKey, actual: &'static str) -> Result<&mut ComponentColumn> {
        let index = *self
            .column_index
            .get(&key)
            .ok_or(EcsError::ComponentTypeMismatch {
                expected: "(type outside table signature)",
                actual,
            })?;
        Ok(&mut self.columns[index])
    }

    /// Append `entity` and return its row; the caller writes every column.
    pub(crate) fn push_row(&mut self, entity: EntityId) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        row
    }

    pub(crate) fn init_component<T: Component>(
        &mut self,
        key: TypeKey,
        row: usize,
        value: T,
    ) -> Result<()> {
        self.column_mut_checked(key, std::any::type_name::<T>())?
            .init_write(row, value)
    }

    pub(crate) fn replace_component<T: Component>(
        &mut self,
        key: TypeKey,
        row: usize,
        value: T,
    ) -> Result<()> {
        self.column_mut_checked(key, std::any::type_name::<T>())?
            .replace(row, value)
    }

    /// Typed component read for `entity`
    pub fn get<T: Component>(&self, key: TypeKey, entity: EntityId) -> Option<&T> {
        let row = self.row_of(entity)?;
        self.column(key)?.get::<T>(row)
    }

    /// Typed component write access for `entity`
    pub fn get_mut<T: Component>(&mut self, key: TypeKey, entity: EntityId) -> Option<&mut T> {
        let row = self.row_of(entity)?;
        self.column_mut(key)?.get_mut::<T>(row)
    }

    /// Raw pointer to `entity`'s row bytes in the `key` column
    pub fn get_raw(&mut self, key: TypeKey, entity: EntityId) -> Option<*mut u8> {
        let row = self.row_of(entity)?;
        Some(self.column_mut(key)?.row_ptr_mut(row))
    }

    /// Whole column for `key` as a typed slice, for view binding
    pub fn component_slice<T: Component>(&self, key: TypeKey) -> Result<&[T]> {
        match self.column(key) {
            Some(column) => column.as_slice::<T>(),
            None => Err(EcsError::ComponentTypeMismatch {
                expected: "(type outside table signature)",
                actual: std::any::type_name::<T>(),
            }),
        }
    }

    /// Byte-copy every shared column's row from `source` into `dest_row`.
    ///
    /// Shared means present in both signatures. Destination slots must be
    /// uninitialized; the source row stays byte-valid and must be
    /// forgotten by the caller once the transition completes.
    pub(crate) fn copy_shared_row_from(
        &mut self,
        source: &ArchetypeTable,
        source_row: usize,
        dest_row: usize,
    ) {
        // Columns sit in signature order, so index i pairs with the i-th key.
        let signature = self.signature.clone();
        for (index, key) in signature.iter().enumerate() {
            if let Some(source_column) = source.column(key) {
                self.columns[index].copy_row_from(source_column, source_row, dest_row);
            }
        }
    }

    /// Swap-remove `row` without dropping its values (they were moved
    /// out). Returns the entity swapped into `row`, if any.
    pub(crate) fn forget_row(&mut self, row: usize) -> Option<EntityId> {
        debug_assert!(row < self.entities.len());
        self.entities.swap_remove(row);
        for column in &mut self.columns {
            column.forget_row(row);
        }
        self.debug_check_lengths();
        if row < self.entities.len() {
            Some(self.entities[row])
        } else {
            None
        }
    }

    /// Swap-remove `row`, dropping every component value it holds.
    pub(crate) fn remove_row_dropping(&mut self, row: usize) -> Option<EntityId> {
        for column in &mut self.columns {
            column.drop_in_row(row);
        }
        self.forget_row(row)
    }

    fn debug_check_lengths(&self) {
        #[cfg(debug_assertions)]
        for column in &self.columns {
            debug_assert_eq!(
                column.len(),
                self.entities.len(),
                "column {} out of step with entity vector",
                column.type_name()
            );
        }
    }
}
