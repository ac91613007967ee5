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

//! weft-ecs - Dual-storage Entity Component System
//!
//! Two interchangeable storage engines behind one behavioral contract:
//! an archetype [`World`] (column-major SoA tables per component-set
//! signature) and a [`SparseWorld`] (one paged sparse set per component
//! type with composable query nodes). An [`Engine`] hosts a world, a
//! worker pool, and priority-ordered system groups with deferred
//! structural mutation through a [`CommandBuffer`].

pub mod archetype;
pub mod command;
pub mod component;
pub mod entity;
pub mod error;
pub mod event;
pub mod executor;
pub mod query;
pub mod schedule;
pub mod sparse;
pub mod sparse_world;
pub mod system;
pub mod view;
pub mod world;

// Re-exports for convenience
pub use archetype::{ArchetypeTable, ComponentColumn};
pub use command::CommandBuffer;
pub use component::{Bundle, Component, Signature, TypeKey, TypeRegistry};
pub use entity::EntityId;
pub use error::{EcsError, Result};
pub use event::{Event, SubscriptionId};
pub use executor::WorkerPool;
pub use query::{NodeId, Query};
pub use schedule::Engine;
pub use sparse::{SparseSet, SparseStore};
pub use sparse_world::SparseWorld;
pub use system::{SystemGroupId, SystemId};
pub use view::WorldView;
pub use world::World;
