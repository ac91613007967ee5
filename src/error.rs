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

//! Error types

use std::fmt;

use crate::entity::EntityId;

/// ECS error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Operation referenced an unknown or freed entity ID
    EntityNotRegistered(EntityId),

    /// A type-erased column was asked to operate on a type outside its signature
    ComponentTypeMismatch {
        /// Element type the column was created for
        expected: &'static str,
        /// Type the caller asked for
        actual: &'static str,
    },

    /// Query requested a component the root node's guarantees don't include
    ComponentNotGuaranteed {
        /// Type name of the unguaranteed component
        component: &'static str,
    },

    /// Query construction found an entity listed by the root but absent from a bound storage
    EntityMissingFromStorage {
        /// Entity the root listed
        entity: EntityId,
        /// Type name of the storage the entity was missing from
        component: &'static str,
    },

    /// Subscribe/unsubscribe/invoke during active invocation of the same event
    EventReentrancy,

    /// Task submitted after the worker pool shut down
    WorkerPoolStopped,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotRegistered(entity) => {
                write!(f, "entity {entity} is not registered")
            }
            EcsError::ComponentTypeMismatch { expected, actual } => {
                write!(
                    f,
                    "component type mismatch: column stores {expected}, asked for {actual}"
                )
            }
            EcsError::ComponentNotGuaranteed { component } => {
                write!(
                    f,
                    "query requests component {component} not guaranteed by its root node"
                )
            }
            EcsError::EntityMissingFromStorage { entity, component } => {
                write!(
                    f,
                    "entity {entity} listed by query root but missing from {component} storage"
                )
            }
            EcsError::EventReentrancy => {
                write!(f, "event mutated or invoked while it is being invoked")
            }
            EcsError::WorkerPoolStopped => {
                write!(f, "worker pool has stopped accepting tasks")
            }
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
