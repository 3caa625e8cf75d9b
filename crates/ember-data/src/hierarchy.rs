// Copyright 2025 eraflo
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

//! Parent to children adjacency shared between jobs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ember_core::EntityId;

/// Resolves entity ids into full entity objects of the owning world.
///
/// The hierarchy only stores ids. Callers that need the entities themselves
/// pass their world through this trait to [`EntityHierarchy::get_entity_childs`].
pub trait EntityLookup {
    /// The entity object handed back for an id.
    type Entity;

    /// Returns the entity for `id`. Called once per child, under the
    /// hierarchy lock, so it should be quick and must not touch the hierarchy.
    fn entity(&self, id: EntityId) -> Self::Entity;
}

/// A thread-safe map from a parent entity to its ordered list of children.
///
/// One lock covers the whole container. Every read returns a copy, never a
/// reference into the container. A parent entry left without children stays
/// in place until [`EntityHierarchy::erase`] removes it.
#[derive(Debug, Default)]
pub struct EntityHierarchy {
    parents: Mutex<HashMap<EntityId, Vec<EntityId>>>,
}

impl EntityHierarchy {
    /// Creates an empty hierarchy.
    pub fn new() -> Self {
        Self::default()
    }

    fn parents(&self) -> MutexGuard<'_, HashMap<EntityId, Vec<EntityId>>> {
        self.parents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `child` to the children of `parent`, creating the entry if
    /// needed. The same child can be added more than once.
    pub fn emplace_pair(&self, parent: EntityId, child: EntityId) {
        self.parents().entry(parent).or_default().push(child);
    }

    /// Removes `parent` and all of its child associations. Does nothing if
    /// `parent` has no entry.
    pub fn erase(&self, parent: EntityId) {
        if self.parents().remove(&parent).is_some() {
            log::trace!("Erased hierarchy entry of {parent}.");
        }
    }

    /// Removes every occurrence of `child` under `parent`. The entry of
    /// `parent` is kept even if this leaves it empty.
    pub fn erase_pair(&self, parent: EntityId, child: EntityId) {
        if let Some(children) = self.parents().get_mut(&parent) {
            children.retain(|&existing| existing != child);
        }
    }

    /// A copy of the children of `parent`, in insertion order. Empty when
    /// `parent` has no entry.
    pub fn get_childs(&self, parent: EntityId) -> Vec<EntityId> {
        self.parents().get(&parent).cloned().unwrap_or_default()
    }

    /// The children of `parent` resolved through `world`, exactly one entity
    /// per stored child, in insertion order.
    pub fn get_entity_childs<W>(&self, world: &W, parent: EntityId) -> Vec<W::Entity>
    where
        W: EntityLookup + ?Sized,
    {
        let parents = self.parents();
        let Some(children) = parents.get(&parent) else {
            return Vec::new();
        };
        children.iter().map(|&child| world.entity(child)).collect()
    }

    /// Returns `true` if `parent` has an entry, even an empty one.
    pub fn contains_parent(&self, parent: EntityId) -> bool {
        self.parents().contains_key(&parent)
    }

    /// Number of parent entries.
    pub fn len(&self) -> usize {
        self.parents().len()
    }

    /// Returns `true` when no parent has an entry.
    pub fn is_empty(&self) -> bool {
        self.parents().is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.parents().clear();
    }

    /// A sorted copy of the whole container, for debugging and tooling.
    pub fn snapshot(&self) -> BTreeMap<EntityId, Vec<EntityId>> {
        self.parents()
            .iter()
            .map(|(parent, children)| (*parent, children.clone()))
            .collect()
    }
}
