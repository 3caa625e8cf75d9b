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

use std::fmt;

use serde::{Deserialize, Serialize};

/// A unique identifier for an entity in the world.
///
/// It combines an index with a generation count to solve the "ABA problem".
/// When an entity is despawned, its index can be recycled for a new entity,
/// but the generation is incremented. This ensures that old `EntityId` handles
/// pointing to a recycled index become invalid and cannot accidentally affect
/// the new entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    /// The slot index of the entity in its owning storage.
    pub index: u32,
    /// A generation counter that is incremented each time the index is recycled.
    pub generation: u32,
}

impl EntityId {
    /// Sentinel used by collaborators for "no entity".
    pub const NULL: EntityId = EntityId {
        index: u32::MAX,
        generation: 0,
    };

    /// Creates an id from its raw parts.
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns `true` unless this is [`EntityId::NULL`].
    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::NULL
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_invalid() {
        assert!(!EntityId::NULL.is_valid());
        assert!(EntityId::new(0, 0).is_valid());
    }

    #[test]
    fn generation_distinguishes_recycled_slots() {
        let old = EntityId::new(7, 1);
        let recycled = EntityId::new(7, 2);
        assert_ne!(old, recycled);
        assert_eq!(recycled.to_string(), "7v2");
    }

    #[test]
    fn serde_uses_plain_fields() {
        let id = EntityId::new(3, 9);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#"{"index":3,"generation":9}"#);
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
