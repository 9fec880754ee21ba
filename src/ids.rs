// Copyright 2025 trackrec authors
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

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

/// Identifier of a tracked object, unique across all devices sharing one
/// [`TrackingContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Sentinel returned by lookups that found nothing.
    pub const INVALID: ObjectId = ObjectId(u32::MAX);

    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("invalid")
        }
    }
}

/// Shared allocation context for object and device ids.
///
/// An explicit context object passed to every device; there is no global
/// singleton, so independent trackers (and tests) can run fully isolated
/// id spaces side by side.
#[derive(Debug, Default)]
pub struct TrackingContext {
    next_object_id: AtomicU32,
    next_device_id: AtomicU64,
    descriptions: Mutex<HashMap<String, ObjectId>>,
}

impl TrackingContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh object id, unique across every device sharing this
    /// context, and remembers its description.
    pub fn allocate_object_id(&self, description: &str) -> ObjectId {
        let raw = self.next_object_id.fetch_add(1, Ordering::Relaxed);
        debug_assert!(raw != u32::MAX, "object id space exhausted");
        let id = ObjectId(raw);
        if let Ok(mut map) = self.descriptions.lock() {
            map.insert(description.to_string(), id);
        }
        id
    }

    /// Context-wide description lookup. Returns [`ObjectId::INVALID`] for an
    /// unknown description.
    pub fn object_id(&self, description: &str) -> ObjectId {
        self.descriptions
            .lock()
            .ok()
            .and_then(|map| map.get(description).copied())
            .unwrap_or(ObjectId::INVALID)
    }

    pub(crate) fn allocate_device_id(&self) -> u64 {
        self.next_device_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Bidirectional description <-> id map owned by one device.
#[derive(Debug, Default)]
pub struct ObjectDescriptionMap {
    by_description: HashMap<String, ObjectId>,
    by_id: HashMap<ObjectId, String>,
}

impl ObjectDescriptionMap {
    /// Registers a description under `id`. Returns `false` without touching
    /// the map when the description is already registered on this device.
    pub fn add_unique(&mut self, description: &str, id: ObjectId) -> bool {
        if !id.is_valid() || self.by_description.contains_key(description) {
            debug_assert!(id.is_valid(), "registering an invalid object id");
            return false;
        }
        self.by_description.insert(description.to_string(), id);
        self.by_id.insert(id, description.to_string());
        true
    }

    /// Returns [`ObjectId::INVALID`] for an unknown description.
    #[must_use]
    pub fn object_id(&self, description: &str) -> ObjectId {
        self.by_description
            .get(description)
            .copied()
            .unwrap_or(ObjectId::INVALID)
    }

    /// Returns an empty string for an unknown id.
    #[must_use]
    pub fn description(&self, id: ObjectId) -> String {
        self.by_id.get(&id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Snapshot of all (id, description) pairs, e.g. for a data record.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ObjectId, String)> {
        let mut pairs: Vec<_> = self
            .by_id
            .iter()
            .map(|(id, desc)| (*id, desc.clone()))
            .collect();
        pairs.sort_by_key(|(id, _)| *id);
        pairs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Maps a tracker's native object identifiers to context-unique
/// [`ObjectId`]s and back.
///
/// Trackers that surface their own id type (`E`) register each external
/// object once and translate per sample. Lookups of unmapped entries are
/// programmer errors; they debug-assert and return the sentinel rather
/// than corrupting the mapping.
#[derive(Debug)]
pub struct ObjectMapper<E> {
    internal_to_external: HashMap<ObjectId, E>,
    external_to_internal: HashMap<E, ObjectId>,
}

impl<E: Eq + Hash + Clone> ObjectMapper<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            internal_to_external: HashMap::new(),
            external_to_internal: HashMap::new(),
        }
    }

    /// Allocates a fresh internal id for `external` and stores the pair.
    /// Returns [`ObjectId::INVALID`] if `external` is already mapped.
    pub fn new_internal_object_id(
        &mut self,
        context: &TrackingContext,
        external: E,
        description: &str,
    ) -> ObjectId {
        if self.external_to_internal.contains_key(&external) {
            debug_assert!(false, "external object mapped twice");
            return ObjectId::INVALID;
        }
        let internal = context.allocate_object_id(description);
        self.internal_to_external.insert(internal, external.clone());
        self.external_to_internal.insert(external, internal);
        internal
    }

    #[must_use]
    pub fn internal_object_id(&self, external: &E) -> ObjectId {
        match self.external_to_internal.get(external) {
            Some(id) => *id,
            None => {
                debug_assert!(false, "unmapped external object");
                ObjectId::INVALID
            }
        }
    }

    #[must_use]
    pub fn external_object_id(&self, internal: ObjectId) -> Option<&E> {
        let external = self.internal_to_external.get(&internal);
        debug_assert!(external.is_some(), "unmapped internal object");
        external
    }

    #[must_use]
    pub fn has_external(&self, external: &E) -> bool {
        self.external_to_internal.contains_key(external)
    }

    /// Removes the pair keyed by `external`. Returns the internal id that
    /// was mapped, if any.
    pub fn remove_external(&mut self, external: &E) -> Option<ObjectId> {
        let internal = self.external_to_internal.remove(external)?;
        self.internal_to_external.remove(&internal);
        Some(internal)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.external_to_internal.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.external_to_internal.is_empty()
    }
}

impl<E: Eq + Hash + Clone> Default for ObjectMapper<E> {
    fn default() -> Self {
        Self::new()
    }
}
