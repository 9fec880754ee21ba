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

//! Callback registries with RAII subscription handles.
//!
//! A handle unsubscribes exactly once when dropped. Handles are move-only;
//! [`SampleSubscription::make_weak`] releases the handle's strong device
//! reference so long-lived observers (such as the recorder) do not keep a
//! device alive, while dropping the handle still unsubscribes as long as
//! the device itself is.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use crate::device::Device;
use crate::ids::ObjectId;
use crate::sample::{Sample, Timestamp};

/// Invoked after a posted sample became visible in the device's store.
pub type SampleCallback = dyn Fn(&Arc<Device>, &Arc<Sample>) + Send + Sync;

/// Invoked once per tracked-object transition; `found` is `true` for
/// newly tracked ids and `false` for lost ones.
pub type ObjectEventCallback =
    dyn Fn(&Arc<Device>, bool, &BTreeSet<ObjectId>, Timestamp) + Send + Sync;

/// Ordered callback registry; ids are monotonic, non-zero, and never
/// reused within a registry.
pub struct SubscriptionRegistry<C: ?Sized> {
    next_id: u64,
    entries: BTreeMap<u64, Arc<C>>,
}

impl<C: ?Sized> SubscriptionRegistry<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: BTreeMap::new(),
        }
    }

    pub fn subscribe(&mut self, callback: Arc<C>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, callback);
        id
    }

    /// Idempotent; returns `false` if the id was not registered.
    pub fn unsubscribe(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Callbacks in ascending subscription-id order, cloned so delivery
    /// happens without holding the registry lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<C>> {
        self.entries.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C: ?Sized> Default for SubscriptionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! subscription_handle {
    ($name:ident, $unsubscribe:ident, $doc:literal) => {
        #[doc = $doc]
        ///
        /// Dropping the handle unsubscribes exactly once. The inert handle
        /// (id 0) never refers to a registration and drops silently.
        #[derive(Debug)]
        pub struct $name {
            id: u64,
            device: Weak<Device>,
            strong: Option<Arc<Device>>,
        }

        impl $name {
            pub(crate) fn new(device: &Arc<Device>, id: u64) -> Self {
                Self {
                    id,
                    device: Arc::downgrade(device),
                    strong: Some(Arc::clone(device)),
                }
            }

            /// A handle bound to nothing; dropping it has no effect.
            #[must_use]
            pub fn inert() -> Self {
                Self {
                    id: 0,
                    device: Weak::new(),
                    strong: None,
                }
            }

            /// Releases the strong device reference; the subscription stays
            /// registered and still unsubscribes on drop while the device
            /// is alive elsewhere.
            pub fn make_weak(&mut self) {
                self.strong = None;
            }

            /// `false` for inert handles and handles whose device is gone.
            #[must_use]
            pub fn is_active(&self) -> bool {
                self.id != 0 && (self.strong.is_some() || self.device.upgrade().is_some())
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                if self.id == 0 {
                    return;
                }
                let device = self.strong.take().or_else(|| self.device.upgrade());
                if let Some(device) = device {
                    device.$unsubscribe(self.id);
                }
            }
        }
    };
}

subscription_handle!(
    SampleSubscription,
    unsubscribe_samples,
    "RAII handle for a sample-event subscription."
);
subscription_handle!(
    ObjectEventSubscription,
    unsubscribe_object_events,
    "RAII handle for an object found/lost subscription."
);
