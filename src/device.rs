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

//! Devices own a sample store, subscription registries and the per-device
//! object-description map; the manager tracks the live device set and
//! notifies observers about additions and removals.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::ids::{ObjectDescriptionMap, ObjectId, TrackingContext};
use crate::interpolate::LookupStrategy;
use crate::sample::{Sample, Timestamp};
use crate::store::SampleStore;
use crate::subscription::{
    ObjectEventCallback, ObjectEventSubscription, SampleCallback, SampleSubscription,
    SubscriptionRegistry,
};

/// Broad device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMajor {
    Sensor,
    Tracker,
}

impl DeviceMajor {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sensor => "SENSOR",
            Self::Tracker => "TRACKER",
        }
    }
}

/// Specific device capability, selecting which payloads it posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMinor {
    OrientationTracker3Dof,
    PositionTracker3Dof,
    Tracker6Dof,
    SceneTracker6Dof,
    GpsTracker,
}

impl DeviceMinor {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OrientationTracker3Dof => "ORIENTATION_TRACKER_3DOF",
            Self::PositionTracker3Dof => "POSITION_TRACKER_3DOF",
            Self::Tracker6Dof => "TRACKER_6DOF",
            Self::SceneTracker6Dof => "SCENE_TRACKER_6DOF",
            Self::GpsTracker => "GPS_TRACKER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceKind {
    pub major: DeviceMajor,
    pub minor: DeviceMinor,
}

impl DeviceKind {
    #[must_use]
    pub fn tracker(minor: DeviceMinor) -> Self {
        Self {
            major: DeviceMajor::Tracker,
            minor,
        }
    }
}

/// One measurement source.
///
/// All state is behind independent mutexes; callbacks are delivered after
/// the relevant lock is released, so a callback may query the device but
/// must not subscribe or unsubscribe on it.
pub struct Device {
    id: u64,
    name: String,
    kind: DeviceKind,
    context: Arc<TrackingContext>,
    store: Mutex<SampleStore>,
    sample_subscriptions: Mutex<SubscriptionRegistry<SampleCallback>>,
    object_subscriptions: Mutex<SubscriptionRegistry<ObjectEventCallback>>,
    descriptions: Mutex<ObjectDescriptionMap>,
    tracked: Mutex<BTreeSet<ObjectId>>,
}

impl Device {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: DeviceKind,
        context: Arc<TrackingContext>,
        sample_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: context.allocate_device_id(),
            name: name.into(),
            kind,
            context,
            store: Mutex::new(SampleStore::new(sample_capacity)),
            sample_subscriptions: Mutex::new(SubscriptionRegistry::new()),
            object_subscriptions: Mutex::new(SubscriptionRegistry::new()),
            descriptions: Mutex::new(ObjectDescriptionMap::default()),
            tracked: Mutex::new(BTreeSet::new()),
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    #[must_use]
    pub fn context(&self) -> &Arc<TrackingContext> {
        &self.context
    }

    /// Stores the sample, then fans it out to sample subscribers in
    /// subscription order. The sample is visible via lookups before any
    /// callback runs.
    pub fn post(self: &Arc<Self>, sample: Arc<Sample>) {
        if let Ok(mut store) = self.store.lock() {
            store.insert(Arc::clone(&sample));
        }
        let callbacks = match self.sample_subscriptions.lock() {
            Ok(registry) => registry.snapshot(),
            Err(_) => return,
        };
        for callback in callbacks {
            callback(self, &sample);
        }
    }

    #[must_use]
    pub fn most_recent(&self) -> Option<Arc<Sample>> {
        self.store.lock().ok()?.most_recent()
    }

    #[must_use]
    pub fn sample_at(&self, timestamp: Timestamp) -> Option<Arc<Sample>> {
        self.store.lock().ok()?.at(timestamp)
    }

    #[must_use]
    pub fn sample_near(
        &self,
        timestamp: Timestamp,
        strategy: LookupStrategy,
    ) -> Option<Arc<Sample>> {
        self.store.lock().ok()?.near(timestamp, strategy)
    }

    pub fn set_sample_capacity(&self, capacity: usize) -> bool {
        match self.store.lock() {
            Ok(mut store) => store.set_capacity(capacity),
            Err(_) => false,
        }
    }

    pub fn subscribe_samples<F>(self: &Arc<Self>, callback: F) -> SampleSubscription
    where
        F: Fn(&Arc<Device>, &Arc<Sample>) + Send + Sync + 'static,
    {
        match self.sample_subscriptions.lock() {
            Ok(mut registry) => {
                let id = registry.subscribe(Arc::new(callback));
                SampleSubscription::new(self, id)
            }
            Err(_) => SampleSubscription::inert(),
        }
    }

    pub fn subscribe_object_events<F>(self: &Arc<Self>, callback: F) -> ObjectEventSubscription
    where
        F: Fn(&Arc<Device>, bool, &BTreeSet<ObjectId>, Timestamp) + Send + Sync + 'static,
    {
        match self.object_subscriptions.lock() {
            Ok(mut registry) => {
                let id = registry.subscribe(Arc::new(callback));
                ObjectEventSubscription::new(self, id)
            }
            Err(_) => ObjectEventSubscription::inert(),
        }
    }

    pub(crate) fn unsubscribe_samples(&self, id: u64) {
        if let Ok(mut registry) = self.sample_subscriptions.lock() {
            registry.unsubscribe(id);
        }
    }

    pub(crate) fn unsubscribe_object_events(&self, id: u64) {
        if let Ok(mut registry) = self.object_subscriptions.lock() {
            registry.unsubscribe(id);
        }
    }

    #[cfg(test)]
    pub(crate) fn sample_subscription_count(&self) -> usize {
        self.sample_subscriptions
            .lock()
            .map(|registry| registry.len())
            .unwrap_or(0)
    }

    /// Replaces the tracked-object set and emits the difference: one
    /// found event for newly tracked ids, then one lost event for ids no
    /// longer tracked. No event is emitted for an empty difference.
    pub fn update_tracked_objects(
        self: &Arc<Self>,
        current: BTreeSet<ObjectId>,
        timestamp: Timestamp,
    ) {
        let (found, lost) = match self.tracked.lock() {
            Ok(mut tracked) => {
                let found: BTreeSet<_> = current.difference(&tracked).copied().collect();
                let lost: BTreeSet<_> = tracked.difference(&current).copied().collect();
                *tracked = current;
                (found, lost)
            }
            Err(_) => return,
        };
        if found.is_empty() && lost.is_empty() {
            return;
        }
        let callbacks = match self.object_subscriptions.lock() {
            Ok(registry) => registry.snapshot(),
            Err(_) => return,
        };
        if !found.is_empty() {
            for callback in &callbacks {
                callback(self, true, &found, timestamp);
            }
        }
        if !lost.is_empty() {
            for callback in &callbacks {
                callback(self, false, &lost, timestamp);
            }
        }
    }

    #[must_use]
    pub fn tracked_objects(&self) -> BTreeSet<ObjectId> {
        self.tracked.lock().map(|set| set.clone()).unwrap_or_default()
    }

    /// Allocates a context-unique id for `description` and registers it on
    /// this device. Returns [`ObjectId::INVALID`] if the description is
    /// already registered here.
    pub fn add_unique_object_id(&self, description: &str) -> ObjectId {
        let Ok(mut descriptions) = self.descriptions.lock() else {
            return ObjectId::INVALID;
        };
        if descriptions.object_id(description).is_valid() {
            return ObjectId::INVALID;
        }
        let id = self.context.allocate_object_id(description);
        descriptions.add_unique(description, id);
        id
    }

    /// Per-device description lookup; [`ObjectId::INVALID`] on a miss.
    #[must_use]
    pub fn object_id(&self, description: &str) -> ObjectId {
        self.descriptions
            .lock()
            .map(|map| map.object_id(description))
            .unwrap_or(ObjectId::INVALID)
    }

    /// Empty string on a miss.
    #[must_use]
    pub fn object_description(&self, id: ObjectId) -> String {
        self.descriptions
            .lock()
            .map(|map| map.description(id))
            .unwrap_or_default()
    }

    /// All (id, description) pairs registered on this device.
    #[must_use]
    pub fn description_snapshot(&self) -> Vec<(ObjectId, String)> {
        self.descriptions
            .lock()
            .map(|map| map.snapshot())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Notified with `(device, true)` on addition and `(device, false)` on
/// removal.
pub type DeviceChangedCallback = dyn Fn(&Arc<Device>, bool) + Send + Sync;

/// Owns the live device set and the shared id-allocation context.
pub struct DeviceManager {
    context: Arc<TrackingContext>,
    devices: Mutex<BTreeMap<u64, Arc<Device>>>,
    listeners: Mutex<SubscriptionRegistry<DeviceChangedCallback>>,
    default_sample_capacity: usize,
}

impl DeviceManager {
    #[must_use]
    pub fn new(default_sample_capacity: usize) -> Self {
        Self {
            context: Arc::new(TrackingContext::new()),
            devices: Mutex::new(BTreeMap::new()),
            listeners: Mutex::new(SubscriptionRegistry::new()),
            default_sample_capacity,
        }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<TrackingContext> {
        &self.context
    }

    /// Creates and registers a device. Returns `None` if the name is
    /// already in use.
    pub fn add_device(&self, name: &str, kind: DeviceKind) -> Option<Arc<Device>> {
        let device = {
            let mut devices = self.devices.lock().ok()?;
            if devices.values().any(|existing| existing.name() == name) {
                return None;
            }
            let device = Device::new(
                name,
                kind,
                Arc::clone(&self.context),
                self.default_sample_capacity,
            );
            devices.insert(device.id(), Arc::clone(&device));
            device
        };
        debug!(device = name, id = device.id(), "device added");
        self.notify(&device, true);
        Some(device)
    }

    /// Unregisters a device and notifies listeners. The device object
    /// stays alive for as long as anyone holds an `Arc` to it.
    pub fn remove_device(&self, id: u64) -> bool {
        let removed = match self.devices.lock() {
            Ok(mut devices) => devices.remove(&id),
            Err(_) => None,
        };
        match removed {
            Some(device) => {
                debug!(device = device.name(), id, "device removed");
                self.notify(&device, false);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn device(&self, name: &str) -> Option<Arc<Device>> {
        self.devices
            .lock()
            .ok()?
            .values()
            .find(|device| device.name() == name)
            .cloned()
    }

    #[must_use]
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices
            .lock()
            .map(|devices| devices.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Registers a device-changed listener; returns its id for removal.
    pub fn observe<F>(&self, callback: F) -> u64
    where
        F: Fn(&Arc<Device>, bool) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .map(|mut listeners| listeners.subscribe(Arc::new(callback)))
            .unwrap_or(0)
    }

    pub fn unobserve(&self, listener_id: u64) -> bool {
        self.listeners
            .lock()
            .map(|mut listeners| listeners.unsubscribe(listener_id))
            .unwrap_or(false)
    }

    fn notify(&self, device: &Arc<Device>, added: bool) {
        let listeners = match self.listeners.lock() {
            Ok(listeners) => listeners.snapshot(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(device, added);
        }
    }
}
