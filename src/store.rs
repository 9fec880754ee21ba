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

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use tracing::trace;

use crate::interpolate::{self, LookupStrategy};
use crate::sample::{Sample, Timestamp};

/// Default number of retained samples per device.
pub const DEFAULT_CAPACITY: usize = 30;

/// Smallest permitted capacity; two samples are needed to bracket a query.
pub const MIN_CAPACITY: usize = 2;

/// Bounded, timestamp-ordered buffer of the most recent samples of one
/// device.
///
/// Inserting beyond capacity evicts the oldest sample. A second sample
/// with an existing timestamp replaces the first. Lookups never fail once
/// at least one sample is stored: queries outside the retained window fall
/// back to the nearest boundary sample.
#[derive(Debug)]
pub struct SampleStore {
    capacity: usize,
    samples: BTreeMap<Timestamp, Arc<Sample>>,
}

impl SampleStore {
    /// Creates a store holding up to `capacity` samples; values below
    /// [`MIN_CAPACITY`] are raised to it.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(MIN_CAPACITY),
            samples: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity, evicting oldest samples if shrinking. Returns
    /// `false` (leaving the store untouched) for capacities below
    /// [`MIN_CAPACITY`].
    pub fn set_capacity(&mut self, capacity: usize) -> bool {
        if capacity < MIN_CAPACITY {
            return false;
        }
        self.capacity = capacity;
        while self.samples.len() > self.capacity {
            self.samples.pop_first();
        }
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Oldest and newest retained timestamps.
    #[must_use]
    pub fn timestamp_range(&self) -> Option<(Timestamp, Timestamp)> {
        let oldest = self.samples.keys().next()?;
        let newest = self.samples.keys().next_back()?;
        Some((*oldest, *newest))
    }

    /// Inserts a sample, evicting the oldest one when full.
    pub fn insert(&mut self, sample: Arc<Sample>) {
        self.samples.insert(sample.timestamp, sample);
        while self.samples.len() > self.capacity {
            if let Some((evicted, _)) = self.samples.pop_first() {
                trace!(timestamp = evicted.seconds(), "evicting oldest sample");
            }
        }
    }

    /// Most recently timestamped sample, if any.
    #[must_use]
    pub fn most_recent(&self) -> Option<Arc<Sample>> {
        self.samples.values().next_back().cloned()
    }

    /// Sample stored exactly at `timestamp`, falling back to the most
    /// recent sample on a miss.
    #[must_use]
    pub fn at(&self, timestamp: Timestamp) -> Option<Arc<Sample>> {
        self.samples
            .get(&timestamp)
            .cloned()
            .or_else(|| self.most_recent())
    }

    /// Sample near `timestamp`, resolved per `strategy`.
    ///
    /// Queries past the newest sample return the newest; queries before the
    /// oldest return the oldest. In between, the two bracketing samples are
    /// reduced to one per the strategy (nearest ties favour the past).
    #[must_use]
    pub fn near(&self, timestamp: Timestamp, strategy: LookupStrategy) -> Option<Arc<Sample>> {
        let upper = self
            .samples
            .range((Bound::Excluded(timestamp), Bound::Unbounded))
            .next()
            .map(|(_, sample)| sample);
        let lower = self
            .samples
            .range((Bound::Unbounded, Bound::Included(timestamp)))
            .next_back()
            .map(|(_, sample)| sample);

        match (lower, upper) {
            (None, None) => None,
            (Some(lower), None) => Some(lower.clone()),
            (None, Some(upper)) => Some(upper.clone()),
            (Some(lower), Some(upper)) => {
                if lower.timestamp == timestamp {
                    return Some(lower.clone());
                }
                Some(interpolate::resolve(lower, upper, timestamp, strategy))
            }
        }
    }
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
