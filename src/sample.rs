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

use nalgebra::{UnitQuaternion, Vector3};

use crate::element::SceneElement;
use crate::ids::ObjectId;

/// Event time in seconds, totally ordered via `f64::total_cmp` so it can
/// key an ordered map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamp(f64);

impl Timestamp {
    #[must_use]
    pub fn new(seconds: f64) -> Self {
        Self(seconds)
    }

    #[must_use]
    pub fn seconds(self) -> f64 {
        self.0
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl From<f64> for Timestamp {
    fn from(seconds: f64) -> Self {
        Self(seconds)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}s", self.0)
    }
}

/// Typed metadata value attached to a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Buffer(Vec<u8>),
}

/// Per-sample metadata. Key order is irrelevant to consumers; a `BTreeMap`
/// keeps the encoded form deterministic.
pub type Metadata = BTreeMap<String, Value>;

/// Whether transformations map device space into object space or the
/// reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceSystem {
    #[default]
    ObjectInDevice,
    DeviceInObject,
}

impl ReferenceSystem {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ObjectInDevice => "OBJECT_IN_DEVICE",
            Self::DeviceInObject => "DEVICE_IN_OBJECT",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OBJECT_IN_DEVICE" => Some(Self::ObjectInDevice),
            "DEVICE_IN_OBJECT" => Some(Self::DeviceInObject),
            _ => None,
        }
    }
}

/// A single GNSS fix. Fields the receiver could not determine carry the
/// sentinel from [`GpsLocation::unknown`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f32,
    pub direction: f32,
    pub speed: f32,
    pub accuracy: f32,
    pub altitude_accuracy: f32,
    pub direction_accuracy: f32,
    pub speed_accuracy: f32,
}

impl GpsLocation {
    /// A fix with every field marked unknown.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            latitude: f64::MIN,
            longitude: f64::MIN,
            altitude: f32::MIN,
            direction: -1.0,
            speed: -1.0,
            accuracy: -1.0,
            altitude_accuracy: -1.0,
            direction_accuracy: -1.0,
            speed_accuracy: -1.0,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Discriminant of a [`SamplePayload`], used for dispatch and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SampleKind {
    Orientation,
    Position,
    Pose,
    Scene,
    Gps,
}

impl SampleKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Orientation => "orientation",
            Self::Position => "position",
            Self::Pose => "pose",
            Self::Scene => "scene",
            Self::Gps => "gps",
        }
    }
}

/// Measurement data of one sample, one entry per tracked object.
///
/// Capabilities are expressed as one flat tagged variant instead of an
/// inheritance lattice; consumers dispatch on the most specific data they
/// can use via [`SamplePayload::positions`] / [`SamplePayload::orientations`].
/// Every array has exactly one entry per object id of the owning sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplePayload {
    Orientation {
        orientations: Vec<UnitQuaternion<f64>>,
    },
    Position {
        positions: Vec<Vector3<f64>>,
    },
    Pose {
        orientations: Vec<UnitQuaternion<f64>>,
        positions: Vec<Vector3<f64>>,
    },
    Scene {
        orientations: Vec<UnitQuaternion<f64>>,
        positions: Vec<Vector3<f64>>,
        /// One optional scene-element slot per tracked object.
        elements: Vec<Option<SceneElement>>,
    },
    Gps {
        locations: Vec<GpsLocation>,
    },
}

impl SamplePayload {
    #[must_use]
    pub fn kind(&self) -> SampleKind {
        match self {
            Self::Orientation { .. } => SampleKind::Orientation,
            Self::Position { .. } => SampleKind::Position,
            Self::Pose { .. } => SampleKind::Pose,
            Self::Scene { .. } => SampleKind::Scene,
            Self::Gps { .. } => SampleKind::Gps,
        }
    }

    /// Number of per-object entries carried by this payload.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Orientation { orientations } => orientations.len(),
            Self::Position { positions } => positions.len(),
            Self::Pose { positions, .. } | Self::Scene { positions, .. } => positions.len(),
            Self::Gps { locations } => locations.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Internal length consistency across the payload's arrays.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self {
            Self::Orientation { .. } | Self::Position { .. } | Self::Gps { .. } => true,
            Self::Pose {
                orientations,
                positions,
            } => orientations.len() == positions.len(),
            Self::Scene {
                orientations,
                positions,
                elements,
            } => orientations.len() == positions.len() && positions.len() == elements.len(),
        }
    }

    #[must_use]
    pub fn orientations(&self) -> Option<&[UnitQuaternion<f64>]> {
        match self {
            Self::Orientation { orientations }
            | Self::Pose { orientations, .. }
            | Self::Scene { orientations, .. } => Some(orientations),
            _ => None,
        }
    }

    #[must_use]
    pub fn positions(&self) -> Option<&[Vector3<f64>]> {
        match self {
            Self::Position { positions }
            | Self::Pose { positions, .. }
            | Self::Scene { positions, .. } => Some(positions),
            _ => None,
        }
    }

    #[must_use]
    pub fn elements(&self) -> Option<&[Option<SceneElement>]> {
        match self {
            Self::Scene { elements, .. } => Some(elements),
            _ => None,
        }
    }

    #[must_use]
    pub fn locations(&self) -> Option<&[GpsLocation]> {
        match self {
            Self::Gps { locations } => Some(locations),
            _ => None,
        }
    }
}

/// One timestamped measurement covering a set of tracked objects.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: Timestamp,
    pub reference_system: ReferenceSystem,
    /// Object covered by entry `i` of every payload array.
    pub object_ids: Vec<ObjectId>,
    pub metadata: Metadata,
    pub payload: SamplePayload,
}

impl Sample {
    /// Builds a sample. The payload must carry exactly one entry per object
    /// id and be internally consistent; a violation yields `None` and the
    /// sample store is left untouched.
    #[must_use]
    pub fn new(
        timestamp: Timestamp,
        reference_system: ReferenceSystem,
        object_ids: Vec<ObjectId>,
        metadata: Metadata,
        payload: SamplePayload,
    ) -> Option<Self> {
        if !payload.is_consistent() || payload.len() != object_ids.len() {
            return None;
        }
        Some(Self {
            timestamp,
            reference_system,
            object_ids,
            metadata,
            payload,
        })
    }

    #[must_use]
    pub fn kind(&self) -> SampleKind {
        self.payload.kind()
    }
}
