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

//! trackrec: per-device sample stores with temporal interpolation, RAII
//! publish/subscribe for sample and object found/lost events, and a
//! background recorder that serializes samples, scene geometry and camera
//! frames into a tagged, versioned binary format.

pub mod codec;
pub mod config;
pub mod device;
pub mod element;
pub mod error;
pub mod ids;
pub mod interpolate;
pub mod recorder;
pub mod sample;
pub mod store;
pub mod subscription;

pub use config::{ConfigLoader, LoggingConfig, StoreConfig, TrackrecConfig};
pub use device::{Device, DeviceKind, DeviceMajor, DeviceManager, DeviceMinor};
pub use element::SceneElement;
pub use error::CodecError;
pub use ids::{ObjectDescriptionMap, ObjectId, ObjectMapper, TrackingContext};
pub use interpolate::LookupStrategy;
pub use recorder::{DeviceRecorder, FrameSource, RecordSink, RecorderState, VideoFrame};
pub use sample::{
    GpsLocation, Metadata, ReferenceSystem, Sample, SampleKind, SamplePayload, Timestamp, Value,
};
pub use store::SampleStore;
pub use subscription::{ObjectEventSubscription, SampleSubscription, SubscriptionRegistry};
