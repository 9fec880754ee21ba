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

use std::sync::{Arc, Mutex};
use std::time::Duration;

use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use trackrec::codec::{
    read_configuration_record, read_frame_record, read_sample_record, TAG_CONFIGURATION_RECORD,
    TAG_FRAME_RECORD, TAG_SAMPLE_RECORD,
};
use trackrec::device::{Device, DeviceKind, DeviceMinor};
use trackrec::element::{CameraCalibration, Image, PixelFormat, PixelOrigin};
use trackrec::recorder::{DeviceRecorder, FrameSource, RecordSink, RecorderState, VideoFrame};
use trackrec::sample::{Metadata, ReferenceSystem, Sample, SamplePayload, Timestamp};
use trackrec::{DeviceManager, ObjectId};

#[derive(Clone, Default)]
struct MemorySink {
    records: Arc<Mutex<Vec<Vec<u8>>>>,
    backlog: u64,
}

impl MemorySink {
    fn with_backlog(backlog: u64) -> Self {
        Self {
            records: Arc::default(),
            backlog,
        }
    }

    fn records(&self) -> Vec<Vec<u8>> {
        self.records.lock().unwrap().clone()
    }

    fn records_with_tag(&self, tag: u64) -> Vec<Vec<u8>> {
        self.records()
            .into_iter()
            .filter(|record| record.len() >= 8 && record[..8] == tag.to_le_bytes())
            .collect()
    }
}

impl RecordSink for MemorySink {
    fn write_record(&mut self, record: Vec<u8>) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    fn queued_bytes(&self) -> u64 {
        self.backlog
    }
}

struct StaticCamera {
    id: u64,
    timestamp: Timestamp,
}

impl FrameSource for StaticCamera {
    fn id(&self) -> u64 {
        self.id
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        Some(VideoFrame {
            timestamp: self.timestamp,
            image: Image {
                width: 2,
                height: 2,
                format: PixelFormat::U8,
                origin: PixelOrigin::UpperLeft,
                data: vec![1, 2, 3, 4],
            },
            calibration: CameraCalibration {
                model: "pinhole".to_string(),
                width: 2,
                height: 2,
                parameters: vec![1.0, 1.0, 1.0, 1.0],
                device_from_camera: Matrix4::<f64>::identity().as_slice().to_vec(),
            },
        })
    }
}

fn pose_sample(seconds: f64) -> Arc<Sample> {
    Arc::new(
        Sample::new(
            Timestamp::new(seconds),
            ReferenceSystem::default(),
            vec![ObjectId(0)],
            Metadata::new(),
            SamplePayload::Pose {
                orientations: vec![UnitQuaternion::identity()],
                positions: vec![Vector3::new(seconds, 0.0, 0.0)],
            },
        )
        .unwrap(),
    )
}

fn tracker(manager: &DeviceManager, name: &str) -> Arc<Device> {
    manager
        .add_device(name, DeviceKind::tracker(DeviceMinor::Tracker6Dof))
        .unwrap()
}

#[test]
fn test_samples_recorded_with_header_first() {
    let manager = Arc::new(DeviceManager::new(64));
    let device = tracker(&manager, "headset");
    let recorder = DeviceRecorder::new(&manager);
    let sink = MemorySink::default();

    assert!(recorder.start(Box::new(sink.clone())));
    for t in 0..30 {
        device.post(pose_sample(f64::from(t)));
    }
    recorder.stop();

    let records = sink.records();
    assert!(!records.is_empty());
    // The first record of the device is its header.
    let header = read_configuration_record(&records[0]).unwrap();
    assert_eq!(header.device_name, "headset");
    assert_eq!(header.device_major, "TRACKER");
    assert_eq!(header.device_minor, "TRACKER_6DOF");

    let data = sink.records_with_tag(TAG_SAMPLE_RECORD);
    assert_eq!(data.len(), 30, "every posted sample must be recorded");
    let first = read_sample_record(&data[0]).unwrap();
    assert_eq!(first.device_id, device.id());
    assert_eq!(first.timestamp, Timestamp::new(0.0));
}

#[test]
fn test_header_written_once_per_device() {
    let manager = Arc::new(DeviceManager::new(64));
    let first = tracker(&manager, "first");
    let second = tracker(&manager, "second");
    let recorder = DeviceRecorder::new(&manager);
    let sink = MemorySink::default();

    assert!(recorder.start(Box::new(sink.clone())));
    for t in 0..25 {
        first.post(pose_sample(f64::from(t)));
        second.post(pose_sample(f64::from(t)));
    }
    recorder.stop();

    let headers = sink.records_with_tag(TAG_CONFIGURATION_RECORD);
    assert_eq!(headers.len(), 2);
    let names: Vec<String> = headers
        .iter()
        .map(|record| read_configuration_record(record).unwrap().device_name)
        .collect();
    assert!(names.contains(&"first".to_string()));
    assert!(names.contains(&"second".to_string()));
}

#[test]
fn test_stop_flushes_partial_batch() {
    let manager = Arc::new(DeviceManager::new(64));
    let device = tracker(&manager, "sparse");
    let recorder = DeviceRecorder::new(&manager);
    let sink = MemorySink::default();

    assert!(recorder.start(Box::new(sink.clone())));
    // Fewer samples than one batch.
    for t in 0..3 {
        device.post(pose_sample(f64::from(t)));
    }
    recorder.stop();

    assert_eq!(sink.records_with_tag(TAG_SAMPLE_RECORD).len(), 3);
}

#[test]
fn test_found_lost_events_are_recorded() {
    let manager = Arc::new(DeviceManager::new(64));
    let device = tracker(&manager, "objects");
    let recorder = DeviceRecorder::new(&manager);
    let sink = MemorySink::default();

    assert!(recorder.start(Box::new(sink.clone())));
    device.update_tracked_objects([ObjectId(1), ObjectId(2)].into(), Timestamp::new(1.0));
    device.update_tracked_objects([ObjectId(2)].into(), Timestamp::new(2.0));
    recorder.stop();

    let data: Vec<_> = sink
        .records_with_tag(TAG_SAMPLE_RECORD)
        .iter()
        .map(|record| read_sample_record(record).unwrap())
        .collect();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0].found, vec![ObjectId(1), ObjectId(2)]);
    assert!(data[0].lost.is_empty());
    assert!(data[1].found.is_empty());
    assert_eq!(data[1].lost, vec![ObjectId(1)]);
}

#[test]
fn test_nothing_recorded_while_stopped() {
    let manager = Arc::new(DeviceManager::new(64));
    let device = tracker(&manager, "idle");
    let recorder = DeviceRecorder::new(&manager);
    let sink = MemorySink::default();

    device.post(pose_sample(1.0));
    assert!(recorder.start(Box::new(sink.clone())));
    recorder.stop();
    device.post(pose_sample(2.0));

    assert!(sink.records_with_tag(TAG_SAMPLE_RECORD).is_empty());
}

#[test]
fn test_start_is_idempotent_and_stop_is_safe_twice() {
    let manager = Arc::new(DeviceManager::new(64));
    let recorder = DeviceRecorder::new(&manager);

    assert_eq!(recorder.state(), RecorderState::Stopped);
    assert!(recorder.start(Box::new(MemorySink::default())));
    assert!(recorder.start(Box::new(MemorySink::default())));
    assert_eq!(recorder.state(), RecorderState::Running);
    recorder.stop();
    recorder.stop();
    assert_eq!(recorder.state(), RecorderState::Stopped);
}

#[test]
fn test_device_added_while_recording_is_captured() {
    let manager = Arc::new(DeviceManager::new(64));
    let recorder = DeviceRecorder::new(&manager);
    let sink = MemorySink::default();

    assert!(recorder.start(Box::new(sink.clone())));
    let late = tracker(&manager, "latecomer");
    for t in 0..30 {
        late.post(pose_sample(f64::from(t)));
    }
    recorder.stop();

    assert_eq!(sink.records_with_tag(TAG_SAMPLE_RECORD).len(), 30);
}

#[test]
fn test_removed_device_is_drained_then_ignored() {
    let manager = Arc::new(DeviceManager::new(64));
    let device = tracker(&manager, "leaving");
    let recorder = DeviceRecorder::new(&manager);
    let sink = MemorySink::default();

    assert!(recorder.start(Box::new(sink.clone())));
    for t in 0..30 {
        device.post(pose_sample(f64::from(t)));
    }
    // Removal drains the pending entries synchronously.
    assert!(manager.remove_device(device.id()));

    // The device object is still alive but detached; nothing new lands.
    device.post(pose_sample(99.0));
    recorder.stop();
    assert_eq!(sink.records_with_tag(TAG_SAMPLE_RECORD).len(), 30);
}

#[test]
fn test_frames_recorded_once_per_timestamp() {
    let manager = Arc::new(DeviceManager::new(64));
    let recorder = DeviceRecorder::new(&manager);
    let sink = MemorySink::default();

    recorder.register_frame_source(Arc::new(StaticCamera {
        id: 42,
        timestamp: Timestamp::new(1.0),
    }));
    assert!(recorder.start(Box::new(sink.clone())));
    std::thread::sleep(Duration::from_millis(100));
    recorder.stop();

    let frames = sink.records_with_tag(TAG_FRAME_RECORD);
    assert_eq!(frames.len(), 1, "unchanged frame must be recorded once");
    let frame = read_frame_record(&frames[0]).unwrap();
    assert_eq!(frame.source_id, 42);
    assert_eq!(frame.image.data, vec![1, 2, 3, 4]);
}

#[test]
fn test_backpressure_drops_frames_never_samples() {
    let manager = Arc::new(DeviceManager::new(64));
    let device = tracker(&manager, "pressured");
    let recorder = DeviceRecorder::new(&manager);
    // Sink reports a backlog far beyond the limit.
    let sink = MemorySink::with_backlog(u64::MAX);

    recorder.register_frame_source(Arc::new(StaticCamera {
        id: 7,
        timestamp: Timestamp::new(1.0),
    }));
    assert!(recorder.start(Box::new(sink.clone())));
    for t in 0..30 {
        device.post(pose_sample(f64::from(t)));
    }
    std::thread::sleep(Duration::from_millis(50));
    recorder.stop();

    assert!(sink.records_with_tag(TAG_FRAME_RECORD).is_empty());
    assert!(recorder.dropped_frames() >= 1);
    assert_eq!(
        sink.records_with_tag(TAG_SAMPLE_RECORD).len(),
        30,
        "samples are never shed"
    );
}

struct SlowSink {
    records: Arc<Mutex<Vec<Vec<u8>>>>,
    delay: Duration,
}

impl RecordSink for SlowSink {
    fn write_record(&mut self, record: Vec<u8>) -> anyhow::Result<()> {
        std::thread::sleep(self.delay);
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

#[test]
fn test_stop_returns_promptly_with_slow_sink() {
    let manager = Arc::new(DeviceManager::new(64));
    let device = tracker(&manager, "slow");
    let recorder = DeviceRecorder::new(&manager);
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = SlowSink {
        records: Arc::clone(&records),
        delay: Duration::from_millis(20),
    };

    assert!(recorder.start(Box::new(sink)));
    for t in 0..40 {
        device.post(pose_sample(f64::from(t)));
    }
    let started = std::time::Instant::now();
    recorder.stop();
    // The drain (40 records at 20 ms) fits inside the watchdog window;
    // stop() must come back within it rather than block on the sink.
    assert!(started.elapsed() < trackrec::recorder::DRAIN_TIMEOUT);
    assert_eq!(recorder.state(), RecorderState::Stopped);
    assert_eq!(
        records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.len() >= 8 && record[..8] == TAG_SAMPLE_RECORD.to_le_bytes())
            .count(),
        40
    );
}

#[test]
fn test_unregistering_frame_source() {
    let manager = Arc::new(DeviceManager::new(64));
    let recorder = DeviceRecorder::new(&manager);
    recorder.register_frame_source(Arc::new(StaticCamera {
        id: 9,
        timestamp: Timestamp::new(0.0),
    }));
    assert!(recorder.unregister_frame_source(9));
    assert!(!recorder.unregister_frame_source(9));
}
