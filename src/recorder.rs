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

//! Background recording pipeline.
//!
//! Producers (device callbacks) append entries to a small unqueued buffer
//! under its own lock and move it into the shared batch queue every
//! [`BATCH_FLUSH_THRESHOLD`] entries, so the per-sample cost stays at one
//! short lock. A dedicated writer thread pops batches, lazily creates one
//! recordable per device (header record first) and serializes entries
//! through the codec into the sink. Live frame sources are scanned every
//! loop; a frame is dropped with a warning when the sink backlog exceeds
//! [`QUEUE_BYTE_LIMIT`]. Samples are never dropped.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use tracing::{debug, error, warn};

use crate::codec;
use crate::device::{Device, DeviceManager};
use crate::element::{CameraCalibration, Image};
use crate::ids::ObjectId;
use crate::sample::{Metadata, ReferenceSystem, Sample, SamplePayload, Timestamp};
use crate::subscription::{ObjectEventSubscription, SampleSubscription};

/// Producer-side entries buffered before one queue push.
pub const BATCH_FLUSH_THRESHOLD: usize = 20;

/// Sink backlog above which camera frames are dropped.
pub const QUEUE_BYTE_LIMIT: u64 = 512 * 1024 * 1024;

/// How long `stop()` and device removal wait for the queue to drain.
/// Once it elapses, queued records are abandoned so `stop()` still
/// returns.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const DRAIN_POLL: Duration = Duration::from_millis(1);
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Destination of encoded records.
///
/// Implementations report their queued backlog so the writer can shed
/// frame load; returning 0 disables frame dropping.
pub trait RecordSink: Send {
    fn write_record(&mut self, record: Vec<u8>) -> anyhow::Result<()>;

    fn queued_bytes(&self) -> u64 {
        0
    }
}

/// One camera frame handed out by a [`FrameSource`].
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub timestamp: Timestamp,
    pub image: Image,
    pub calibration: CameraCalibration,
}

/// A live camera polled by the writer thread. `latest_frame` returns the
/// current frame; the writer records it only when its timestamp differs
/// from the previously recorded one.
pub trait FrameSource: Send + Sync {
    fn id(&self) -> u64;

    fn latest_frame(&self) -> Option<VideoFrame>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// One queued unit of work: a posted sample or a found/lost transition.
struct SampleData {
    device: Weak<Device>,
    device_id: u64,
    sample: Option<Arc<Sample>>,
    found: BTreeSet<ObjectId>,
    lost: BTreeSet<ObjectId>,
    timestamp: Timestamp,
}

struct DeviceSubscriptions {
    _samples: SampleSubscription,
    _objects: ObjectEventSubscription,
}

struct Inner {
    state: Mutex<RecorderState>,
    unqueued: Mutex<Vec<SampleData>>,
    queue: SegQueue<Vec<SampleData>>,
    invalid_devices: Mutex<HashSet<u64>>,
    frame_sources: DashMap<u64, Arc<dyn FrameSource>>,
    subscriptions: Mutex<HashMap<u64, DeviceSubscriptions>>,
    stop_flag: AtomicBool,
    /// Set when the drain watchdog fired; the writer then exits without
    /// emptying the queue.
    force_stop: AtomicBool,
    dropped_frames: AtomicU64,
}

impl Inner {
    fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|state| *state == RecorderState::Running)
            .unwrap_or(false)
    }

    fn push_entry(&self, entry: SampleData) {
        let batch = {
            let Ok(mut unqueued) = self.unqueued.lock() else {
                return;
            };
            unqueued.push(entry);
            if unqueued.len() < BATCH_FLUSH_THRESHOLD {
                return;
            }
            std::mem::take(&mut *unqueued)
        };
        self.queue.push(batch);
    }

    fn flush_unqueued(&self) {
        let batch = {
            let Ok(mut unqueued) = self.unqueued.lock() else {
                return;
            };
            std::mem::take(&mut *unqueued)
        };
        if !batch.is_empty() {
            self.queue.push(batch);
        }
    }

    /// Flushes the producer buffer and waits for the writer to catch up.
    /// Returns `false` when the watchdog fired.
    fn drain(&self) -> bool {
        self.flush_unqueued();
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while !self.queue.is_empty() {
            if Instant::now() >= deadline {
                warn!("record queue failed to drain within {DRAIN_TIMEOUT:?}");
                debug_assert!(false, "record queue failed to drain");
                return false;
            }
            std::thread::sleep(DRAIN_POLL);
        }
        true
    }
}

/// Records every device of one manager into a [`RecordSink`].
///
/// The recorder observes the manager: devices added while recording start
/// being captured immediately, removed devices are drained synchronously
/// and then ignored. Device subscriptions are weak, so the recorder never
/// keeps a device alive.
pub struct DeviceRecorder {
    inner: Arc<Inner>,
    manager: Weak<DeviceManager>,
    listener_id: u64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceRecorder {
    #[must_use]
    pub fn new(manager: &Arc<DeviceManager>) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(RecorderState::Stopped),
            unqueued: Mutex::new(Vec::new()),
            queue: SegQueue::new(),
            invalid_devices: Mutex::new(HashSet::new()),
            frame_sources: DashMap::new(),
            subscriptions: Mutex::new(HashMap::new()),
            stop_flag: AtomicBool::new(false),
            force_stop: AtomicBool::new(false),
            dropped_frames: AtomicU64::new(0),
        });

        for device in manager.devices() {
            Self::attach(&inner, &device);
        }

        let listener_inner = Arc::downgrade(&inner);
        let listener_id = manager.observe(move |device, added| {
            let Some(inner) = listener_inner.upgrade() else {
                return;
            };
            if added {
                Self::attach(&inner, device);
            } else {
                Self::detach(&inner, device);
            }
        });

        Self {
            inner,
            manager: Arc::downgrade(manager),
            listener_id,
            thread: Mutex::new(None),
        }
    }

    fn attach(inner: &Arc<Inner>, device: &Arc<Device>) {
        let sample_inner = Arc::downgrade(inner);
        let mut samples = device.subscribe_samples(move |device, sample| {
            let Some(inner) = sample_inner.upgrade() else {
                return;
            };
            if !inner.is_running() {
                return;
            }
            inner.push_entry(SampleData {
                device: Arc::downgrade(device),
                device_id: device.id(),
                sample: Some(Arc::clone(sample)),
                found: BTreeSet::new(),
                lost: BTreeSet::new(),
                timestamp: sample.timestamp,
            });
        });
        samples.make_weak();

        let object_inner = Arc::downgrade(inner);
        let mut objects = device.subscribe_object_events(move |device, found, ids, timestamp| {
            let Some(inner) = object_inner.upgrade() else {
                return;
            };
            if !inner.is_running() {
                return;
            }
            let (found_ids, lost_ids) = if found {
                (ids.clone(), BTreeSet::new())
            } else {
                (BTreeSet::new(), ids.clone())
            };
            inner.push_entry(SampleData {
                device: Arc::downgrade(device),
                device_id: device.id(),
                sample: None,
                found: found_ids,
                lost: lost_ids,
                timestamp,
            });
        });
        objects.make_weak();

        if let Ok(mut subscriptions) = inner.subscriptions.lock() {
            subscriptions.insert(
                device.id(),
                DeviceSubscriptions {
                    _samples: samples,
                    _objects: objects,
                },
            );
        }
    }

    fn detach(inner: &Arc<Inner>, device: &Arc<Device>) {
        // Entries already queued for this device must reach the sink
        // before it disappears; later stragglers are skipped via the
        // invalid set.
        if inner.is_running() {
            inner.drain();
        }
        if let Ok(mut subscriptions) = inner.subscriptions.lock() {
            subscriptions.remove(&device.id());
        }
        if let Ok(mut invalid) = inner.invalid_devices.lock() {
            invalid.insert(device.id());
        }
        debug!(device = device.name(), "device detached from recorder");
    }

    #[must_use]
    pub fn state(&self) -> RecorderState {
        self.inner
            .state
            .lock()
            .map(|state| *state)
            .unwrap_or(RecorderState::Stopped)
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Running
    }

    /// Camera frames shed due to sink backpressure since the last start.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn register_frame_source(&self, source: Arc<dyn FrameSource>) {
        self.inner.frame_sources.insert(source.id(), source);
    }

    pub fn unregister_frame_source(&self, id: u64) -> bool {
        self.inner.frame_sources.remove(&id).is_some()
    }

    /// Starts the writer thread. Idempotent while running; returns
    /// `false` if a previous recording is still stopping.
    pub fn start(&self, sink: Box<dyn RecordSink>) -> bool {
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return false;
            };
            match *state {
                RecorderState::Running | RecorderState::Starting => return true,
                RecorderState::Stopping => return false,
                RecorderState::Stopped => *state = RecorderState::Starting,
            }
        }

        self.inner.stop_flag.store(false, Ordering::SeqCst);
        self.inner.force_stop.store(false, Ordering::SeqCst);
        self.inner.dropped_frames.store(0, Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("trackrec-writer".into())
            .spawn(move || writer_loop(&inner, sink));
        let handle = match handle {
            Ok(handle) => handle,
            Err(err) => {
                error!("failed to spawn writer thread: {err}");
                if let Ok(mut state) = self.inner.state.lock() {
                    *state = RecorderState::Stopped;
                }
                return false;
            }
        };
        if let Ok(mut thread) = self.thread.lock() {
            *thread = Some(handle);
        }
        if let Ok(mut state) = self.inner.state.lock() {
            *state = RecorderState::Running;
        }
        debug!("recording started");
        true
    }

    /// Flushes pending entries, waits for the queue to drain (watchdog:
    /// [`DRAIN_TIMEOUT`]) and joins the writer thread. If the watchdog
    /// fires, the remaining queued records are abandoned and the writer is
    /// told to exit after its current record, so the call still returns
    /// with a wedged sink.
    pub fn stop(&self) {
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            match *state {
                RecorderState::Stopped | RecorderState::Stopping => return,
                RecorderState::Starting | RecorderState::Running => {
                    *state = RecorderState::Stopping;
                }
            }
        }

        if !self.inner.drain() {
            warn!("abandoning queued records after drain timeout");
            self.inner.force_stop.store(true, Ordering::SeqCst);
        }
        self.inner.stop_flag.store(true, Ordering::SeqCst);

        let handle = self.thread.lock().ok().and_then(|mut thread| thread.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("writer thread panicked");
            }
        }

        if let Ok(mut invalid) = self.inner.invalid_devices.lock() {
            invalid.clear();
        }
        if let Ok(mut state) = self.inner.state.lock() {
            *state = RecorderState::Stopped;
        }
        debug!("recording stopped");
    }
}

impl Drop for DeviceRecorder {
    fn drop(&mut self) {
        self.stop();
        if let Some(manager) = self.manager.upgrade() {
            manager.unobserve(self.listener_id);
        }
        if let Ok(mut subscriptions) = self.inner.subscriptions.lock() {
            subscriptions.clear();
        }
    }
}

fn writer_loop(inner: &Arc<Inner>, mut sink: Box<dyn RecordSink>) {
    // Devices whose header record has been written this recording.
    let mut configured: HashSet<u64> = HashSet::new();
    let mut last_frame_timestamps: HashMap<u64, Timestamp> = HashMap::new();

    loop {
        if inner.stop_flag.load(Ordering::SeqCst)
            && (inner.queue.is_empty() || inner.force_stop.load(Ordering::SeqCst))
        {
            break;
        }

        let mut wrote = false;

        if let Some(batch) = inner.queue.pop() {
            for entry in batch {
                if inner.force_stop.load(Ordering::SeqCst) {
                    break;
                }
                if write_entry(inner, &mut configured, sink.as_mut(), &entry) {
                    wrote = true;
                }
            }
        }

        if record_frames(inner, sink.as_mut(), &mut last_frame_timestamps) {
            wrote = true;
        }

        if !wrote {
            std::thread::sleep(IDLE_SLEEP);
        }
    }
}

/// Serializes one queued entry. Returns `true` when a record reached the
/// sink.
fn write_entry(
    inner: &Inner,
    configured: &mut HashSet<u64>,
    sink: &mut dyn RecordSink,
    entry: &SampleData,
) -> bool {
    let invalid = inner
        .invalid_devices
        .lock()
        .map(|invalid| invalid.contains(&entry.device_id))
        .unwrap_or(false);
    if invalid {
        return false;
    }

    let device = entry.device.upgrade();

    if !configured.contains(&entry.device_id) {
        // The header record needs the device's name and kind; without a
        // live device the entry cannot be attributed and is skipped.
        let Some(device) = device.as_ref() else {
            return false;
        };
        let header = codec::write_configuration_record(
            device.name(),
            device.kind().major.as_str(),
            device.kind().minor.as_str(),
        );
        if let Err(err) = sink.write_record(header) {
            error!(device = device.name(), "failed to write header record: {err}");
            return false;
        }
        configured.insert(entry.device_id);
    }

    let descriptions = device
        .as_ref()
        .map(|device| device.description_snapshot())
        .unwrap_or_default();

    let record = match &entry.sample {
        Some(sample) => codec::write_sample_record(
            entry.device_id,
            sample,
            &entry.found,
            &entry.lost,
            &descriptions,
        ),
        // Found/lost transitions without a sample ride on a record with
        // an empty payload.
        None => {
            let Some(sample) = Sample::new(
                entry.timestamp,
                ReferenceSystem::default(),
                Vec::new(),
                Metadata::new(),
                SamplePayload::Pose {
                    orientations: Vec::new(),
                    positions: Vec::new(),
                },
            ) else {
                return false;
            };
            codec::write_sample_record(
                entry.device_id,
                &sample,
                &entry.found,
                &entry.lost,
                &descriptions,
            )
        }
    };

    match sink.write_record(record) {
        Ok(()) => true,
        Err(err) => {
            error!(device_id = entry.device_id, "failed to write data record: {err}");
            false
        }
    }
}

/// Scans frame sources for frames newer than the last recorded one.
/// Returns `true` when a frame reached the sink.
fn record_frames(
    inner: &Inner,
    sink: &mut dyn RecordSink,
    last_timestamps: &mut HashMap<u64, Timestamp>,
) -> bool {
    let mut wrote = false;
    for source in inner.frame_sources.iter() {
        let Some(frame) = source.latest_frame() else {
            continue;
        };
        if last_timestamps.get(&source.id()) == Some(&frame.timestamp) {
            continue;
        }
        last_timestamps.insert(source.id(), frame.timestamp);

        if sink.queued_bytes() >= QUEUE_BYTE_LIMIT {
            inner.dropped_frames.fetch_add(1, Ordering::Relaxed);
            warn!(
                source_id = source.id(),
                "sink backlog exceeds byte limit, dropping frame"
            );
            continue;
        }

        let record =
            match codec::write_frame_record(source.id(), frame.timestamp, &frame.image, &frame.calibration)
            {
                Ok(record) => record,
                Err(err) => {
                    error!(source_id = source.id(), "failed to encode frame: {err}");
                    continue;
                }
            };
        match sink.write_record(record) {
            Ok(()) => wrote = true,
            Err(err) => error!(source_id = source.id(), "failed to write frame record: {err}"),
        }
    }
    wrote
}
