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

//! Temporal resolution of a query timestamp against two bracketing
//! samples: snap to the nearer one, or synthesize an interpolated sample.

use std::sync::Arc;

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::sample::{Metadata, Sample, SamplePayload, Timestamp};

/// How a between-samples query is reduced to a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupStrategy {
    /// Return the stored sample whose timestamp is closest to the query;
    /// ties favour the past.
    Nearest,
    /// Synthesize a sample at the query timestamp by interpolating the two
    /// bracketing samples.
    #[default]
    Interpolate,
}

/// Reduces a bracketed query to one sample per `strategy`. The caller
/// guarantees `lower.timestamp < query < upper.timestamp`.
pub(crate) fn resolve(
    lower: &Arc<Sample>,
    upper: &Arc<Sample>,
    query: Timestamp,
    strategy: LookupStrategy,
) -> Arc<Sample> {
    match strategy {
        LookupStrategy::Nearest => nearest(lower, upper, query),
        LookupStrategy::Interpolate => interpolate(lower, upper, query),
    }
}

/// The bracketing sample nearer to `query`; ties favour `lower`.
#[must_use]
pub fn nearest(lower: &Arc<Sample>, upper: &Arc<Sample>, query: Timestamp) -> Arc<Sample> {
    let to_lower = query.seconds() - lower.timestamp.seconds();
    let to_upper = upper.timestamp.seconds() - query.seconds();
    if to_lower <= to_upper {
        Arc::clone(lower)
    } else {
        Arc::clone(upper)
    }
}

/// Synthesizes a sample at `query` between two bracketing samples.
///
/// Positions interpolate componentwise, orientations via quaternion slerp.
/// The payload pair dispatches on the most specific capability both sides
/// share: full pose, then position-only, then orientation-only. Pairs
/// without a shared interpolable capability (such as two GPS samples)
/// fall back to the older bracketing sample. Pairs tracking different
/// object sets and pairs with differing reference systems fall back to
/// the nearer bracketing sample. Scene elements are never interpolated;
/// two scene samples yield a plain pose sample.
#[must_use]
pub fn interpolate(lower: &Arc<Sample>, upper: &Arc<Sample>, query: Timestamp) -> Arc<Sample> {
    if lower.object_ids != upper.object_ids
        || lower.reference_system != upper.reference_system
    {
        return nearest(lower, upper, query);
    }

    let span = upper.timestamp.seconds() - lower.timestamp.seconds();
    if span <= 0.0 {
        return Arc::clone(lower);
    }
    let factor = (query.seconds() - lower.timestamp.seconds()) / span;

    let positions = match (lower.payload.positions(), upper.payload.positions()) {
        (Some(a), Some(b)) if a.len() == b.len() => Some(lerp_positions(a, b, factor)),
        _ => None,
    };
    let orientations = match (lower.payload.orientations(), upper.payload.orientations()) {
        (Some(a), Some(b)) if a.len() == b.len() => Some(slerp_orientations(a, b, factor)),
        _ => None,
    };

    let payload = match (orientations, positions) {
        (Some(orientations), Some(positions)) => SamplePayload::Pose {
            orientations,
            positions,
        },
        (None, Some(positions)) => SamplePayload::Position { positions },
        (Some(orientations), None) => SamplePayload::Orientation { orientations },
        // Nothing interpolable on either side; keep the older sample.
        (None, None) => return Arc::clone(lower),
    };

    match Sample::new(
        query,
        lower.reference_system,
        lower.object_ids.clone(),
        Metadata::new(),
        payload,
    ) {
        Some(sample) => Arc::new(sample),
        None => Arc::clone(lower),
    }
}

fn lerp_positions(a: &[Vector3<f64>], b: &[Vector3<f64>], factor: f64) -> Vec<Vector3<f64>> {
    a.iter()
        .zip(b)
        .map(|(from, to)| from + (to - from) * factor)
        .collect()
}

fn slerp_orientations(
    a: &[UnitQuaternion<f64>],
    b: &[UnitQuaternion<f64>],
    factor: f64,
) -> Vec<UnitQuaternion<f64>> {
    a.iter()
        .zip(b)
        .map(|(from, to)| from.slerp(to, factor))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ObjectId;
    use crate::sample::ReferenceSystem;
    use std::f64::consts::FRAC_PI_2;

    fn pose_sample(seconds: f64, x: f64, yaw: f64) -> Arc<Sample> {
        Arc::new(
            Sample::new(
                Timestamp::new(seconds),
                ReferenceSystem::default(),
                vec![ObjectId(0)],
                Metadata::new(),
                SamplePayload::Pose {
                    orientations: vec![UnitQuaternion::from_euler_angles(0.0, 0.0, yaw)],
                    positions: vec![Vector3::new(x, 0.0, 0.0)],
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn midpoint_pose_interpolation() {
        let lower = pose_sample(4.0, 0.0, 0.0);
        let upper = pose_sample(6.0, 10.0, FRAC_PI_2);
        let mid = interpolate(&lower, &upper, Timestamp::new(5.0));
        assert_eq!(mid.timestamp, Timestamp::new(5.0));
        let positions = mid.payload.positions().unwrap();
        assert!((positions[0].x - 5.0).abs() < 1e-12);
        let (_, _, yaw) = mid.payload.orientations().unwrap()[0].euler_angles();
        assert!((yaw - FRAC_PI_2 / 2.0).abs() < 1e-9);
    }

    #[test]
    fn nearest_tie_favours_past() {
        let lower = pose_sample(1.0, 0.0, 0.0);
        let upper = pose_sample(3.0, 1.0, 0.0);
        let picked = nearest(&lower, &upper, Timestamp::new(2.0));
        assert_eq!(picked.timestamp, Timestamp::new(1.0));
    }

    #[test]
    fn mismatched_object_sets_fall_back_to_nearer() {
        let lower = pose_sample(1.0, 0.0, 0.0);
        let upper = Arc::new(
            Sample::new(
                Timestamp::new(2.0),
                ReferenceSystem::default(),
                vec![ObjectId(7)],
                Metadata::new(),
                SamplePayload::Pose {
                    orientations: vec![UnitQuaternion::identity()],
                    positions: vec![Vector3::zeros()],
                },
            )
            .unwrap(),
        );
        let picked = interpolate(&lower, &upper, Timestamp::new(1.9));
        assert_eq!(picked.timestamp, Timestamp::new(2.0));
    }

    #[test]
    fn gps_pairs_fall_back_to_older() {
        let make = |seconds: f64| {
            Arc::new(
                Sample::new(
                    Timestamp::new(seconds),
                    ReferenceSystem::default(),
                    vec![ObjectId(0)],
                    Metadata::new(),
                    SamplePayload::Gps {
                        locations: vec![crate::sample::GpsLocation::unknown()],
                    },
                )
                .unwrap(),
            )
        };
        let lower = make(1.0);
        let upper = make(2.0);
        // Even a query right next to the newer sample keeps the older one.
        let picked = interpolate(&lower, &upper, Timestamp::new(1.9));
        assert_eq!(picked.timestamp, Timestamp::new(1.0));
        let picked = interpolate(&lower, &upper, Timestamp::new(1.2));
        assert_eq!(picked.timestamp, Timestamp::new(1.0));
    }

    #[test]
    fn scene_pair_yields_plain_pose() {
        let scene = |seconds: f64, x: f64| {
            Arc::new(
                Sample::new(
                    Timestamp::new(seconds),
                    ReferenceSystem::default(),
                    vec![ObjectId(0)],
                    Metadata::new(),
                    SamplePayload::Scene {
                        orientations: vec![UnitQuaternion::identity()],
                        positions: vec![Vector3::new(x, 0.0, 0.0)],
                        elements: vec![None],
                    },
                )
                .unwrap(),
            )
        };
        let mid = interpolate(&scene(0.0, 0.0), &scene(1.0, 2.0), Timestamp::new(0.5));
        assert_eq!(mid.kind(), crate::sample::SampleKind::Pose);
        assert!((mid.payload.positions().unwrap()[0].x - 1.0).abs() < 1e-12);
    }
}
