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

use std::collections::BTreeSet;

use nalgebra::{Matrix4, UnitQuaternion, Vector2, Vector3};
use trackrec::codec::bitstream::{BitstreamReader, BitstreamWriter};
use trackrec::codec::{
    read_configuration_record, read_frame_record, read_sample_record, read_scene_elements,
    write_configuration_record, write_frame_record, write_sample_record, write_scene_elements,
};
use trackrec::element::{
    BoundingBox, CameraCalibration, DepthImage, Image, Mesh, PixelFormat, PixelOrigin, Plane,
    PlaneKind, SceneElement,
};
use trackrec::error::CodecError;
use trackrec::sample::{
    GpsLocation, Metadata, ReferenceSystem, Sample, SamplePayload, Timestamp, Value,
};
use trackrec::ObjectId;

const F32_TOLERANCE: f64 = 1e-6;

fn roundtrip_elements(elements: &[Option<SceneElement>]) -> Vec<Option<SceneElement>> {
    let mut writer = BitstreamWriter::new();
    write_scene_elements(&mut writer, elements);
    let bytes = writer.into_vec();
    read_scene_elements(&mut BitstreamReader::new(&bytes)).unwrap()
}

fn assert_vec3_close(a: &Vector3<f64>, b: &Vector3<f64>) {
    assert!((a - b).norm() < F32_TOLERANCE, "{a:?} != {b:?}");
}

fn calibration() -> CameraCalibration {
    CameraCalibration {
        model: "pinhole".to_string(),
        width: 640,
        height: 480,
        parameters: vec![525.0, 525.0, 320.0, 240.0],
        device_from_camera: Matrix4::<f64>::identity().as_slice().to_vec(),
    }
}

#[test]
fn test_plane_round_trip() {
    let plane = Plane {
        id: 7,
        kind: PlaneKind::Horizontal,
        world_from_plane: Matrix4::new_translation(&Vector3::new(1.0, 2.0, 3.0)),
        bounding_box: BoundingBox::new(Vector3::new(-1.0, 0.0, -1.0), Vector3::new(1.0, 0.0, 1.0)),
        vertices: vec![
            Vector3::new(-1.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::new(-1.0, 0.0, 1.0),
        ],
        texture_coordinates: vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(1.0, 1.0),
            Vector2::new(0.0, 1.0),
        ],
        triangle_indices: vec![0, 1, 2, 0, 2, 3],
        boundary_vertices: vec![Vector3::new(-1.0, 0.0, -1.0), Vector3::new(1.0, 0.0, 1.0)],
    };

    let decoded = roundtrip_elements(&[Some(SceneElement::Planes(vec![plane.clone()]))]);
    let Some(SceneElement::Planes(planes)) = &decoded[0] else {
        panic!("expected planes element");
    };
    assert_eq!(planes.len(), 1);
    let got = &planes[0];
    assert_eq!(got.id, 7);
    assert_eq!(got.kind, PlaneKind::Horizontal);
    assert_eq!(got.world_from_plane, plane.world_from_plane);
    assert_eq!(got.bounding_box, plane.bounding_box);
    assert_eq!(got.triangle_indices, plane.triangle_indices);
    assert_eq!(got.vertices.len(), 4);
    for (a, b) in got.vertices.iter().zip(&plane.vertices) {
        assert_vec3_close(a, b);
    }
}

#[test]
fn test_object_points_round_trip() {
    let element = SceneElement::ObjectPoints {
        points: vec![Vector3::new(0.25, -0.5, 1.75), Vector3::new(1.0, 2.0, 3.0)],
        point_ids: vec![11, 22],
    };
    let decoded = roundtrip_elements(&[Some(element)]);
    let Some(SceneElement::ObjectPoints { points, point_ids }) = &decoded[0] else {
        panic!("expected object points");
    };
    assert_eq!(point_ids, &vec![11, 22]);
    assert_vec3_close(&points[0], &Vector3::new(0.25, -0.5, 1.75));
}

#[test]
fn test_feature_correspondences_round_trip() {
    let element = SceneElement::FeatureCorrespondences {
        object_points: vec![Vector3::new(1.0, 2.0, 3.0)],
        image_points: vec![Vector2::new(320.5, 240.25)],
        point_ids: vec![],
    };
    let decoded = roundtrip_elements(&[Some(element)]);
    let Some(SceneElement::FeatureCorrespondences {
        object_points,
        image_points,
        point_ids,
    }) = &decoded[0]
    else {
        panic!("expected correspondences");
    };
    assert!(point_ids.is_empty());
    assert_vec3_close(&object_points[0], &Vector3::new(1.0, 2.0, 3.0));
    assert!((image_points[0] - Vector2::new(320.5, 240.25)).norm() < F32_TOLERANCE);
}

#[test]
fn test_mesh_round_trip() {
    let mesh = Mesh {
        id: 3,
        world_from_mesh: Matrix4::identity(),
        vertices: vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ],
        per_vertex_normals: vec![
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, 1.0),
        ],
        triangle_indices: vec![0, 1, 2],
    };
    let decoded = roundtrip_elements(&[Some(SceneElement::Meshes(vec![mesh]))]);
    let Some(SceneElement::Meshes(meshes)) = &decoded[0] else {
        panic!("expected meshes");
    };
    assert_eq!(meshes[0].id, 3);
    assert_eq!(meshes[0].triangle_indices, vec![0, 1, 2]);
    assert_eq!(meshes[0].per_vertex_normals.len(), 3);
}

#[test]
fn test_depth_round_trip_with_confidence() {
    let depth = DepthImage {
        calibration: calibration(),
        depth: Image {
            width: 4,
            height: 2,
            format: PixelFormat::F32,
            origin: PixelOrigin::UpperLeft,
            data: (0..32).collect(),
        },
        confidence: Some(Image {
            width: 4,
            height: 2,
            format: PixelFormat::U8,
            origin: PixelOrigin::UpperLeft,
            data: vec![255; 8],
        }),
    };
    let decoded = roundtrip_elements(&[Some(SceneElement::Depth(Box::new(depth.clone())))]);
    let Some(SceneElement::Depth(got)) = &decoded[0] else {
        panic!("expected depth");
    };
    assert_eq!(**got, depth);
}

#[test]
fn test_depth_round_trip_without_confidence() {
    let depth = DepthImage {
        calibration: calibration(),
        depth: Image {
            width: 2,
            height: 2,
            format: PixelFormat::U16,
            origin: PixelOrigin::LowerLeft,
            data: vec![7; 8],
        },
        confidence: None,
    };
    let decoded = roundtrip_elements(&[Some(SceneElement::Depth(Box::new(depth.clone())))]);
    let Some(SceneElement::Depth(got)) = &decoded[0] else {
        panic!("expected depth");
    };
    assert!(got.confidence.is_none());
    assert_eq!(got.depth, depth.depth);
}

#[test]
fn test_mixed_slots_round_trip() {
    let elements = vec![
        None,
        Some(SceneElement::ObjectPoints {
            points: vec![Vector3::new(1.0, 1.0, 1.0)],
            point_ids: vec![],
        }),
        None,
    ];
    let decoded = roundtrip_elements(&elements);
    assert_eq!(decoded.len(), 3);
    assert!(decoded[0].is_none());
    assert!(decoded[1].is_some());
    assert!(decoded[2].is_none());
}

#[test]
fn test_truncated_element_stream_fails() {
    let mut writer = BitstreamWriter::new();
    write_scene_elements(
        &mut writer,
        &[Some(SceneElement::ObjectPoints {
            points: vec![Vector3::new(1.0, 2.0, 3.0)],
            point_ids: vec![],
        })],
    );
    let bytes = writer.into_vec();
    let truncated = &bytes[..bytes.len() - 4];
    let err = read_scene_elements(&mut BitstreamReader::new(truncated)).unwrap_err();
    assert!(matches!(err, CodecError::Truncated));
}

#[test]
fn test_corrupt_triangle_count_fails() {
    let plane = Plane {
        id: 1,
        kind: PlaneKind::Vertical,
        world_from_plane: Matrix4::identity(),
        bounding_box: BoundingBox::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0)),
        vertices: vec![Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0)],
        texture_coordinates: vec![],
        triangle_indices: vec![],
        boundary_vertices: vec![],
    };
    let mut writer = BitstreamWriter::new();
    write_scene_elements(&mut writer, &[Some(SceneElement::Planes(vec![plane]))]);
    let mut bytes = writer.into_vec();
    // The trailing u32 is the boundary-vertex count; the triangle-index
    // count sits 8 bytes from the end. Patch it to 2, which is not
    // divisible by 3.
    let len = bytes.len();
    bytes[len - 8..len - 4].copy_from_slice(&2u32.to_le_bytes());
    let result = read_scene_elements(&mut BitstreamReader::new(&bytes));
    assert!(result.is_err());
}

#[test]
fn test_configuration_record_round_trip() {
    let record = write_configuration_record("world-tracker", "TRACKER", "SCENE_TRACKER_6DOF");
    let decoded = read_configuration_record(&record).unwrap();
    assert_eq!(decoded.device_name, "world-tracker");
    assert_eq!(decoded.device_major, "TRACKER");
    assert_eq!(decoded.device_minor, "SCENE_TRACKER_6DOF");
}

#[test]
fn test_pose_sample_record_round_trip() {
    let mut metadata = Metadata::new();
    metadata.insert("session".into(), Value::String("demo".into()));
    metadata.insert("frame".into(), Value::Int64(17));
    let sample = Sample::new(
        Timestamp::new(12.5),
        ReferenceSystem::DeviceInObject,
        vec![ObjectId(4), ObjectId(9)],
        metadata.clone(),
        SamplePayload::Pose {
            orientations: vec![
                UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
                UnitQuaternion::identity(),
            ],
            positions: vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(-1.0, 0.5, 0.25)],
        },
    )
    .unwrap();
    let found: BTreeSet<ObjectId> = [ObjectId(4)].into();
    let lost: BTreeSet<ObjectId> = [ObjectId(2)].into();
    let descriptions = vec![(ObjectId(4), "anchor".to_string())];

    let record = write_sample_record(77, &sample, &found, &lost, &descriptions);
    let decoded = read_sample_record(&record).unwrap();

    assert_eq!(decoded.device_id, 77);
    assert_eq!(decoded.timestamp, Timestamp::new(12.5));
    assert_eq!(decoded.reference_system, ReferenceSystem::DeviceInObject);
    assert_eq!(decoded.object_ids, vec![ObjectId(4), ObjectId(9)]);
    assert_eq!(decoded.metadata, metadata);
    assert_eq!(decoded.found, vec![ObjectId(4)]);
    assert_eq!(decoded.lost, vec![ObjectId(2)]);
    assert_eq!(decoded.descriptions, descriptions);

    let positions = decoded.payload.positions().unwrap();
    assert_vec3_close(&positions[0], &Vector3::new(1.0, 2.0, 3.0));
    let orientations = decoded.payload.orientations().unwrap();
    let expected = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
    assert!(orientations[0].angle_to(&expected) < 1e-3);
}

#[test]
fn test_gps_sample_record_round_trip() {
    let location = GpsLocation {
        latitude: 48.8584,
        longitude: 2.2945,
        altitude: 312.5,
        direction: 90.0,
        speed: 1.5,
        accuracy: 3.0,
        altitude_accuracy: 5.0,
        direction_accuracy: 10.0,
        speed_accuracy: 0.5,
    };
    let sample = Sample::new(
        Timestamp::new(1.0),
        ReferenceSystem::default(),
        vec![ObjectId(0)],
        Metadata::new(),
        SamplePayload::Gps {
            locations: vec![location],
        },
    )
    .unwrap();
    let record = write_sample_record(1, &sample, &BTreeSet::new(), &BTreeSet::new(), &[]);
    let decoded = read_sample_record(&record).unwrap();
    let got = decoded.payload.locations().unwrap()[0];
    assert_eq!(got.latitude, 48.8584);
    assert_eq!(got.longitude, 2.2945);
    assert_eq!(got.altitude, 312.5);
}

#[test]
fn test_scene_sample_record_round_trip() {
    let sample = Sample::new(
        Timestamp::new(3.0),
        ReferenceSystem::default(),
        vec![ObjectId(1)],
        Metadata::new(),
        SamplePayload::Scene {
            orientations: vec![UnitQuaternion::identity()],
            positions: vec![Vector3::new(0.5, 0.5, 0.5)],
            elements: vec![Some(SceneElement::ObjectPoints {
                points: vec![Vector3::new(2.0, 2.0, 2.0)],
                point_ids: vec![5],
            })],
        },
    )
    .unwrap();
    let record = write_sample_record(2, &sample, &BTreeSet::new(), &BTreeSet::new(), &[]);
    let decoded = read_sample_record(&record).unwrap();
    let elements = decoded.payload.elements().unwrap();
    assert_eq!(elements.len(), 1);
    assert!(matches!(
        elements[0],
        Some(SceneElement::ObjectPoints { .. })
    ));
}

#[test]
fn test_frame_record_round_trip() {
    let image = Image {
        width: 8,
        height: 4,
        format: PixelFormat::U8,
        origin: PixelOrigin::UpperLeft,
        data: (0..32).collect(),
    };
    let record = write_frame_record(5, Timestamp::new(2.25), &image, &calibration()).unwrap();
    let decoded = read_frame_record(&record).unwrap();
    assert_eq!(decoded.source_id, 5);
    assert_eq!(decoded.timestamp, Timestamp::new(2.25));
    assert_eq!(decoded.image, image);
    assert_eq!(decoded.calibration, calibration());
}

#[test]
fn test_record_with_wrong_leading_tag_fails() {
    let record = write_configuration_record("a", "b", "c");
    let err = read_sample_record(&record).unwrap_err();
    assert!(matches!(err, CodecError::TagMismatch { .. }));
}
