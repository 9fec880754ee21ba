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

//! Binary record codec.
//!
//! Every block starts with an 8-byte ASCII tag and a u64 format version so
//! each block is independently recognizable and parseable. Geometry
//! vectors and quaternions are written as f32 (precision traded for size);
//! 4x4 transforms and bounding boxes keep f64. Decoding fails closed: any
//! tag mismatch, version mismatch, truncation, over-limit size or failed
//! validation aborts the block with an error and no partial result.

pub mod bitstream;

use std::collections::BTreeSet;

use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector2, Vector3};

use crate::element::{
    BoundingBox, CameraCalibration, DepthImage, Image, Mesh, PixelFormat, PixelOrigin, Plane,
    PlaneKind, SceneElement,
};
use crate::error::CodecError;
use crate::ids::ObjectId;
use crate::sample::{
    GpsLocation, Metadata, ReferenceSystem, Sample, SampleKind, SamplePayload, Timestamp, Value,
};

use bitstream::{tag, BitstreamReader, BitstreamWriter};

/// Version written into every block; decoders accept exactly this.
pub const FORMAT_VERSION: u64 = 1;

/// Upper bound for raw byte buffers (metadata buffers, depth pixel data).
pub const MAX_BUFFER_BYTES: u64 = 1024 * 1024 * 1024;

/// Upper bound for any element/entry count on the wire.
pub const MAX_ELEMENT_COUNT: u32 = 1_000_000;

/// Largest accepted image edge.
pub const MAX_IMAGE_DIMENSION: u32 = 1920 * 4;

pub const TAG_SCENE_ELEMENTS: u64 = tag(b"_TRKSES_");
pub const TAG_ELEMENT_EMPTY: u64 = tag(b"_TRKETY_");
pub const TAG_OBJECT_POINTS: u64 = tag(b"_TRKOPS_");
pub const TAG_FEATURE_CORRESPONDENCES: u64 = tag(b"_TRKFCS_");
pub const TAG_PLANES: u64 = tag(b"_TRKPLS_");
pub const TAG_MESHES: u64 = tag(b"_TRKMES_");
pub const TAG_DEPTH: u64 = tag(b"_TRKDPH_");
pub const TAG_METADATA: u64 = tag(b"_TRKMDA_");
pub const TAG_CONFIGURATION_RECORD: u64 = tag(b"_TRKCFG_");
pub const TAG_SAMPLE_RECORD: u64 = tag(b"_TRKDAT_");
pub const TAG_FRAME_RECORD: u64 = tag(b"_TRKFRM_");

const TAG_VALUE_BOOL: u64 = tag(b"__BOOL__");
const TAG_VALUE_INT32: u64 = tag(b"__INT32_");
const TAG_VALUE_INT64: u64 = tag(b"__INT64_");
const TAG_VALUE_FLOAT32: u64 = tag(b"_FLOAT32");
const TAG_VALUE_FLOAT64: u64 = tag(b"_FLOAT64");
const TAG_VALUE_STRING: u64 = tag(b"_STRING_");
const TAG_VALUE_BUFFER: u64 = tag(b"_BUFFER_");

fn check_count(count: u32, what: &'static str) -> Result<usize, CodecError> {
    if count > MAX_ELEMENT_COUNT {
        return Err(CodecError::SizeLimit {
            what,
            size: u64::from(count),
            limit: u64::from(MAX_ELEMENT_COUNT),
        });
    }
    Ok(count as usize)
}

fn check_version(reader: &mut BitstreamReader<'_>) -> Result<(), CodecError> {
    let version = reader.read_u64()?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    Ok(())
}

fn write_vector2_f32(writer: &mut BitstreamWriter, v: &Vector2<f64>) {
    writer.write_f32(v.x as f32);
    writer.write_f32(v.y as f32);
}

fn read_vector2_f32(reader: &mut BitstreamReader<'_>) -> Result<Vector2<f64>, CodecError> {
    let x = reader.read_f32()?;
    let y = reader.read_f32()?;
    Ok(Vector2::new(f64::from(x), f64::from(y)))
}

fn write_vector3_f32(writer: &mut BitstreamWriter, v: &Vector3<f64>) {
    writer.write_f32(v.x as f32);
    writer.write_f32(v.y as f32);
    writer.write_f32(v.z as f32);
}

fn read_vector3_f32(reader: &mut BitstreamReader<'_>) -> Result<Vector3<f64>, CodecError> {
    let x = reader.read_f32()?;
    let y = reader.read_f32()?;
    let z = reader.read_f32()?;
    Ok(Vector3::new(f64::from(x), f64::from(y), f64::from(z)))
}

fn write_vector3_f64(writer: &mut BitstreamWriter, v: &Vector3<f64>) {
    writer.write_f64(v.x);
    writer.write_f64(v.y);
    writer.write_f64(v.z);
}

fn read_vector3_f64(reader: &mut BitstreamReader<'_>) -> Result<Vector3<f64>, CodecError> {
    let x = reader.read_f64()?;
    let y = reader.read_f64()?;
    let z = reader.read_f64()?;
    Ok(Vector3::new(x, y, z))
}

fn write_quaternion_f32(writer: &mut BitstreamWriter, q: &UnitQuaternion<f64>) {
    writer.write_f32(q.coords.x as f32);
    writer.write_f32(q.coords.y as f32);
    writer.write_f32(q.coords.z as f32);
    writer.write_f32(q.coords.w as f32);
}

fn read_quaternion_f32(reader: &mut BitstreamReader<'_>) -> Result<UnitQuaternion<f64>, CodecError> {
    let i = f64::from(reader.read_f32()?);
    let j = f64::from(reader.read_f32()?);
    let k = f64::from(reader.read_f32()?);
    let w = f64::from(reader.read_f32()?);
    let quaternion = Quaternion::new(w, i, j, k);
    if quaternion.norm() < 1e-6 {
        return Err(CodecError::Malformed("degenerate quaternion"));
    }
    // Renormalize to absorb the f32 rounding.
    Ok(UnitQuaternion::from_quaternion(quaternion))
}

fn write_matrix4_f64(writer: &mut BitstreamWriter, m: &Matrix4<f64>) {
    for value in m.as_slice() {
        writer.write_f64(*value);
    }
}

/// Reads a column-major 4x4 transform and validates it: the bottom row
/// must be (0, 0, 0, ~1) within 1e-6 (snapped to exact values), and the
/// matrix must be invertible.
fn read_matrix4_f64(reader: &mut BitstreamReader<'_>) -> Result<Matrix4<f64>, CodecError> {
    let mut values = [0.0f64; 16];
    for value in &mut values {
        *value = reader.read_f64()?;
    }
    let mut m = Matrix4::from_column_slice(&values);
    for col in 0..3 {
        if m[(3, col)].abs() > 1e-6 {
            return Err(CodecError::Malformed("transform bottom row not affine"));
        }
        m[(3, col)] = 0.0;
    }
    if (m[(3, 3)] - 1.0).abs() > 1e-6 {
        return Err(CodecError::Malformed("transform scale entry not one"));
    }
    m[(3, 3)] = 1.0;
    if m.try_inverse().is_none() {
        return Err(CodecError::Malformed("singular transform"));
    }
    Ok(m)
}

fn write_object_ids(writer: &mut BitstreamWriter, ids: &[ObjectId]) {
    writer.write_u32(ids.len() as u32);
    for id in ids {
        writer.write_u32(id.0);
    }
}

fn read_object_ids(reader: &mut BitstreamReader<'_>) -> Result<Vec<ObjectId>, CodecError> {
    let count = check_count(reader.read_u32()?, "object id count")?;
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(ObjectId(reader.read_u32()?));
    }
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Scene elements
// ---------------------------------------------------------------------------

/// Encodes one scene-element slot per tracked object. Empty slots (and
/// room layouts, which have no wire format) become the empty-element tag
/// so the slot count stays consistent.
pub fn write_scene_elements(writer: &mut BitstreamWriter, elements: &[Option<SceneElement>]) {
    writer.write_tag(TAG_SCENE_ELEMENTS);
    writer.write_u64(FORMAT_VERSION);
    writer.write_u32(elements.len() as u32);
    for slot in elements {
        match slot {
            None => writer.write_tag(TAG_ELEMENT_EMPTY),
            Some(SceneElement::Room { .. }) => {
                debug_assert!(false, "room layouts have no wire format");
                writer.write_tag(TAG_ELEMENT_EMPTY);
            }
            Some(element) => write_scene_element(writer, element),
        }
    }
}

pub fn read_scene_elements(
    reader: &mut BitstreamReader<'_>,
) -> Result<Vec<Option<SceneElement>>, CodecError> {
    reader.expect_tag(TAG_SCENE_ELEMENTS)?;
    check_version(reader)?;
    let count = check_count(reader.read_u32()?, "scene element count")?;
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        let found = reader.peek_tag()?;
        let element = match found {
            TAG_ELEMENT_EMPTY => {
                reader.read_tag()?;
                None
            }
            TAG_OBJECT_POINTS => Some(read_object_points(reader)?),
            TAG_FEATURE_CORRESPONDENCES => Some(read_feature_correspondences(reader)?),
            TAG_PLANES => Some(read_planes(reader)?),
            TAG_MESHES => Some(read_meshes(reader)?),
            TAG_DEPTH => Some(read_depth(reader)?),
            _ => return Err(CodecError::UnknownTag { found }),
        };
        elements.push(element);
    }
    Ok(elements)
}

fn write_scene_element(writer: &mut BitstreamWriter, element: &SceneElement) {
    match element {
        SceneElement::ObjectPoints { points, point_ids } => {
            write_object_points(writer, points, point_ids);
        }
        SceneElement::FeatureCorrespondences {
            object_points,
            image_points,
            point_ids,
        } => write_feature_correspondences(writer, object_points, image_points, point_ids),
        SceneElement::Planes(planes) => write_planes(writer, planes),
        SceneElement::Meshes(meshes) => write_meshes(writer, meshes),
        SceneElement::Depth(depth) => write_depth(writer, depth),
        SceneElement::Room { .. } => unreachable!("handled by write_scene_elements"),
    }
}

fn write_object_points(writer: &mut BitstreamWriter, points: &[Vector3<f64>], ids: &[u64]) {
    debug_assert!(ids.is_empty() || ids.len() == points.len());
    writer.write_tag(TAG_OBJECT_POINTS);
    writer.write_u64(FORMAT_VERSION);
    writer.write_u32(points.len() as u32);
    for point in points {
        write_vector3_f32(writer, point);
    }
    writer.write_u32(ids.len() as u32);
    for id in ids {
        writer.write_u64(*id);
    }
}

fn read_object_points(reader: &mut BitstreamReader<'_>) -> Result<SceneElement, CodecError> {
    reader.expect_tag(TAG_OBJECT_POINTS)?;
    check_version(reader)?;
    let point_count = check_count(reader.read_u32()?, "object point count")?;
    let mut points = Vec::with_capacity(point_count);
    for _ in 0..point_count {
        points.push(read_vector3_f32(reader)?);
    }
    let id_count = check_count(reader.read_u32()?, "point id count")?;
    if id_count != 0 && id_count != point_count {
        return Err(CodecError::Malformed("point id count mismatch"));
    }
    let mut point_ids = Vec::with_capacity(id_count);
    for _ in 0..id_count {
        point_ids.push(reader.read_u64()?);
    }
    Ok(SceneElement::ObjectPoints { points, point_ids })
}

fn write_feature_correspondences(
    writer: &mut BitstreamWriter,
    object_points: &[Vector3<f64>],
    image_points: &[Vector2<f64>],
    ids: &[u64],
) {
    debug_assert!(object_points.len() == image_points.len());
    debug_assert!(ids.is_empty() || ids.len() == object_points.len());
    writer.write_tag(TAG_FEATURE_CORRESPONDENCES);
    writer.write_u64(FORMAT_VERSION);
    writer.write_u32(object_points.len() as u32);
    for point in object_points {
        write_vector3_f32(writer, point);
    }
    for point in image_points {
        write_vector2_f32(writer, point);
    }
    writer.write_u32(ids.len() as u32);
    for id in ids {
        writer.write_u64(*id);
    }
}

fn read_feature_correspondences(
    reader: &mut BitstreamReader<'_>,
) -> Result<SceneElement, CodecError> {
    reader.expect_tag(TAG_FEATURE_CORRESPONDENCES)?;
    check_version(reader)?;
    let count = check_count(reader.read_u32()?, "correspondence count")?;
    let mut object_points = Vec::with_capacity(count);
    for _ in 0..count {
        object_points.push(read_vector3_f32(reader)?);
    }
    let mut image_points = Vec::with_capacity(count);
    for _ in 0..count {
        image_points.push(read_vector2_f32(reader)?);
    }
    let id_count = check_count(reader.read_u32()?, "correspondence id count")?;
    if id_count != 0 && id_count != count {
        return Err(CodecError::Malformed("correspondence id count mismatch"));
    }
    let mut point_ids = Vec::with_capacity(id_count);
    for _ in 0..id_count {
        point_ids.push(reader.read_u64()?);
    }
    Ok(SceneElement::FeatureCorrespondences {
        object_points,
        image_points,
        point_ids,
    })
}

fn write_planes(writer: &mut BitstreamWriter, planes: &[Plane]) {
    writer.write_tag(TAG_PLANES);
    writer.write_u64(FORMAT_VERSION);
    writer.write_u32(planes.len() as u32);
    for plane in planes {
        debug_assert!(plane.bounding_box.is_valid());
        debug_assert!(plane.triangle_indices.len() % 3 == 0);
        writer.write_u32(plane.id);
        writer.write_string(plane.kind.as_str());
        write_matrix4_f64(writer, &plane.world_from_plane);
        write_vector3_f64(writer, &plane.bounding_box.lower);
        write_vector3_f64(writer, &plane.bounding_box.higher);
        writer.write_u32(plane.vertices.len() as u32);
        for vertex in &plane.vertices {
            write_vector3_f32(writer, vertex);
        }
        writer.write_u32(plane.texture_coordinates.len() as u32);
        for coordinate in &plane.texture_coordinates {
            write_vector2_f32(writer, coordinate);
        }
        writer.write_u32(plane.triangle_indices.len() as u32);
        for index in &plane.triangle_indices {
            writer.write_u32(*index);
        }
        writer.write_u32(plane.boundary_vertices.len() as u32);
        for vertex in &plane.boundary_vertices {
            write_vector3_f32(writer, vertex);
        }
    }
}

fn read_planes(reader: &mut BitstreamReader<'_>) -> Result<SceneElement, CodecError> {
    reader.expect_tag(TAG_PLANES)?;
    check_version(reader)?;
    let plane_count = check_count(reader.read_u32()?, "plane count")?;
    let mut planes = Vec::with_capacity(plane_count);
    for _ in 0..plane_count {
        let id = reader.read_u32()?;
        let kind_name = reader.read_string()?;
        let kind =
            PlaneKind::parse(&kind_name).ok_or(CodecError::Malformed("unknown plane kind"))?;
        let world_from_plane = read_matrix4_f64(reader)?;
        let lower = read_vector3_f64(reader)?;
        let higher = read_vector3_f64(reader)?;
        let bounding_box = BoundingBox::new(lower, higher);
        if !bounding_box.is_valid() {
            return Err(CodecError::Malformed("inverted bounding box"));
        }
        let vertex_count = check_count(reader.read_u32()?, "plane vertex count")?;
        let mut vertices = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            vertices.push(read_vector3_f32(reader)?);
        }
        let texture_count = check_count(reader.read_u32()?, "texture coordinate count")?;
        if texture_count != 0 && texture_count != vertex_count {
            return Err(CodecError::Malformed("texture coordinate count mismatch"));
        }
        let mut texture_coordinates = Vec::with_capacity(texture_count);
        for _ in 0..texture_count {
            texture_coordinates.push(read_vector2_f32(reader)?);
        }
        let triangle_indices = read_triangle_indices(reader, vertex_count)?;
        let boundary_count = check_count(reader.read_u32()?, "boundary vertex count")?;
        let mut boundary_vertices = Vec::with_capacity(boundary_count);
        for _ in 0..boundary_count {
            boundary_vertices.push(read_vector3_f32(reader)?);
        }
        planes.push(Plane {
            id,
            kind,
            world_from_plane,
            bounding_box,
            vertices,
            texture_coordinates,
            triangle_indices,
            boundary_vertices,
        });
    }
    Ok(SceneElement::Planes(planes))
}

fn write_meshes(writer: &mut BitstreamWriter, meshes: &[Mesh]) {
    writer.write_tag(TAG_MESHES);
    writer.write_u64(FORMAT_VERSION);
    writer.write_u32(meshes.len() as u32);
    for mesh in meshes {
        debug_assert!(
            mesh.per_vertex_normals.is_empty()
                || mesh.per_vertex_normals.len() == mesh.vertices.len()
        );
        debug_assert!(mesh.triangle_indices.len() % 3 == 0);
        writer.write_u32(mesh.id);
        write_matrix4_f64(writer, &mesh.world_from_mesh);
        writer.write_u32(mesh.vertices.len() as u32);
        for vertex in &mesh.vertices {
            write_vector3_f32(writer, vertex);
        }
        writer.write_u32(mesh.per_vertex_normals.len() as u32);
        for normal in &mesh.per_vertex_normals {
            write_vector3_f32(writer, normal);
        }
        // Reserved per-vertex attribute block, unused in version 1.
        writer.write_u32(0);
        writer.write_u32(mesh.triangle_indices.len() as u32);
        for index in &mesh.triangle_indices {
            writer.write_u32(*index);
        }
    }
}

fn read_meshes(reader: &mut BitstreamReader<'_>) -> Result<SceneElement, CodecError> {
    reader.expect_tag(TAG_MESHES)?;
    check_version(reader)?;
    let mesh_count = check_count(reader.read_u32()?, "mesh count")?;
    let mut meshes = Vec::with_capacity(mesh_count);
    for _ in 0..mesh_count {
        let id = reader.read_u32()?;
        let world_from_mesh = read_matrix4_f64(reader)?;
        let vertex_count = check_count(reader.read_u32()?, "mesh vertex count")?;
        let mut vertices = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            vertices.push(read_vector3_f32(reader)?);
        }
        let normal_count = check_count(reader.read_u32()?, "normal count")?;
        if normal_count != 0 && normal_count != vertex_count {
            return Err(CodecError::Malformed("normal count mismatch"));
        }
        let mut per_vertex_normals = Vec::with_capacity(normal_count);
        for _ in 0..normal_count {
            per_vertex_normals.push(read_vector3_f32(reader)?);
        }
        if reader.read_u32()? != 0 {
            return Err(CodecError::Malformed("reserved attribute block not empty"));
        }
        let triangle_indices = read_triangle_indices(reader, vertex_count)?;
        meshes.push(Mesh {
            id,
            world_from_mesh,
            vertices,
            per_vertex_normals,
            triangle_indices,
        });
    }
    Ok(SceneElement::Meshes(meshes))
}

fn read_triangle_indices(
    reader: &mut BitstreamReader<'_>,
    vertex_count: usize,
) -> Result<Vec<u32>, CodecError> {
    let index_count = check_count(reader.read_u32()?, "triangle index count")?;
    if index_count % 3 != 0 {
        return Err(CodecError::Malformed("triangle index count not divisible by 3"));
    }
    let mut indices = Vec::with_capacity(index_count);
    for _ in 0..index_count {
        let index = reader.read_u32()?;
        if index as usize >= vertex_count {
            return Err(CodecError::Malformed("triangle index out of range"));
        }
        indices.push(index);
    }
    Ok(indices)
}

fn write_image_payload(writer: &mut BitstreamWriter, image: &Image) {
    debug_assert!(image.is_consistent());
    writer.write_u64(image.data.len() as u64);
    writer.write_string(image.format.as_str());
    writer.write_bytes(&image.data);
}

fn write_depth(writer: &mut BitstreamWriter, depth: &DepthImage) {
    writer.write_tag(TAG_DEPTH);
    writer.write_u64(FORMAT_VERSION);
    writer.write_u32(depth.depth.width);
    writer.write_u32(depth.depth.height);
    writer.write_string(depth.depth.origin.as_str());
    write_image_payload(writer, &depth.depth);
    match &depth.confidence {
        Some(confidence) => {
            debug_assert!(
                confidence.width == depth.depth.width && confidence.height == depth.depth.height
            );
            write_image_payload(writer, confidence);
        }
        // Zero size marks an absent confidence image.
        None => writer.write_u64(0),
    }
    let json = serde_json::to_string(&depth.calibration).unwrap_or_default();
    writer.write_string(&json);
}

fn read_image_payload(
    reader: &mut BitstreamReader<'_>,
    width: u32,
    height: u32,
    origin: PixelOrigin,
) -> Result<Image, CodecError> {
    let size = reader.read_u64()?;
    if size > MAX_BUFFER_BYTES {
        return Err(CodecError::SizeLimit {
            what: "image data",
            size,
            limit: MAX_BUFFER_BYTES,
        });
    }
    let format_name = reader.read_string()?;
    let format =
        PixelFormat::parse(&format_name).ok_or(CodecError::Malformed("unknown pixel format"))?;
    let expected = width as u64 * height as u64 * format.bytes_per_pixel() as u64;
    if size != expected {
        return Err(CodecError::Malformed("image size does not match dimensions"));
    }
    let data = reader.read_bytes(size as usize)?.to_vec();
    Ok(Image {
        width,
        height,
        format,
        origin,
        data,
    })
}

fn read_depth(reader: &mut BitstreamReader<'_>) -> Result<SceneElement, CodecError> {
    reader.expect_tag(TAG_DEPTH)?;
    check_version(reader)?;
    let width = reader.read_u32()?;
    let height = reader.read_u32()?;
    if width == 0 || height == 0 || width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
        return Err(CodecError::Malformed("image dimensions out of range"));
    }
    let origin_name = reader.read_string()?;
    let origin =
        PixelOrigin::parse(&origin_name).ok_or(CodecError::Malformed("unknown pixel origin"))?;
    let depth = read_image_payload(reader, width, height, origin)?;
    let confidence = if reader.peek_tag()? == 0 {
        reader.read_u64()?;
        None
    } else {
        Some(read_image_payload(reader, width, height, origin)?)
    };
    let json = reader.read_string()?;
    let calibration: CameraCalibration = serde_json::from_str(&json)?;
    if !calibration.is_consistent() {
        return Err(CodecError::Malformed("inconsistent camera calibration"));
    }
    Ok(SceneElement::Depth(Box::new(DepthImage {
        calibration,
        depth,
        confidence,
    })))
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

pub fn write_metadata(writer: &mut BitstreamWriter, metadata: &Metadata) {
    writer.write_tag(TAG_METADATA);
    writer.write_u64(FORMAT_VERSION);
    writer.write_u32(metadata.len() as u32);
    for (key, value) in metadata {
        writer.write_string(key);
        match value {
            Value::Bool(v) => {
                writer.write_tag(TAG_VALUE_BOOL);
                writer.write_bool(*v);
            }
            Value::Int32(v) => {
                writer.write_tag(TAG_VALUE_INT32);
                writer.write_i32(*v);
            }
            Value::Int64(v) => {
                writer.write_tag(TAG_VALUE_INT64);
                writer.write_i64(*v);
            }
            Value::Float32(v) => {
                writer.write_tag(TAG_VALUE_FLOAT32);
                writer.write_f32(*v);
            }
            Value::Float64(v) => {
                writer.write_tag(TAG_VALUE_FLOAT64);
                writer.write_f64(*v);
            }
            Value::String(v) => {
                writer.write_tag(TAG_VALUE_STRING);
                writer.write_string(v);
            }
            Value::Buffer(v) => {
                debug_assert!(v.len() as u64 <= MAX_BUFFER_BYTES);
                writer.write_tag(TAG_VALUE_BUFFER);
                writer.write_u64(v.len() as u64);
                writer.write_bytes(v);
            }
        }
    }
}

pub fn read_metadata(reader: &mut BitstreamReader<'_>) -> Result<Metadata, CodecError> {
    reader.expect_tag(TAG_METADATA)?;
    check_version(reader)?;
    let count = check_count(reader.read_u32()?, "metadata entry count")?;
    let mut metadata = Metadata::new();
    for _ in 0..count {
        let key = reader.read_string()?;
        let found = reader.read_tag()?;
        let value = match found {
            TAG_VALUE_BOOL => Value::Bool(reader.read_bool()?),
            TAG_VALUE_INT32 => Value::Int32(reader.read_i32()?),
            TAG_VALUE_INT64 => Value::Int64(reader.read_i64()?),
            TAG_VALUE_FLOAT32 => Value::Float32(reader.read_f32()?),
            TAG_VALUE_FLOAT64 => Value::Float64(reader.read_f64()?),
            TAG_VALUE_STRING => Value::String(reader.read_string()?),
            TAG_VALUE_BUFFER => {
                let size = reader.read_u64()?;
                if size > MAX_BUFFER_BYTES {
                    return Err(CodecError::SizeLimit {
                        what: "metadata buffer",
                        size,
                        limit: MAX_BUFFER_BYTES,
                    });
                }
                Value::Buffer(reader.read_bytes(size as usize)?.to_vec())
            }
            _ => return Err(CodecError::UnknownTag { found }),
        };
        metadata.insert(key, value);
    }
    Ok(metadata)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Per-device header record, written once per recording before the
/// device's first data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationRecord {
    pub device_name: String,
    pub device_major: String,
    pub device_minor: String,
}

pub fn write_configuration_record(
    device_name: &str,
    device_major: &str,
    device_minor: &str,
) -> Vec<u8> {
    let mut writer = BitstreamWriter::new();
    writer.write_tag(TAG_CONFIGURATION_RECORD);
    writer.write_u64(FORMAT_VERSION);
    writer.write_string(device_name);
    writer.write_string(device_major);
    writer.write_string(device_minor);
    writer.into_vec()
}

pub fn read_configuration_record(data: &[u8]) -> Result<ConfigurationRecord, CodecError> {
    let mut reader = BitstreamReader::new(data);
    reader.expect_tag(TAG_CONFIGURATION_RECORD)?;
    check_version(&mut reader)?;
    Ok(ConfigurationRecord {
        device_name: reader.read_string()?,
        device_major: reader.read_string()?,
        device_minor: reader.read_string()?,
    })
}

/// Decoded form of one data record.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub device_id: u64,
    pub timestamp: Timestamp,
    pub reference_system: ReferenceSystem,
    pub object_ids: Vec<ObjectId>,
    pub payload: SamplePayload,
    pub metadata: Metadata,
    pub found: Vec<ObjectId>,
    pub lost: Vec<ObjectId>,
    pub descriptions: Vec<(ObjectId, String)>,
}

fn payload_kind_byte(kind: SampleKind) -> u8 {
    match kind {
        SampleKind::Orientation => 0,
        SampleKind::Position => 1,
        SampleKind::Pose => 2,
        SampleKind::Scene => 3,
        SampleKind::Gps => 4,
    }
}

/// Serializes one sample plus the tracked-object transitions and the
/// device's description map into a self-contained data record.
pub fn write_sample_record(
    device_id: u64,
    sample: &Sample,
    found: &BTreeSet<ObjectId>,
    lost: &BTreeSet<ObjectId>,
    descriptions: &[(ObjectId, String)],
) -> Vec<u8> {
    let mut writer = BitstreamWriter::new();
    writer.write_tag(TAG_SAMPLE_RECORD);
    writer.write_u64(FORMAT_VERSION);
    writer.write_u64(device_id);
    writer.write_f64(sample.timestamp.seconds());
    writer.write_string(sample.reference_system.as_str());
    writer.write_u8(payload_kind_byte(sample.kind()));
    write_object_ids(&mut writer, &sample.object_ids);

    match &sample.payload {
        SamplePayload::Orientation { orientations } => {
            for orientation in orientations {
                write_quaternion_f32(&mut writer, orientation);
            }
        }
        SamplePayload::Position { positions } => {
            for position in positions {
                write_vector3_f32(&mut writer, position);
            }
        }
        SamplePayload::Pose {
            orientations,
            positions,
        } => {
            for orientation in orientations {
                write_quaternion_f32(&mut writer, orientation);
            }
            for position in positions {
                write_vector3_f32(&mut writer, position);
            }
        }
        SamplePayload::Scene {
            orientations,
            positions,
            elements,
        } => {
            for orientation in orientations {
                write_quaternion_f32(&mut writer, orientation);
            }
            for position in positions {
                write_vector3_f32(&mut writer, position);
            }
            write_scene_elements(&mut writer, elements);
        }
        SamplePayload::Gps { locations } => {
            for location in locations {
                writer.write_f64(location.latitude);
                writer.write_f64(location.longitude);
                writer.write_f32(location.altitude);
                writer.write_f32(location.direction);
                writer.write_f32(location.speed);
                writer.write_f32(location.accuracy);
                writer.write_f32(location.altitude_accuracy);
                writer.write_f32(location.direction_accuracy);
                writer.write_f32(location.speed_accuracy);
            }
        }
    }

    write_metadata(&mut writer, &sample.metadata);

    let found_ids: Vec<ObjectId> = found.iter().copied().collect();
    let lost_ids: Vec<ObjectId> = lost.iter().copied().collect();
    write_object_ids(&mut writer, &found_ids);
    write_object_ids(&mut writer, &lost_ids);

    writer.write_u32(descriptions.len() as u32);
    for (id, description) in descriptions {
        writer.write_u32(id.0);
        writer.write_string(description);
    }
    writer.into_vec()
}

pub fn read_sample_record(data: &[u8]) -> Result<SampleRecord, CodecError> {
    let mut reader = BitstreamReader::new(data);
    reader.expect_tag(TAG_SAMPLE_RECORD)?;
    check_version(&mut reader)?;
    let device_id = reader.read_u64()?;
    let timestamp = Timestamp::new(reader.read_f64()?);
    let reference_name = reader.read_string()?;
    let reference_system = ReferenceSystem::parse(&reference_name)
        .ok_or(CodecError::Malformed("unknown reference system"))?;
    let kind_byte = reader.read_u8()?;
    let object_ids = read_object_ids(&mut reader)?;
    let count = object_ids.len();

    let payload = match kind_byte {
        0 => {
            let mut orientations = Vec::with_capacity(count);
            for _ in 0..count {
                orientations.push(read_quaternion_f32(&mut reader)?);
            }
            SamplePayload::Orientation { orientations }
        }
        1 => {
            let mut positions = Vec::with_capacity(count);
            for _ in 0..count {
                positions.push(read_vector3_f32(&mut reader)?);
            }
            SamplePayload::Position { positions }
        }
        2 | 3 => {
            let mut orientations = Vec::with_capacity(count);
            for _ in 0..count {
                orientations.push(read_quaternion_f32(&mut reader)?);
            }
            let mut positions = Vec::with_capacity(count);
            for _ in 0..count {
                positions.push(read_vector3_f32(&mut reader)?);
            }
            if kind_byte == 3 {
                let elements = read_scene_elements(&mut reader)?;
                if elements.len() != count {
                    return Err(CodecError::Malformed("scene element count mismatch"));
                }
                SamplePayload::Scene {
                    orientations,
                    positions,
                    elements,
                }
            } else {
                SamplePayload::Pose {
                    orientations,
                    positions,
                }
            }
        }
        4 => {
            let mut locations = Vec::with_capacity(count);
            for _ in 0..count {
                locations.push(GpsLocation {
                    latitude: reader.read_f64()?,
                    longitude: reader.read_f64()?,
                    altitude: reader.read_f32()?,
                    direction: reader.read_f32()?,
                    speed: reader.read_f32()?,
                    accuracy: reader.read_f32()?,
                    altitude_accuracy: reader.read_f32()?,
                    direction_accuracy: reader.read_f32()?,
                    speed_accuracy: reader.read_f32()?,
                });
            }
            SamplePayload::Gps { locations }
        }
        _ => return Err(CodecError::Malformed("unknown payload kind")),
    };

    let metadata = read_metadata(&mut reader)?;
    let found = read_object_ids(&mut reader)?;
    let lost = read_object_ids(&mut reader)?;

    let description_count = check_count(reader.read_u32()?, "description count")?;
    let mut descriptions = Vec::with_capacity(description_count);
    for _ in 0..description_count {
        let id = ObjectId(reader.read_u32()?);
        let description = reader.read_string()?;
        descriptions.push((id, description));
    }

    Ok(SampleRecord {
        device_id,
        timestamp,
        reference_system,
        object_ids,
        payload,
        metadata,
        found,
        lost,
        descriptions,
    })
}

/// Decoded form of one camera-frame record.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub source_id: u64,
    pub timestamp: Timestamp,
    pub image: Image,
    pub calibration: CameraCalibration,
}

pub fn write_frame_record(
    source_id: u64,
    timestamp: Timestamp,
    image: &Image,
    calibration: &CameraCalibration,
) -> Result<Vec<u8>, CodecError> {
    let mut writer = BitstreamWriter::new();
    writer.write_tag(TAG_FRAME_RECORD);
    writer.write_u64(FORMAT_VERSION);
    writer.write_u64(source_id);
    writer.write_f64(timestamp.seconds());
    writer.write_u32(image.width);
    writer.write_u32(image.height);
    writer.write_string(image.origin.as_str());
    write_image_payload(&mut writer, image);
    let json = serde_json::to_string(calibration)?;
    writer.write_string(&json);
    Ok(writer.into_vec())
}

pub fn read_frame_record(data: &[u8]) -> Result<FrameRecord, CodecError> {
    let mut reader = BitstreamReader::new(data);
    reader.expect_tag(TAG_FRAME_RECORD)?;
    check_version(&mut reader)?;
    let source_id = reader.read_u64()?;
    let timestamp = Timestamp::new(reader.read_f64()?);
    let width = reader.read_u32()?;
    let height = reader.read_u32()?;
    if width == 0 || height == 0 || width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
        return Err(CodecError::Malformed("image dimensions out of range"));
    }
    let origin_name = reader.read_string()?;
    let origin =
        PixelOrigin::parse(&origin_name).ok_or(CodecError::Malformed("unknown pixel origin"))?;
    let image = read_image_payload(&mut reader, width, height, origin)?;
    let json = reader.read_string()?;
    let calibration: CameraCalibration = serde_json::from_str(&json)?;
    Ok(FrameRecord {
        source_id,
        timestamp,
        image,
        calibration,
    })
}
