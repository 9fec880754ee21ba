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

//! Scene geometry carried by scene-tracker samples: sparse point clouds,
//! 2D/3D feature correspondences, planes, meshes, depth images and room
//! layouts.

use nalgebra::{Matrix4, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Axis-aligned box; `lower` must be componentwise `<= higher` to be valid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lower: Vector3<f64>,
    pub higher: Vector3<f64>,
}

impl BoundingBox {
    #[must_use]
    pub fn new(lower: Vector3<f64>, higher: Vector3<f64>) -> Self {
        Self { lower, higher }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lower.x <= self.higher.x
            && self.lower.y <= self.higher.y
            && self.lower.z <= self.higher.z
    }
}

/// Orientation class of a detected plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneKind {
    Unknown,
    Horizontal,
    Vertical,
}

impl PlaneKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Horizontal => "HORIZONTAL",
            Self::Vertical => "VERTICAL",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "UNKNOWN" => Some(Self::Unknown),
            "HORIZONTAL" => Some(Self::Horizontal),
            "VERTICAL" => Some(Self::Vertical),
            _ => None,
        }
    }
}

/// A detected planar surface.
///
/// Vertices, texture coordinates and boundary vertices live in the plane's
/// own coordinate frame; `world_from_plane` maps them into world space.
/// `triangle_indices` index into `vertices`, three per triangle.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub id: u32,
    pub kind: PlaneKind,
    pub world_from_plane: Matrix4<f64>,
    pub bounding_box: BoundingBox,
    pub vertices: Vec<Vector3<f64>>,
    pub texture_coordinates: Vec<Vector2<f64>>,
    pub triangle_indices: Vec<u32>,
    pub boundary_vertices: Vec<Vector3<f64>>,
}

/// A reconstructed surface mesh in its own coordinate frame.
///
/// `per_vertex_normals` is either empty or has exactly one normal per
/// vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub id: u32,
    pub world_from_mesh: Matrix4<f64>,
    pub vertices: Vec<Vector3<f64>>,
    pub per_vertex_normals: Vec<Vector3<f64>>,
    pub triangle_indices: Vec<u32>,
}

/// Pixel layout of a depth or confidence image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One f32 per pixel (metric depth).
    F32,
    /// One u16 per pixel.
    U16,
    /// One u8 per pixel (confidence levels).
    U8,
}

impl PixelFormat {
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::U16 => 2,
            Self::U8 => 1,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::F32 => "F32",
            Self::U16 => "U16",
            Self::U8 => "U8",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "F32" => Some(Self::F32),
            "U16" => Some(Self::U16),
            "U8" => Some(Self::U8),
            _ => None,
        }
    }
}

/// Location of the first pixel row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrigin {
    UpperLeft,
    LowerLeft,
}

impl PixelOrigin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpperLeft => "UPPER_LEFT",
            Self::LowerLeft => "LOWER_LEFT",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "UPPER_LEFT" => Some(Self::UpperLeft),
            "LOWER_LEFT" => Some(Self::LowerLeft),
            _ => None,
        }
    }
}

/// A raw row-major image buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub origin: PixelOrigin,
    /// Row-major pixel data, `width * height * bytes_per_pixel` bytes.
    pub data: Vec<u8>,
}

impl Image {
    #[must_use]
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.expected_len()
    }
}

/// Intrinsics and mounting transform of the camera a depth image came from.
/// Serialized as a JSON blob alongside the raw pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub model: String,
    pub width: u32,
    pub height: u32,
    /// Model-specific intrinsic parameters.
    pub parameters: Vec<f64>,
    /// Column-major 4x4 transform mapping depth-camera space into device
    /// space, 16 entries.
    pub device_from_camera: Vec<f64>,
}

impl CameraCalibration {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.device_from_camera.len() == 16 && self.width > 0 && self.height > 0
    }
}

/// A depth image with optional per-pixel confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    pub calibration: CameraCalibration,
    pub depth: Image,
    pub confidence: Option<Image>,
}

/// Planar room-object classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanarKind {
    Wall,
    Door,
    Window,
    Opening,
    Floor,
}

/// Volumetric room-object classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumetricKind {
    Storage,
    Refrigerator,
    Stove,
    Bed,
    Sink,
    Washer,
    Toilet,
    Bathtub,
    Oven,
    Dishwasher,
    Table,
    Sofa,
    Chair,
    Fireplace,
    Television,
    Stairs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomObjectKind {
    Planar(PlanarKind),
    Volumetric(VolumetricKind),
}

/// One classified object of a room layout.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomObject {
    pub identifier: String,
    pub kind: RoomObjectKind,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    pub world_from_object: Matrix4<f64>,
    /// Extent along the object's local axes.
    pub dimension: Vector3<f64>,
}

/// Scene geometry attached to one tracked object of a scene sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneElement {
    /// Sparse 3D point cloud; `point_ids` is either empty or parallel to
    /// `points`, carrying tracker-native ids stable across samples.
    ObjectPoints {
        points: Vec<Vector3<f64>>,
        point_ids: Vec<u64>,
    },
    /// 3D/2D correspondences used for the current pose estimate.
    FeatureCorrespondences {
        object_points: Vec<Vector3<f64>>,
        image_points: Vec<Vector2<f64>>,
        point_ids: Vec<u64>,
    },
    Planes(Vec<Plane>),
    Meshes(Vec<Mesh>),
    Depth(Box<DepthImage>),
    Room { objects: Vec<RoomObject> },
}

impl SceneElement {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ObjectPoints { .. } => "object points",
            Self::FeatureCorrespondences { .. } => "feature correspondences",
            Self::Planes(_) => "planes",
            Self::Meshes(_) => "meshes",
            Self::Depth(_) => "depth",
            Self::Room { .. } => "room",
        }
    }
}
