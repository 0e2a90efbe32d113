//! Shape model: the common shape record plus per-kind `write_*`/`read_*`
//! operations (`spec.md` §4.5).
//!
//! Grounded on the original `Shape` class hierarchy
//! (`original_source/3escore/shapes/3esshape.h`, `Arrow.h`, `MeshSet.h`,
//! `PointCloudShape.h`, `MultiShape.h`): the polymorphic class tree maps to
//! a sum type (`Shape`) indexed by routing ID, with per-kind extension
//! fields and a shared `CommonRecord`.

mod directional;
mod mesh_set;
mod mesh_shape;
mod multi_shape;
mod point_cloud;
mod simple;
mod text;

pub use directional::{DirectionalKind, DirectionalShape};
pub use mesh_set::{MeshSetPart, MeshSetShape};
pub use mesh_shape::{MeshShapeData, SendType};
pub use multi_shape::MultiShapeData;
pub use point_cloud::PointCloudShapeData;
pub use simple::{SimpleKind, SimpleShape};
pub use text::{Text2DShape, Text3DShape};

use bitflags::bitflags;

use crate::error::{Result, TesError};
use crate::messages::{ObjectAttributes, RoutingId, ShapeMessageId};
use crate::packet::{PacketReader, PacketWriter};
use crate::types::{Aabb, Quaternion, Vector3};

bitflags! {
    /// Common shape flag bits (`spec.md` §3 "Shape"). Per-shape-kind
    /// extension bits reuse the high half of the word; only the handler for
    /// that routing ID interprets them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShapeFlags: u16 {
        const WIRE             = 1 << 0;
        const TRANSPARENT      = 1 << 1;
        const TWO_SIDED        = 1 << 2;
        const REPLACE          = 1 << 3;
        const SKIP_RESOURCES   = 1 << 4;
        const DOUBLE_PRECISION = 1 << 5;
        const MULTI_SHAPE      = 1 << 6;

        /// Text2D/Text3D: screen-facing billboard rotation.
        const TEXT_SCREEN_FACING    = 1 << 8;
        /// Text2D: position is in world space rather than screen space.
        const TEXT_WORLD_SPACE      = 1 << 9;
        /// MeshShape: handler should derive vertex normals if none are sent.
        const MESH_CALCULATE_NORMALS = 1 << 8;
    }
}

bitflags! {
    /// Update-message subset flags (`spec.md` §4.5 "Update semantics").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UpdateFlags: u16 {
        const POSITION = 1 << 0;
        const ROTATION = 1 << 1;
        const SCALE    = 1 << 2;
        const COLOUR   = 1 << 3;
    }
}

/// Fields shared by every shape kind (`spec.md` §3 "Shape").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommonRecord {
    /// Instance ID; 0 marks a transient shape valid for a single frame.
    pub id: u32,
    pub category: u16,
    pub flags: ShapeFlags,
    /// Always stored at double precision internally; narrowed to `f32` on
    /// the wire unless [`ShapeFlags::DOUBLE_PRECISION`] is set.
    pub attributes: ObjectAttributes<f64>,
}

impl CommonRecord {
    pub fn new(id: u32, category: u16, flags: ShapeFlags, attributes: ObjectAttributes<f64>) -> Self {
        CommonRecord {
            id,
            category,
            flags,
            attributes,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.id == 0
    }

    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_element(self.id)?;
        writer.write_element(self.category)?;
        writer.write_element(self.flags.bits())?;
        if self.flags.contains(ShapeFlags::DOUBLE_PRECISION) {
            self.attributes.write(writer)?;
        } else {
            self.attributes.to_f32().write(writer)?;
        }
        Ok(())
    }

    pub fn read(reader: &mut PacketReader) -> Result<Self> {
        let id = reader.read_element()?;
        let category = reader.read_element()?;
        let flags = ShapeFlags::from_bits_truncate(reader.read_element()?);
        let attributes = if flags.contains(ShapeFlags::DOUBLE_PRECISION) {
            ObjectAttributes::<f64>::read(reader)?
        } else {
            ObjectAttributes::<f32>::read(reader)?.to_f64()
        };
        Ok(CommonRecord {
            id,
            category,
            flags,
            attributes,
        })
    }

    /// Emit a generic Destroy message: just the common ID.
    pub fn write_destroy(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_element(self.id)?;
        Ok(())
    }

    pub fn read_destroy(reader: &mut PacketReader) -> Result<u32> {
        reader.read_element()
    }

    /// Emit an Update message: a full attribute set when `subset` is empty,
    /// otherwise only the flagged fields.
    pub fn write_update(&self, writer: &mut PacketWriter, subset: UpdateFlags) -> Result<()> {
        writer.write_element(self.id)?;
        writer.write_element(subset.bits())?;
        let single = !self.flags.contains(ShapeFlags::DOUBLE_PRECISION);
        let write_field = |writer: &mut PacketWriter, values: &[f64]| -> Result<()> {
            if single {
                for &v in values {
                    writer.write_element(v as f32)?;
                }
            } else {
                for &v in values {
                    writer.write_element(v)?;
                }
            }
            Ok(())
        };
        if subset.is_empty() {
            if self.flags.contains(ShapeFlags::DOUBLE_PRECISION) {
                self.attributes.write(writer)?;
            } else {
                self.attributes.to_f32().write(writer)?;
            }
            return Ok(());
        }
        if subset.contains(UpdateFlags::POSITION) {
            write_field(writer, &self.attributes.position)?;
        }
        if subset.contains(UpdateFlags::ROTATION) {
            write_field(writer, &self.attributes.rotation)?;
        }
        if subset.contains(UpdateFlags::SCALE) {
            write_field(writer, &self.attributes.scale)?;
        }
        if subset.contains(UpdateFlags::COLOUR) {
            writer.write_element(self.attributes.colour)?;
        }
        Ok(())
    }

    /// Apply an Update message's payload onto `self`, replacing the whole
    /// attribute record when no subset bits are set, merging otherwise.
    /// Reads the shape ID and subset bits itself; callers who need the ID
    /// first (e.g. to look the live shape up) should use [`Self::apply_update`]
    /// instead, after reading those two fields themselves.
    pub fn read_update(&mut self, reader: &mut PacketReader) -> Result<u32> {
        let id: u32 = reader.read_element()?;
        let subset = UpdateFlags::from_bits_truncate(reader.read_element()?);
        self.apply_update(subset, reader)?;
        Ok(id)
    }

    /// Apply an Update message's field payload, given a subset already read
    /// by the caller (the shape ID precedes it on the wire and is consumed
    /// separately, see [`Self::read_update`]).
    pub fn apply_update(&mut self, subset: UpdateFlags, reader: &mut PacketReader) -> Result<()> {
        let single = !self.flags.contains(ShapeFlags::DOUBLE_PRECISION);
        let read_field = |reader: &mut PacketReader, out: &mut [f64]| -> Result<()> {
            for slot in out.iter_mut() {
                *slot = if single {
                    reader.read_element::<f32>()? as f64
                } else {
                    reader.read_element::<f64>()?
                };
            }
            Ok(())
        };
        if subset.is_empty() {
            self.attributes = if self.flags.contains(ShapeFlags::DOUBLE_PRECISION) {
                ObjectAttributes::<f64>::read(reader)?
            } else {
                ObjectAttributes::<f32>::read(reader)?.to_f64()
            };
            return Ok(());
        }
        if subset.contains(UpdateFlags::POSITION) {
            read_field(reader, &mut self.attributes.position)?;
        }
        if subset.contains(UpdateFlags::ROTATION) {
            read_field(reader, &mut self.attributes.rotation)?;
        }
        if subset.contains(UpdateFlags::SCALE) {
            read_field(reader, &mut self.attributes.scale)?;
        }
        if subset.contains(UpdateFlags::COLOUR) {
            self.attributes.colour = reader.read_element()?;
        }
        Ok(())
    }
}

/// Result of one `write_data` call for a complex shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDataStatus {
    /// More Data messages are required before the shape is fully defined.
    More,
    Done,
}

/// A shape kind that requires one or more Data messages after Create to
/// finish its definition (`spec.md` §4.5).
pub trait ComplexShape {
    fn write_data(&self, writer: &mut PacketWriter, progress: &mut u32) -> Result<WriteDataStatus>;
    fn read_data(&mut self, reader: &mut PacketReader) -> Result<WriteDataStatus>;
}

/// Helper used by create-message writers/readers to assert the routing ID
/// on a freshly-constructed [`PacketWriter`]/[`PacketReader`] matches the
/// shape kind being (de)serialised.
pub fn expect_message(reader: &PacketReader, expected: ShapeMessageId) -> Result<()> {
    if reader.message_id() != expected as u16 {
        return Err(TesError::Malformed(format!(
            "expected message id {:?} ({}), got {}",
            expected, expected as u16, reader.message_id()
        )));
    }
    Ok(())
}

/// Top-level tagged union over every shape kind (`spec.md` §4.5, REDESIGN
/// FLAGS "polymorphic shape hierarchy -> tagged variant").
#[derive(Debug, Clone)]
pub enum Shape {
    Simple(SimpleShape),
    Directional(DirectionalShape),
    Text2D(Text2DShape),
    Text3D(Text3DShape),
    MeshSet(MeshSetShape),
    MeshShape(MeshShapeData),
    PointCloud(PointCloudShapeData),
    MultiShape(MultiShapeData),
}

impl Shape {
    pub fn routing_id(&self) -> RoutingId {
        match self {
            Shape::Simple(s) => s.routing_id(),
            Shape::Directional(s) => s.routing_id(),
            Shape::Text2D(_) => RoutingId::Text2D,
            Shape::Text3D(_) => RoutingId::Text3D,
            Shape::MeshSet(_) => RoutingId::MeshSet,
            Shape::MeshShape(_) => RoutingId::MeshShape,
            Shape::PointCloud(_) => RoutingId::PointCloud,
            Shape::MultiShape(_) => RoutingId::MultiShape,
        }
    }

    pub fn common(&self) -> &CommonRecord {
        match self {
            Shape::Simple(s) => &s.common,
            Shape::Directional(s) => &s.common,
            Shape::Text2D(s) => &s.common,
            Shape::Text3D(s) => &s.common,
            Shape::MeshSet(s) => &s.common,
            Shape::MeshShape(s) => &s.common,
            Shape::PointCloud(s) => &s.common,
            Shape::MultiShape(s) => &s.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut CommonRecord {
        match self {
            Shape::Simple(s) => &mut s.common,
            Shape::Directional(s) => &mut s.common,
            Shape::Text2D(s) => &mut s.common,
            Shape::Text3D(s) => &mut s.common,
            Shape::MeshSet(s) => &mut s.common,
            Shape::MeshShape(s) => &mut s.common,
            Shape::PointCloud(s) => &mut s.common,
            Shape::MultiShape(s) => &mut s.common,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            Shape::MeshShape(_) | Shape::PointCloud(_) | Shape::MultiShape(_)
        ) || matches!(self, Shape::Text2D(_) | Shape::Text3D(_))
    }

    pub fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        match self {
            Shape::Simple(s) => s.write_create(writer),
            Shape::Directional(s) => s.write_create(writer),
            Shape::Text2D(s) => s.write_create(writer),
            Shape::Text3D(s) => s.write_create(writer),
            Shape::MeshSet(s) => s.write_create(writer),
            Shape::MeshShape(s) => s.write_create(writer),
            Shape::PointCloud(s) => s.write_create(writer),
            Shape::MultiShape(s) => s.write_create(writer),
        }
    }

    pub fn write_destroy(&self, writer: &mut PacketWriter) -> Result<()> {
        self.common().write_destroy(writer)
    }

    pub fn write_update(&self, writer: &mut PacketWriter, subset: UpdateFlags) -> Result<()> {
        self.common().write_update(writer, subset)
    }

    pub fn enumerate_resources(&self) -> Vec<u32> {
        match self {
            Shape::MeshSet(s) => s.enumerate_resources(),
            Shape::PointCloud(s) => s.enumerate_resources(),
            _ => Vec::new(),
        }
    }

    /// Decode a Create message into the shape kind `routing_id` names.
    /// Generic dispatch point used by `crate::handler`, which owns one
    /// handler per routing ID rather than one per concrete shape type.
    pub fn read_create(routing_id: RoutingId, reader: &mut PacketReader) -> Result<Self> {
        use RoutingId::*;
        Ok(match routing_id {
            Sphere => Shape::Simple(SimpleShape::read_create(SimpleKind::Sphere, reader)?),
            Box => Shape::Simple(SimpleShape::read_create(SimpleKind::Box, reader)?),
            Star => Shape::Simple(SimpleShape::read_create(SimpleKind::Star, reader)?),
            Plane => Shape::Simple(SimpleShape::read_create(SimpleKind::Plane, reader)?),
            Pose => Shape::Simple(SimpleShape::read_create(SimpleKind::Pose, reader)?),
            Arrow => Shape::Directional(DirectionalShape::read_create(DirectionalKind::Arrow, reader)?),
            Cylinder => Shape::Directional(DirectionalShape::read_create(DirectionalKind::Cylinder, reader)?),
            Cone => Shape::Directional(DirectionalShape::read_create(DirectionalKind::Cone, reader)?),
            Capsule => Shape::Directional(DirectionalShape::read_create(DirectionalKind::Capsule, reader)?),
            Text2D => Shape::Text2D(Text2DShape::read_create(reader)?),
            Text3D => Shape::Text3D(Text3DShape::read_create(reader)?),
            MeshSet => Shape::MeshSet(MeshSetShape::read_create(reader)?),
            MeshShape => Shape::MeshShape(MeshShapeData::read_create(reader)?),
            PointCloud => Shape::PointCloud(PointCloudShapeData::read_create(reader)?),
            MultiShape => Shape::MultiShape(MultiShapeData::read_create(reader)?),
            other => return Err(TesError::UnknownRouting(other as u16)),
        })
    }

    /// Feed one Data message to a complex shape mid-construction. Simple
    /// shape kinds have no Data phase; receiving one for them is malformed.
    pub fn read_data(&mut self, reader: &mut PacketReader) -> Result<WriteDataStatus> {
        match self {
            Shape::Text2D(s) => s.read_data(reader),
            Shape::Text3D(s) => s.read_data(reader),
            Shape::MeshShape(s) => s.read_data(reader),
            Shape::PointCloud(s) => s.read_data(reader),
            Shape::MultiShape(s) => s.read_data(reader),
            Shape::Simple(_) | Shape::Directional(_) | Shape::MeshSet(_) => Err(TesError::Malformed(
                "Data message received for a shape kind with no Data phase".into(),
            )),
        }
    }

    pub fn write_data(&self, writer: &mut PacketWriter, progress: &mut u32) -> Result<WriteDataStatus> {
        match self {
            Shape::Text2D(s) => s.write_data(writer, progress),
            Shape::Text3D(s) => s.write_data(writer, progress),
            Shape::MeshShape(s) => s.write_data(writer, progress),
            Shape::PointCloud(s) => s.write_data(writer, progress),
            Shape::MultiShape(s) => s.write_data(writer, progress),
            Shape::Simple(_) | Shape::Directional(_) | Shape::MeshSet(_) => Ok(WriteDataStatus::Done),
        }
    }

    /// World-space bounds computable from the shape's own data. `MeshSet`
    /// and `PointCloud` additionally depend on a referenced mesh resource's
    /// vertex data; `crate::handler` resolves those separately and this
    /// returns just the shape's origin point as a placeholder extent.
    pub fn world_bounds(&self) -> Aabb {
        let common = self.common();
        let position = common.attributes.position_vec3();
        let rotation = common.attributes.rotation_quaternion();
        let scale = Vector3::new(
            common.attributes.scale[0],
            common.attributes.scale[1],
            common.attributes.scale[2],
        );
        match self {
            Shape::Directional(s) => transform_aabb(s.local_bounds(), Vector3::new(1.0, 1.0, 1.0), rotation, position),
            Shape::MeshShape(s) => mesh_shape_vertex_bounds(s)
                .map(|b| transform_aabb(b, scale, rotation, position))
                .unwrap_or_else(|| Aabb::from_point(position)),
            Shape::MultiShape(s) => multi_shape_item_bounds(s).unwrap_or_else(|| Aabb::from_point(position)),
            Shape::MeshSet(_) | Shape::PointCloud(_) => Aabb::from_point(position),
            _ => transform_aabb(unit_cube(), scale, rotation, position),
        }
    }
}

fn unit_cube() -> Aabb {
    Aabb::new(Vector3::new(-1.0, -1.0, -1.0), Vector3::new(1.0, 1.0, 1.0))
}

/// Scale, rotate and translate `local`'s eight corners, returning their
/// world-space AABB (a coarse but correct over-approximation of the
/// rotated box, matching how the culler only needs an enclosing AABB).
pub fn transform_aabb(local: Aabb, scale: Vector3, rotation: Quaternion, position: Vector3) -> Aabb {
    let corners = [
        Vector3::new(local.min.x, local.min.y, local.min.z),
        Vector3::new(local.min.x, local.min.y, local.max.z),
        Vector3::new(local.min.x, local.max.y, local.min.z),
        Vector3::new(local.min.x, local.max.y, local.max.z),
        Vector3::new(local.max.x, local.min.y, local.min.z),
        Vector3::new(local.max.x, local.min.y, local.max.z),
        Vector3::new(local.max.x, local.max.y, local.min.z),
        Vector3::new(local.max.x, local.max.y, local.max.z),
    ];
    let world: Vec<Vector3> = corners
        .iter()
        .map(|c| {
            let scaled = Vector3::new(c.x * scale.x, c.y * scale.y, c.z * scale.z);
            rotation.rotate(scaled) + position
        })
        .collect();
    Aabb::from_points(&world).unwrap_or_else(|| Aabb::from_point(position))
}

fn mesh_shape_vertex_bounds(shape: &MeshShapeData) -> Option<Aabb> {
    let bytes = shape.vertices.as_ref()?;
    let points: Vec<Vector3> = bytes
        .chunks_exact(12)
        .map(|c| {
            Vector3::new(
                f32::from_le_bytes(c[0..4].try_into().unwrap()) as f64,
                f32::from_le_bytes(c[4..8].try_into().unwrap()) as f64,
                f32::from_le_bytes(c[8..12].try_into().unwrap()) as f64,
            )
        })
        .collect();
    Aabb::from_points(&points)
}

fn multi_shape_item_bounds(shape: &MultiShapeData) -> Option<Aabb> {
    let points: Vec<Vector3> = shape
        .items
        .iter()
        .map(|a| Vector3::new(a.position[0], a.position[1], a.position[2]))
        .collect();
    Aabb::from_points(&points)
}
