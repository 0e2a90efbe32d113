//! Arrow, Cylinder, Cone, Capsule: shapes whose scale/rotation encode a
//! radius/length and a direction rather than a free transform (`spec.md`
//! §4.5).

use crate::error::Result;
use crate::messages::RoutingId;
use crate::packet::{PacketReader, PacketWriter};
use crate::types::{Aabb, Quaternion, Vector3};

use super::CommonRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionalKind {
    Arrow,
    Cylinder,
    Cone,
    Capsule,
}

impl DirectionalKind {
    pub fn routing_id(self) -> RoutingId {
        match self {
            DirectionalKind::Arrow => RoutingId::Arrow,
            DirectionalKind::Cylinder => RoutingId::Cylinder,
            DirectionalKind::Cone => RoutingId::Cone,
            DirectionalKind::Capsule => RoutingId::Capsule,
        }
    }
}

/// Arrow/Cylinder/Cone/Capsule share one wire layout: the common record
/// with `scale = (radius, radius, length)` and `rotation` encoding the
/// orientation of the canonical `(0, 0, 1)` axis.
#[derive(Debug, Clone)]
pub struct DirectionalShape {
    pub kind: DirectionalKind,
    pub common: CommonRecord,
}

impl DirectionalShape {
    /// Build from an explicit direction vector; computes the rotation
    /// against the canonical `+Z` axis, falling back to a 180-degree
    /// rotation when `direction` is antiparallel to it.
    pub fn from_direction(
        kind: DirectionalKind,
        mut common: CommonRecord,
        radius: f64,
        length: f64,
        direction: Vector3,
    ) -> Self {
        let rotation = Quaternion::from_canonical_to_direction(direction);
        common.attributes.scale = [radius, radius, length];
        common.attributes.rotation = [rotation.x, rotation.y, rotation.z, rotation.w];
        DirectionalShape { kind, common }
    }

    pub fn routing_id(&self) -> RoutingId {
        self.kind.routing_id()
    }

    pub fn radius(&self) -> f64 {
        self.common.attributes.scale[0]
    }

    pub fn length(&self) -> f64 {
        self.common.attributes.scale[2]
    }

    pub fn direction(&self) -> Vector3 {
        let r = &self.common.attributes.rotation;
        Quaternion::new(r[0], r[1], r[2], r[3]).to_direction()
    }

    /// Local-space bounds; Capsule extends the cylindrical bounds by its
    /// hemisphere radius along the axis (`spec.md` §3 "Capsule final bounds
    /// extend the cylindrical bounds by the hemisphere radius").
    pub fn local_bounds(&self) -> Aabb {
        let radius = self.radius();
        let half_length = self.length() * 0.5;
        let axis_extent = match self.kind {
            DirectionalKind::Capsule => half_length + radius,
            _ => half_length,
        };
        Aabb::new(
            Vector3::new(-radius, -radius, -axis_extent),
            Vector3::new(radius, radius, axis_extent),
        )
    }

    pub fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        self.common.write(writer)
    }

    pub fn read_create(kind: DirectionalKind, reader: &mut PacketReader) -> Result<Self> {
        let common = CommonRecord::read(reader)?;
        Ok(DirectionalShape { kind, common })
    }
}
