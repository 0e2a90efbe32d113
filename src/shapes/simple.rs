//! Sphere, Box, Star, Plane, Pose: shapes with no semantics beyond the
//! common transform (`spec.md` §4.5 "Box, Sphere, Star, Plane, Pose:
//! generic transform").

use crate::error::Result;
use crate::messages::RoutingId;
use crate::packet::{PacketReader, PacketWriter};

use super::CommonRecord;

/// Distinguishes which routing ID a [`SimpleShape`] serialises as; these
/// five kinds share an identical wire layout (the common record alone).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleKind {
    Sphere,
    Box,
    Star,
    Plane,
    Pose,
}

impl SimpleKind {
    pub fn routing_id(self) -> RoutingId {
        match self {
            SimpleKind::Sphere => RoutingId::Sphere,
            SimpleKind::Box => RoutingId::Box,
            SimpleKind::Star => RoutingId::Star,
            SimpleKind::Plane => RoutingId::Plane,
            SimpleKind::Pose => RoutingId::Pose,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimpleShape {
    pub kind: SimpleKind,
    pub common: CommonRecord,
}

impl SimpleShape {
    pub fn new(kind: SimpleKind, common: CommonRecord) -> Self {
        SimpleShape { kind, common }
    }

    pub fn routing_id(&self) -> RoutingId {
        self.kind.routing_id()
    }

    pub fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        self.common.write(writer)
    }

    pub fn read_create(kind: SimpleKind, reader: &mut PacketReader) -> Result<Self> {
        let common = CommonRecord::read(reader)?;
        Ok(SimpleShape { kind, common })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ObjectAttributes, ShapeMessageId};
    use crate::packet::PacketWriter;
    use crate::shapes::ShapeFlags;

    #[test]
    fn sphere_create_roundtrip() {
        let attrs = ObjectAttributes::<f64>::identity(1.0, 0.0);
        let common = CommonRecord::new(7, 0, ShapeFlags::empty(), attrs);
        let shape = SimpleShape::new(SimpleKind::Sphere, common);

        let mut writer = PacketWriter::new(shape.routing_id() as u16, ShapeMessageId::Create as u16);
        shape.write_create(&mut writer).unwrap();
        let bytes = writer.finalise().unwrap();

        let mut reader = PacketReader::new(&bytes).unwrap();
        let decoded = SimpleShape::read_create(SimpleKind::Sphere, &mut reader).unwrap();
        assert_eq!(decoded.common.id, 7);
    }
}
