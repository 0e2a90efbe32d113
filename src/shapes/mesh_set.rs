//! MeshSet: a shape that positions a fixed list of mesh-resource "parts",
//! each with its own transform and tint (`spec.md` §4.5).

use crate::error::Result;
use crate::messages::ObjectAttributes;
use crate::packet::{PacketReader, PacketWriter};

use super::CommonRecord;

/// One part of a MeshSet: a mesh resource reference plus a per-part
/// transform and tint. Precision matches the owning shape's
/// `DoublePrecision` flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshSetPart {
    pub mesh_id: u32,
    pub tint: u32,
    pub transform: ObjectAttributes<f64>,
}

/// Destroying a MeshSet destroys all of its parts but never the mesh
/// resources they reference (`spec.md` §4.5).
#[derive(Debug, Clone)]
pub struct MeshSetShape {
    pub common: CommonRecord,
    pub parts: Vec<MeshSetPart>,
}

impl MeshSetShape {
    pub fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        self.common.write(writer)?;
        writer.write_element(self.parts.len() as u16)?;
        let single = !self
            .common
            .flags
            .contains(super::ShapeFlags::DOUBLE_PRECISION);
        for part in &self.parts {
            writer.write_element(part.mesh_id)?;
            writer.write_element(part.tint)?;
            if single {
                part.transform.to_f32().write(writer)?;
            } else {
                part.transform.write(writer)?;
            }
        }
        Ok(())
    }

    pub fn read_create(reader: &mut PacketReader) -> Result<Self> {
        let common = CommonRecord::read(reader)?;
        let part_count: u16 = reader.read_element()?;
        let single = !common.flags.contains(super::ShapeFlags::DOUBLE_PRECISION);
        let mut parts = Vec::with_capacity(part_count as usize);
        for _ in 0..part_count {
            let mesh_id = reader.read_element()?;
            let tint = reader.read_element()?;
            let transform = if single {
                ObjectAttributes::<f32>::read(reader)?.to_f64()
            } else {
                ObjectAttributes::<f64>::read(reader)?
            };
            parts.push(MeshSetPart {
                mesh_id,
                tint,
                transform,
            });
        }
        Ok(MeshSetShape { common, parts })
    }

    pub fn enumerate_resources(&self) -> Vec<u32> {
        self.parts.iter().map(|p| p.mesh_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{RoutingId, ShapeMessageId};
    use crate::shapes::ShapeFlags;

    #[test]
    fn mesh_set_roundtrip() {
        let common = CommonRecord::new(1, 0, ShapeFlags::empty(), ObjectAttributes::identity(1.0, 0.0));
        let shape = MeshSetShape {
            common,
            parts: vec![
                MeshSetPart {
                    mesh_id: 10,
                    tint: 0xFFFFFFFF,
                    transform: ObjectAttributes::identity(1.0, 0.0),
                },
                MeshSetPart {
                    mesh_id: 11,
                    tint: 0x80808080,
                    transform: ObjectAttributes::identity(1.0, 0.0),
                },
            ],
        };
        let mut writer = PacketWriter::new(RoutingId::MeshSet as u16, ShapeMessageId::Create as u16);
        shape.write_create(&mut writer).unwrap();
        let bytes = writer.finalise().unwrap();

        let mut reader = PacketReader::new(&bytes).unwrap();
        let decoded = MeshSetShape::read_create(&mut reader).unwrap();
        assert_eq!(decoded.parts.len(), 2);
        assert_eq!(decoded.enumerate_resources(), vec![10, 11]);
    }
}
