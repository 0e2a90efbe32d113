//! MeshShape: an inline (non-resource) mesh streamed directly in Data
//! messages (`spec.md` §4.5).

use bitflags::bitflags;

use crate::data_buffer::{DataBuffer, ElementType};
use crate::error::{Result, TesError};
use crate::mesh::DrawType;
use crate::messages::RoutingId;
use crate::packet::{PacketReader, PacketWriter};

use super::{CommonRecord, ComplexShape, WriteDataStatus};

/// Which array a Data message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SendType {
    Vertices = 0,
    Indices = 1,
    Normals = 2,
    /// Count is always 1; the single normal applies to every vertex.
    UniformNormal = 3,
    Colours = 4,
}

impl SendType {
    pub fn from_u16(value: u16) -> Result<Self> {
        use SendType::*;
        Ok(match value {
            0 => Vertices,
            1 => Indices,
            2 => Normals,
            3 => UniformNormal,
            4 => Colours,
            other => return Err(TesError::Malformed(format!("unknown mesh shape send type {other}"))),
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataMessageFlags: u8 {
        /// More Data messages for this stream (or shape) are expected.
        const EXPECT_END = 1 << 0;
        /// This is the final Data message for the shape.
        const END = 1 << 1;
    }
}

/// Order streams are emitted in; mirrors `write_data`'s fixed traversal.
const STREAM_ORDER: [SendType; 4] = [
    SendType::Vertices,
    SendType::Indices,
    SendType::Normals,
    SendType::Colours,
];

#[derive(Debug, Clone)]
pub struct MeshShapeData {
    pub common: CommonRecord,
    pub vertex_count: u32,
    pub index_count: u32,
    pub draw_type: DrawType,
    pub draw_scale: f64,
    pub vertices: Option<Vec<u8>>,
    pub indices: Option<Vec<u8>>,
    pub normals: Option<Vec<u8>>,
    pub uniform_normal: Option<[f32; 3]>,
    pub colours: Option<Vec<u8>>,
}

impl MeshShapeData {
    pub fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        self.common.write(writer)?;
        writer.write_element(self.vertex_count)?;
        writer.write_element(self.index_count)?;
        writer.write_element(self.draw_type as u8)?;
        writer.write_element(self.draw_scale as f32)?;
        Ok(())
    }

    pub fn read_create(reader: &mut PacketReader) -> Result<Self> {
        let common = CommonRecord::read(reader)?;
        let vertex_count = reader.read_element()?;
        let index_count = reader.read_element()?;
        let draw_type = DrawType::from_u8(reader.read_element()?)?;
        let draw_scale = reader.read_element::<f32>()? as f64;
        Ok(MeshShapeData {
            common,
            vertex_count,
            index_count,
            draw_type,
            draw_scale,
            vertices: None,
            indices: None,
            normals: None,
            uniform_normal: None,
            colours: None,
        })
    }

    fn stream_bytes(&self, send_type: SendType) -> Option<&[u8]> {
        match send_type {
            SendType::Vertices => self.vertices.as_deref(),
            SendType::Indices => self.indices.as_deref(),
            SendType::Normals => self.normals.as_deref(),
            SendType::Colours => self.colours.as_deref(),
            SendType::UniformNormal => None,
        }
    }

    fn element_type_for(&self, send_type: SendType) -> (ElementType, u8) {
        match send_type {
            SendType::Vertices | SendType::Normals => (ElementType::F32, 3),
            SendType::Indices => (ElementType::U32, 1),
            SendType::Colours => (ElementType::U32, 1),
            SendType::UniformNormal => (ElementType::F32, 3),
        }
    }
}

impl ComplexShape for MeshShapeData {
    /// `progress` packs a stream index (high byte) and an item offset
    /// (low 24 bits) within that stream.
    fn write_data(&self, writer: &mut PacketWriter, progress: &mut u32) -> Result<WriteDataStatus> {
        if let Some(normal) = self.uniform_normal {
            if *progress == 0 {
                writer.write_element(SendType::UniformNormal as u16)?;
                writer.write_element(DataMessageFlags::EXPECT_END.bits())?;
                writer.write_array(&normal)?;
                *progress = 1;
                return Ok(WriteDataStatus::More);
            }
        }

        let mut stream_index = (*progress >> 24) as usize;
        let item_offset = (*progress & 0x00FF_FFFF) as usize;

        while stream_index < STREAM_ORDER.len() {
            let send_type = STREAM_ORDER[stream_index];
            if let Some(bytes) = self.stream_bytes(send_type) {
                let (element_type, component_count) = self.element_type_for(send_type);
                let element_size = element_type.raw_size() * component_count as usize;
                let total_items = bytes.len() / element_size.max(1);
                let buffer = DataBuffer::borrowed(
                    element_type,
                    component_count,
                    component_count as usize,
                    total_items,
                    None,
                    bytes,
                )?;

                writer.write_element(send_type as u16)?;
                writer.write_element(DataMessageFlags::EXPECT_END.bits())?;
                let written = buffer.write(writer, item_offset, 4096)?;

                let next_offset = item_offset + written;
                if next_offset < total_items {
                    *progress = ((stream_index as u32) << 24) | next_offset as u32;
                    return Ok(WriteDataStatus::More);
                }
                stream_index += 1;
                *progress = (stream_index as u32) << 24;
                return Ok(WriteDataStatus::More);
            }
            stream_index += 1;
        }

        writer.write_element(SendType::Colours as u16)?;
        writer.write_element(DataMessageFlags::END.bits())?;
        writer.write_element(0u16)?; // zero-length terminator array
        Ok(WriteDataStatus::Done)
    }

    fn read_data(&mut self, reader: &mut PacketReader) -> Result<WriteDataStatus> {
        let send_type = SendType::from_u16(reader.read_element()?)?;
        let flags = DataMessageFlags::from_bits_truncate(reader.read_element()?);

        if send_type == SendType::UniformNormal {
            let normal: Vec<f32> = reader.read_array(3)?;
            self.uniform_normal = Some([normal[0], normal[1], normal[2]]);
        } else {
            let buffer = DataBuffer::read(reader)?;
            let mut bytes = Vec::with_capacity(buffer.count() * buffer.component_count() as usize * 4);
            for i in 0..buffer.count() {
                for c in 0..buffer.component_count() {
                    match buffer.element_type() {
                        ElementType::U32 => bytes.extend_from_slice(&buffer.get::<u32>(i, c)?.to_le_bytes()),
                        _ => bytes.extend_from_slice(&(buffer.get::<f32>(i, c)?).to_le_bytes()),
                    }
                }
            }
            let slot = match send_type {
                SendType::Vertices => &mut self.vertices,
                SendType::Indices => &mut self.indices,
                SendType::Normals => &mut self.normals,
                SendType::Colours => &mut self.colours,
                SendType::UniformNormal => unreachable!(),
            };
            *slot = Some(bytes);
        }

        if flags.contains(DataMessageFlags::END) {
            Ok(WriteDataStatus::Done)
        } else {
            Ok(WriteDataStatus::More)
        }
    }
}

impl MeshShapeData {
    pub fn routing_id(&self) -> RoutingId {
        RoutingId::MeshShape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ObjectAttributes, ShapeMessageId};
    use crate::shapes::ShapeFlags;

    #[test]
    fn create_roundtrip() {
        let common = CommonRecord::new(1, 0, ShapeFlags::empty(), ObjectAttributes::identity(1.0, 0.0));
        let shape = MeshShapeData {
            common,
            vertex_count: 3,
            index_count: 0,
            draw_type: DrawType::Triangles,
            draw_scale: 1.0,
            vertices: None,
            indices: None,
            normals: None,
            uniform_normal: None,
            colours: None,
        };
        let mut writer = PacketWriter::new(RoutingId::MeshShape as u16, ShapeMessageId::Create as u16);
        shape.write_create(&mut writer).unwrap();
        let bytes = writer.finalise().unwrap();
        let mut reader = PacketReader::new(&bytes).unwrap();
        let decoded = MeshShapeData::read_create(&mut reader).unwrap();
        assert_eq!(decoded.vertex_count, 3);
    }

    #[test]
    fn data_stream_vertices_then_terminates() {
        let common = CommonRecord::new(1, 0, ShapeFlags::empty(), ObjectAttributes::identity(1.0, 0.0));
        let verts: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let shape = MeshShapeData {
            common,
            vertex_count: 2,
            index_count: 0,
            draw_type: DrawType::Points,
            draw_scale: 1.0,
            vertices: Some(verts),
            indices: None,
            normals: None,
            uniform_normal: None,
            colours: None,
        };

        let mut progress = 0u32;
        let mut statuses = Vec::new();
        loop {
            let mut writer = PacketWriter::new(RoutingId::MeshShape as u16, ShapeMessageId::Data as u16);
            let status = shape.write_data(&mut writer, &mut progress).unwrap();
            statuses.push(status);
            if status == WriteDataStatus::Done {
                break;
            }
        }
        assert_eq!(statuses.last(), Some(&WriteDataStatus::Done));
    }
}
