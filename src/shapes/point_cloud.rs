//! PointCloudShape: references a mesh resource's vertices through a sliced
//! index array rather than owning geometry itself (`spec.md` §4.5).

use crate::data_buffer::{DataBuffer, ElementType};
use crate::error::Result;
use crate::messages::RoutingId;
use crate::packet::{PacketReader, PacketWriter};

use super::{CommonRecord, ComplexShape, WriteDataStatus};

#[derive(Debug, Clone)]
pub struct PointCloudShapeData {
    pub common: CommonRecord,
    pub mesh_id: u32,
    pub index_count: u32,
    pub point_scale: f64,
    /// Indices into the referenced mesh's vertex array, selecting which
    /// points this cloud draws. `u32` little-endian, populated across one
    /// or more Data messages.
    pub indices: Vec<u32>,
}

impl PointCloudShapeData {
    pub fn routing_id(&self) -> RoutingId {
        RoutingId::PointCloud
    }

    pub fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        self.common.write(writer)?;
        writer.write_element(self.mesh_id)?;
        writer.write_element(self.index_count)?;
        writer.write_element(self.point_scale as f32)?;
        Ok(())
    }

    pub fn read_create(reader: &mut PacketReader) -> Result<Self> {
        let common = CommonRecord::read(reader)?;
        let mesh_id = reader.read_element()?;
        let index_count = reader.read_element()?;
        let point_scale = reader.read_element::<f32>()? as f64;
        Ok(PointCloudShapeData {
            common,
            mesh_id,
            index_count,
            point_scale,
            indices: Vec::new(),
        })
    }

    pub fn enumerate_resources(&self) -> Vec<u32> {
        vec![self.mesh_id]
    }
}

impl ComplexShape for PointCloudShapeData {
    fn write_data(&self, writer: &mut PacketWriter, progress: &mut u32) -> Result<WriteDataStatus> {
        let offset = *progress as usize;
        let raw: Vec<u8> = self.indices.iter().flat_map(|v| v.to_le_bytes()).collect();
        let buffer = DataBuffer::borrowed(ElementType::U32, 1, 1, self.indices.len(), None, &raw)?;
        let written = buffer.write(writer, offset, 4096)?;
        let next = offset + written;
        if next < self.indices.len() {
            *progress = next as u32;
            Ok(WriteDataStatus::More)
        } else {
            Ok(WriteDataStatus::Done)
        }
    }

    fn read_data(&mut self, reader: &mut PacketReader) -> Result<WriteDataStatus> {
        let buffer = DataBuffer::read(reader)?;
        for i in 0..buffer.count() {
            self.indices.push(buffer.get::<u32>(i, 0)?);
        }
        if self.indices.len() as u32 >= self.index_count {
            Ok(WriteDataStatus::Done)
        } else {
            Ok(WriteDataStatus::More)
        }
    }
}
