//! MultiShape: a single shape ID standing in for a large, uniform batch of
//! instance transforms (`spec.md` §4.5). The Create message carries as many
//! instances as fit, and any remainder streams across Data messages in
//! fixed-size blocks.

use crate::error::Result;
use crate::messages::ObjectAttributes;
use crate::packet::{PacketReader, PacketWriter};

use super::{CommonRecord, ComplexShape, ShapeFlags, WriteDataStatus};

/// Maximum instance attribute records per message. Halved when the shape
/// carries `DoublePrecision`, since each record then costs twice the bytes.
/// The wire format doesn't encode this constant; both ends must agree on it
/// out of band, as they agree on `MAX_PAYLOAD_SIZE`.
pub const BLOCK_COUNT_LIMIT: usize = 4096;

fn block_limit(flags: ShapeFlags) -> usize {
    if flags.contains(ShapeFlags::DOUBLE_PRECISION) {
        BLOCK_COUNT_LIMIT / 2
    } else {
        BLOCK_COUNT_LIMIT
    }
}

#[derive(Debug, Clone)]
pub struct MultiShapeData {
    pub common: CommonRecord,
    pub items: Vec<ObjectAttributes<f64>>,
}

impl MultiShapeData {
    pub fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        self.common.write(writer)?;
        writer.write_element(self.items.len() as u32)?;

        let limit = block_limit(self.common.flags);
        let single = !self.common.flags.contains(ShapeFlags::DOUBLE_PRECISION);
        let inline_count = self.items.len().min(limit);
        writer.write_element(inline_count as u32)?;
        for item in &self.items[..inline_count] {
            if single {
                item.to_f32().write(writer)?;
            } else {
                item.write(writer)?;
            }
        }
        Ok(())
    }

    pub fn read_create(reader: &mut PacketReader) -> Result<Self> {
        let common = CommonRecord::read(reader)?;
        let total_count: u32 = reader.read_element()?;
        let inline_count: u32 = reader.read_element()?;
        let single = !common.flags.contains(ShapeFlags::DOUBLE_PRECISION);
        let mut items = Vec::with_capacity(total_count as usize);
        for _ in 0..inline_count {
            let item = if single {
                ObjectAttributes::<f32>::read(reader)?.to_f64()
            } else {
                ObjectAttributes::<f64>::read(reader)?
            };
            items.push(item);
        }
        Ok(MultiShapeData { common, items })
    }
}

impl ComplexShape for MultiShapeData {
    fn write_data(&self, writer: &mut PacketWriter, progress: &mut u32) -> Result<WriteDataStatus> {
        let limit = block_limit(self.common.flags);
        let single = !self.common.flags.contains(ShapeFlags::DOUBLE_PRECISION);
        let offset = *progress as usize;
        let remaining = self.items.len().saturating_sub(offset);
        let block = remaining.min(limit);

        writer.write_element(offset as u32)?;
        writer.write_element(block as u32)?;
        for item in &self.items[offset..offset + block] {
            if single {
                item.to_f32().write(writer)?;
            } else {
                item.write(writer)?;
            }
        }

        let next = offset + block;
        if next < self.items.len() {
            *progress = next as u32;
            Ok(WriteDataStatus::More)
        } else {
            Ok(WriteDataStatus::Done)
        }
    }

    fn read_data(&mut self, reader: &mut PacketReader) -> Result<WriteDataStatus> {
        let offset: u32 = reader.read_element()?;
        let block: u32 = reader.read_element()?;
        let single = !self.common.flags.contains(ShapeFlags::DOUBLE_PRECISION);

        if self.items.len() < (offset + block) as usize {
            self.items.resize(
                (offset + block) as usize,
                ObjectAttributes::identity(1.0, 0.0),
            );
        }
        for i in 0..block {
            let item = if single {
                ObjectAttributes::<f32>::read(reader)?.to_f64()
            } else {
                ObjectAttributes::<f64>::read(reader)?
            };
            self.items[(offset + i) as usize] = item;
        }

        if block == 0 {
            Ok(WriteDataStatus::Done)
        } else {
            Ok(WriteDataStatus::More)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{RoutingId, ShapeMessageId};

    #[test]
    fn create_carries_up_to_block_limit_then_data_streams_rest() {
        let common = CommonRecord::new(1, 0, ShapeFlags::empty(), ObjectAttributes::identity(1.0, 0.0));
        let items: Vec<_> = (0..10)
            .map(|i| {
                let mut attrs = ObjectAttributes::<f64>::identity(1.0, 0.0);
                attrs.position[0] = i as f64;
                attrs
            })
            .collect();
        let shape = MultiShapeData {
            common,
            items: items.clone(),
        };

        let mut writer = PacketWriter::new(RoutingId::Sphere as u16, ShapeMessageId::Create as u16);
        shape.write_create(&mut writer).unwrap();
        let bytes = writer.finalise().unwrap();
        let mut reader = PacketReader::new(&bytes).unwrap();
        let mut decoded = MultiShapeData::read_create(&mut reader).unwrap();
        assert_eq!(decoded.items.len(), 10);

        decoded.items.resize(10, ObjectAttributes::identity(1.0, 0.0));
        let mut progress = 0u32;
        let mut writer = PacketWriter::new(RoutingId::Sphere as u16, ShapeMessageId::Data as u16);
        let status = shape.write_data(&mut writer, &mut progress).unwrap();
        assert_eq!(status, WriteDataStatus::Done);
    }

    #[test]
    fn block_limit_halves_under_double_precision() {
        assert_eq!(block_limit(ShapeFlags::DOUBLE_PRECISION), BLOCK_COUNT_LIMIT / 2);
        assert_eq!(block_limit(ShapeFlags::empty()), BLOCK_COUNT_LIMIT);
    }
}
