//! Text2D and Text3D: shapes carrying a length-prefixed UTF-8 payload
//! (`spec.md` §4.5).

use crate::error::Result;
use crate::packet::{PacketReader, PacketWriter};

use super::{CommonRecord, ComplexShape, ShapeFlags, WriteDataStatus};

/// Screen-space (or, with [`ShapeFlags::TEXT_WORLD_SPACE`], world-space)
/// text. The Create message carries the full text payload, so these shapes
/// are "complex" only in the sense that a single Data-less Create already
/// completes them; [`Text2DShape::write_data`] always reports `Done`
/// immediately, matching the handler's view of a one-shot definition.
#[derive(Debug, Clone)]
pub struct Text2DShape {
    pub common: CommonRecord,
    pub text: String,
}

impl Text2DShape {
    pub fn is_world_space(&self) -> bool {
        self.common.flags.contains(ShapeFlags::TEXT_WORLD_SPACE)
    }

    pub fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        self.common.write(writer)?;
        writer.write_string(&self.text)?;
        Ok(())
    }

    pub fn read_create(reader: &mut PacketReader) -> Result<Self> {
        let common = CommonRecord::read(reader)?;
        let text = reader.read_string()?;
        Ok(Text2DShape { common, text })
    }
}

impl ComplexShape for Text2DShape {
    fn write_data(&self, _writer: &mut PacketWriter, _progress: &mut u32) -> Result<WriteDataStatus> {
        Ok(WriteDataStatus::Done)
    }

    fn read_data(&mut self, _reader: &mut PacketReader) -> Result<WriteDataStatus> {
        Ok(WriteDataStatus::Done)
    }
}

/// World-space text billboard. Supports a screen-facing flag; font size is
/// carried in `scale.z` of the common attributes.
#[derive(Debug, Clone)]
pub struct Text3DShape {
    pub common: CommonRecord,
    pub text: String,
}

impl Text3DShape {
    pub fn is_screen_facing(&self) -> bool {
        self.common.flags.contains(ShapeFlags::TEXT_SCREEN_FACING)
    }

    pub fn font_size(&self) -> f64 {
        self.common.attributes.scale[2]
    }

    pub fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        self.common.write(writer)?;
        writer.write_string(&self.text)?;
        Ok(())
    }

    pub fn read_create(reader: &mut PacketReader) -> Result<Self> {
        let common = CommonRecord::read(reader)?;
        let text = reader.read_string()?;
        Ok(Text3DShape { common, text })
    }
}

impl ComplexShape for Text3DShape {
    fn write_data(&self, _writer: &mut PacketWriter, _progress: &mut u32) -> Result<WriteDataStatus> {
        Ok(WriteDataStatus::Done)
    }

    fn read_data(&mut self, _reader: &mut PacketReader) -> Result<WriteDataStatus> {
        Ok(WriteDataStatus::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ObjectAttributes;
    use crate::messages::RoutingId;
    use crate::messages::ShapeMessageId;

    #[test]
    fn text2d_roundtrip() {
        let common = CommonRecord::new(
            1,
            0,
            ShapeFlags::TEXT_WORLD_SPACE,
            ObjectAttributes::identity(1.0, 0.0),
        );
        let shape = Text2DShape {
            common,
            text: "hud label".into(),
        };
        let mut writer = PacketWriter::new(RoutingId::Text2D as u16, ShapeMessageId::Create as u16);
        shape.write_create(&mut writer).unwrap();
        let bytes = writer.finalise().unwrap();

        let mut reader = PacketReader::new(&bytes).unwrap();
        let decoded = Text2DShape::read_create(&mut reader).unwrap();
        assert_eq!(decoded.text, "hud label");
        assert!(decoded.is_world_space());
    }
}
