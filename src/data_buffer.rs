//! Typed-but-dynamically-described vertex/index storage (`spec.md` §4.4),
//! used by mesh components and point-cloud index streams.

use std::borrow::Cow;

use crate::codec::Primitive;
use crate::error::{Result, TesError};
use crate::packet::{PacketReader, PacketWriter};

/// Wire element type tag (`spec.md` §4.4/§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementType {
    I8 = 0,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// Sign-extended 16-bit integer, multiplied by a preceding `f32` scale.
    PackedF16,
    /// 32-bit integer, multiplied by a preceding `f64` scale.
    PackedF32,
}

impl ElementType {
    pub fn from_u8(tag: u8) -> Result<Self> {
        use ElementType::*;
        Ok(match tag {
            0 => I8,
            1 => U8,
            2 => I16,
            3 => U16,
            4 => I32,
            5 => U32,
            6 => I64,
            7 => U64,
            8 => F32,
            9 => F64,
            10 => PackedF16,
            11 => PackedF32,
            other => return Err(TesError::Malformed(format!("unknown element type tag {other}"))),
        })
    }

    /// Raw on-wire width of one element, before any quantisation scale.
    pub fn raw_size(self) -> usize {
        use ElementType::*;
        match self {
            I8 | U8 => 1,
            I16 | U16 | PackedF16 => 2,
            I32 | U32 | F32 | PackedF32 => 4,
            I64 | U64 | F64 => 8,
        }
    }

    pub fn is_quantised(self) -> bool {
        matches!(self, ElementType::PackedF16 | ElementType::PackedF32)
    }

    fn decode_raw(self, bytes: &[u8]) -> f64 {
        use ElementType::*;
        match self {
            I8 => i8::read_le(bytes).to_f64(),
            U8 => u8::read_le(bytes).to_f64(),
            I16 => i16::read_le(bytes).to_f64(),
            U16 => u16::read_le(bytes).to_f64(),
            I32 => i32::read_le(bytes).to_f64(),
            U32 => u32::read_le(bytes).to_f64(),
            I64 => i64::read_le(bytes).to_f64(),
            U64 => u64::read_le(bytes).to_f64(),
            F32 => f32::read_le(bytes).to_f64(),
            F64 => f64::read_le(bytes).to_f64(),
            PackedF16 => i16::read_le(bytes) as f64,
            PackedF32 => i32::read_le(bytes) as f64,
        }
    }

    fn encode_raw(self, value: f64, buf: &mut [u8]) {
        use ElementType::*;
        match self {
            I8 => i8::from_f64(value).write_le(buf),
            U8 => u8::from_f64(value).write_le(buf),
            I16 => i16::from_f64(value).write_le(buf),
            U16 => u16::from_f64(value).write_le(buf),
            I32 => i32::from_f64(value).write_le(buf),
            U32 => u32::from_f64(value).write_le(buf),
            I64 => i64::from_f64(value).write_le(buf),
            U64 => u64::from_f64(value).write_le(buf),
            F32 => (value as f32).write_le(buf),
            F64 => value.write_le(buf),
            PackedF16 => (value as i16).write_le(buf),
            PackedF32 => (value as i32).write_le(buf),
        }
    }
}

/// Typed, strided view over vertex/index data. Can borrow an external byte
/// slice or own a copy; `get`/`set` convert element-by-element, applying
/// quantisation scale for packed element types.
#[derive(Debug, Clone)]
pub struct DataBuffer<'a> {
    element_type: ElementType,
    component_count: u8,
    /// Distance, in elements, between the first component of successive
    /// items. Always `>= component_count`.
    stride: usize,
    count: usize,
    scale: Option<f64>,
    data: Cow<'a, [u8]>,
}

impl<'a> DataBuffer<'a> {
    /// Borrow an external byte slice already encoded as `element_type`.
    pub fn borrowed(
        element_type: ElementType,
        component_count: u8,
        stride: usize,
        count: usize,
        scale: Option<f64>,
        data: &'a [u8],
    ) -> Result<Self> {
        let stride = stride.max(component_count as usize);
        let required = stride * count.saturating_sub(1) + component_count as usize;
        if data.len() < required * element_type.raw_size() {
            return Err(TesError::Invalid(
                "data buffer slice shorter than component_count/stride/count imply".into(),
            ));
        }
        Ok(DataBuffer {
            element_type,
            component_count,
            stride,
            count,
            scale,
            data: Cow::Borrowed(data),
        })
    }

    /// Clone this view into one that owns its storage.
    pub fn to_owned_buffer(&self) -> DataBuffer<'static> {
        DataBuffer {
            element_type: self.element_type,
            component_count: self.component_count,
            stride: self.stride,
            count: self.count,
            scale: self.scale,
            data: Cow::Owned(self.data.clone().into_owned()),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn component_count(&self) -> u8 {
        self.component_count
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Read `item`'s `component`-th value, converted to `U` (dequantising
    /// packed element types via the stored scale).
    pub fn get<U: Primitive>(&self, item: usize, component: u8) -> Result<U> {
        if item >= self.count || component >= self.component_count {
            return Err(TesError::Invalid(format!(
                "data buffer index out of range: item {item}/{}, component {component}/{}",
                self.count, self.component_count
            )));
        }
        let element_index = item * self.stride + component as usize;
        let byte_size = self.element_type.raw_size();
        let offset = element_index * byte_size;
        let raw = self.element_type.decode_raw(&self.data[offset..offset + byte_size]);
        let value = if self.element_type.is_quantised() {
            raw * self.scale.unwrap_or(1.0)
        } else {
            raw
        };
        Ok(U::from_f64(value))
    }

    /// Emit: element type tag, component count, stride, optional
    /// quantisation scale, item count (u16), then `count`-many strided
    /// elements, stopping early (and reporting how many items were written)
    /// once `byte_limit` would be exceeded.
    pub fn write(&self, writer: &mut PacketWriter, offset: usize, byte_limit: usize) -> Result<usize> {
        let start_len = writer.payload_len();
        writer.write_element(self.element_type as u8)?;
        writer.write_element(self.component_count)?;
        writer.write_element(self.stride as u8)?;
        if self.element_type.is_quantised() {
            match self.element_type {
                ElementType::PackedF16 => writer.write_element(self.scale.unwrap_or(1.0) as f32)?,
                ElementType::PackedF32 => writer.write_element(self.scale.unwrap_or(1.0))?,
                _ => unreachable!(),
            }
        }

        let remaining_items = self.count.saturating_sub(offset);
        let element_size = self.element_type.raw_size();
        let per_item_bytes = self.component_count as usize * element_size;
        let spent_so_far = writer.payload_len() - start_len;
        let budget_for_items = byte_limit.saturating_sub(spent_so_far + 2 /* count field */);
        let max_items_by_budget = if per_item_bytes == 0 {
            remaining_items
        } else {
            budget_for_items / per_item_bytes
        };
        let items_to_write = remaining_items.min(max_items_by_budget);

        writer.write_element(items_to_write as u16)?;
        for i in 0..items_to_write {
            for c in 0..self.component_count {
                let element_index = (offset + i) * self.stride + c as usize;
                let byte_offset = element_index * element_size;
                let raw_bytes = &self.data[byte_offset..byte_offset + element_size];
                let raw_value = self.element_type.decode_raw(raw_bytes);
                let mut buf = vec![0u8; element_size];
                self.element_type.encode_raw(raw_value, &mut buf);
                writer.write_raw_bytes(&buf)?;
            }
        }
        Ok(items_to_write)
    }

    /// Inverse of [`DataBuffer::write`]: decode a newly-owned buffer from
    /// `reader`.
    pub fn read(reader: &mut PacketReader) -> Result<DataBuffer<'static>> {
        let element_type = ElementType::from_u8(reader.read_element()?)?;
        let component_count: u8 = reader.read_element()?;
        let stride: u8 = reader.read_element()?;
        let scale = if element_type.is_quantised() {
            Some(match element_type {
                ElementType::PackedF16 => reader.read_element::<f32>()? as f64,
                ElementType::PackedF32 => reader.read_element::<f64>()?,
                _ => unreachable!(),
            })
        } else {
            None
        };
        let item_count: u16 = reader.read_element()?;
        let element_size = element_type.raw_size();
        let mut bytes = Vec::with_capacity(item_count as usize * component_count as usize * element_size);
        for _ in 0..item_count {
            for _ in 0..component_count {
                let chunk = reader.read_array::<u8>(element_size)?;
                bytes.extend_from_slice(&chunk);
            }
        }
        Ok(DataBuffer {
            element_type,
            component_count,
            stride: (stride as usize).max(component_count as usize),
            count: item_count as usize,
            scale,
            data: Cow::Owned(bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RoutingId;

    #[test]
    fn f32_roundtrip_through_packet() {
        let raw: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let buffer = DataBuffer::borrowed(ElementType::F32, 3, 3, 2, None, &raw).unwrap();

        let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
        let written = buffer.write(&mut writer, 0, 4096).unwrap();
        assert_eq!(written, 2);
        let bytes = writer.finalise().unwrap();

        let mut reader = PacketReader::new(&bytes).unwrap();
        let decoded = DataBuffer::read(&mut reader).unwrap();
        assert_eq!(decoded.count(), 2);
        assert_eq!(decoded.get::<f32>(1, 2).unwrap(), 6.0);
    }

    #[test]
    fn packed_f16_dequantises_with_scale() {
        let raw: Vec<u8> = [1000i16, -1000, 500]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let buffer = DataBuffer::borrowed(ElementType::PackedF16, 3, 3, 1, Some(0.001), &raw).unwrap();
        assert_eq!(buffer.get::<f64>(0, 0).unwrap(), 1.0);
        assert_eq!(buffer.get::<f64>(0, 1).unwrap(), -1.0);
        assert_eq!(buffer.get::<f64>(0, 2).unwrap(), 0.5);
    }

    #[test]
    fn write_honours_byte_budget() {
        let raw: Vec<u8> = [1.0f32; 30].iter().flat_map(|v| v.to_le_bytes()).collect();
        let buffer = DataBuffer::borrowed(ElementType::F32, 3, 3, 10, None, &raw).unwrap();
        let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
        // Budget only large enough for a handful of items.
        let written = buffer.write(&mut writer, 0, 40).unwrap();
        assert!(written < 10);
    }

    #[test]
    fn out_of_range_access_is_invalid() {
        let raw = [0u8; 12];
        let buffer = DataBuffer::borrowed(ElementType::F32, 3, 3, 1, None, &raw).unwrap();
        assert!(buffer.get::<f32>(5, 0).is_err());
    }
}
