//! Packet framing: header layout, CRC-validated writer/reader (`spec.md`
//! §4.2, wire layout in §6).

use bitflags::bitflags;

use crate::codec::{Cursor, Primitive, Reader as ByteReader};
use crate::crc::{crc16, INITIAL_SEED};
use crate::error::{Result, TesError};

/// Constant marker every valid packet begins with.
pub const MARKER: u32 = 0x03E5_5E30;

/// Size in bytes of the fixed packet header (before payload).
pub const HEADER_SIZE: usize = 16;

/// Size in bytes of the trailing CRC16 (omitted when [`PacketFlags::NO_CRC`]
/// is set).
pub const CRC_SIZE: usize = 2;

/// Maximum total packet size (header + payload + optional CRC): the payload
/// length field is 16 bits.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

bitflags! {
    /// Packet-level flags (`spec.md` §3 "Packet").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        /// The packet has no trailing CRC16.
        const NO_CRC = 1 << 0;
    }
}

/// Decoded fixed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version_major: u16,
    pub version_minor: u16,
    pub routing_id: u16,
    pub message_id: u16,
    pub payload_size: u16,
    pub flags: PacketFlags,
}

/// Current wire protocol version this crate writes and expects.
pub const VERSION_MAJOR: u16 = 0;
pub const VERSION_MINOR: u16 = 2;

/// Accumulates a single packet's payload and stamps the header/CRC on
/// [`PacketWriter::finalise`].
///
/// Mirrors `spec.md` §4.2: "reserves header bytes, accumulates payload
/// through a positional cursor, records payload size, and finalises by
/// computing CRC and stamping the header."
pub struct PacketWriter {
    routing_id: u16,
    message_id: u16,
    flags: PacketFlags,
    payload: Cursor,
}

impl PacketWriter {
    pub fn new(routing_id: u16, message_id: u16) -> Self {
        Self::with_flags(routing_id, message_id, PacketFlags::empty())
    }

    pub fn with_flags(routing_id: u16, message_id: u16, flags: PacketFlags) -> Self {
        Self {
            routing_id,
            message_id,
            flags,
            payload: Cursor::new(),
        }
    }

    /// Write a single primitive element to the payload.
    pub fn write_element<T: Primitive>(&mut self, value: T) -> Result<()> {
        if self.payload.len() + T::SIZE > MAX_PAYLOAD_SIZE {
            return Err(TesError::ResourceExhausted(
                "packet payload would exceed 16-bit length".into(),
            ));
        }
        self.payload.write(value);
        Ok(())
    }

    /// Write an array of primitive elements to the payload.
    pub fn write_array<T: Primitive>(&mut self, values: &[T]) -> Result<()> {
        if self.payload.len() + values.len() * T::SIZE > MAX_PAYLOAD_SIZE {
            return Err(TesError::ResourceExhausted(
                "packet payload would exceed 16-bit length".into(),
            ));
        }
        self.payload.write_array(values);
        Ok(())
    }

    /// Write a length-prefixed (u16) UTF-8 string, as used by Text2D/Text3D.
    pub fn write_string(&mut self, text: &str) -> Result<()> {
        let bytes = text.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(TesError::ResourceExhausted("text payload too long".into()));
        }
        self.write_element(bytes.len() as u16)?;
        if self.payload.len() + bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(TesError::ResourceExhausted(
                "packet payload would exceed 16-bit length".into(),
            ));
        }
        self.payload.write_bytes(bytes);
        Ok(())
    }

    /// Current payload length in bytes.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Append raw bytes to the payload without any per-element framing.
    /// Used by the collation codec to embed pre-built packet bytes or a
    /// compressed blob.
    pub fn write_raw_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.payload.len() + bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(TesError::ResourceExhausted(
                "packet payload would exceed 16-bit length".into(),
            ));
        }
        self.payload.write_bytes(bytes);
        Ok(())
    }

    /// Stamp the header and, unless [`PacketFlags::NO_CRC`] is set, compute
    /// and append the trailing CRC16. Returns the complete packet bytes.
    pub fn finalise(self) -> Result<Vec<u8>> {
        let payload = self.payload.into_vec();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TesError::ResourceExhausted(
                "packet payload exceeds 16-bit length".into(),
            ));
        }

        let mut out = Cursor::new();
        out.write(MARKER);
        out.write(VERSION_MAJOR);
        out.write(VERSION_MINOR);
        out.write(self.routing_id);
        out.write(self.message_id);
        out.write(payload.len() as u16);
        out.write(self.flags.bits());
        out.write(0u8); // reserved
        out.write_bytes(&payload);

        let mut bytes = out.into_vec();
        debug_assert_eq!(bytes.len(), HEADER_SIZE + payload.len());

        if !self.flags.contains(PacketFlags::NO_CRC) {
            let crc = crc16(INITIAL_SEED, &bytes);
            let mut crc_buf = [0u8; 2];
            crc.write_le(&mut crc_buf);
            bytes.extend_from_slice(&crc_buf);
        }
        Ok(bytes)
    }
}

/// Reads fields out of a single, already-framed packet's bytes.
///
/// Mirrors `spec.md` §4.2: "wraps a non-owning byte span, tracks a read
/// cursor, offers `read_element<T>` and `read_array<T>`."
pub struct PacketReader<'a> {
    header: PacketHeader,
    body: ByteReader<'a>,
}

impl<'a> PacketReader<'a> {
    /// Parse the header of `bytes` (a complete packet: header + payload
    /// [+ CRC]) without validating the CRC. Use
    /// [`crate::stream_reader::StreamReader`] to obtain CRC-validated
    /// packets from a byte stream.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        let mut head = ByteReader::new(bytes);
        let marker: u32 = head.read()?;
        if marker != MARKER {
            return Err(TesError::Malformed(format!(
                "bad packet marker: {marker:#010X}"
            )));
        }
        let version_major = head.read()?;
        let version_minor = head.read()?;
        let routing_id = head.read()?;
        let message_id = head.read()?;
        let payload_size: u16 = head.read()?;
        let flags = PacketFlags::from_bits_truncate(head.read()?);
        let _reserved: u8 = head.read()?;

        let payload_size = payload_size as usize;
        if head.remaining() < payload_size {
            return Err(TesError::Truncated {
                expected: payload_size,
                available: head.remaining(),
            });
        }
        let payload = head.read_bytes(payload_size)?;

        Ok(Self {
            header: PacketHeader {
                version_major,
                version_minor,
                routing_id,
                message_id,
                payload_size: payload_size as u16,
                flags,
            },
            body: ByteReader::new(payload),
        })
    }

    pub fn routing_id(&self) -> u16 {
        self.header.routing_id
    }

    pub fn message_id(&self) -> u16 {
        self.header.message_id
    }

    pub fn flags(&self) -> PacketFlags {
        self.header.flags
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn read_element<T: Primitive>(&mut self) -> Result<T> {
        self.body.read()
    }

    pub fn read_array<T: Primitive>(&mut self, count: usize) -> Result<Vec<T>> {
        self.body.read_array(count)
    }

    /// Read a length-prefixed (u16) UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len: u16 = self.read_element()?;
        let bytes = self.body.read_bytes(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| TesError::Malformed(format!("invalid UTF-8 in text payload: {e}")))
    }

    /// Remaining unread payload bytes.
    pub fn remaining(&self) -> usize {
        self.body.remaining()
    }

    /// Consume and return every remaining unread payload byte.
    pub fn read_remaining(&mut self) -> Result<&'a [u8]> {
        let n = self.body.remaining();
        self.body.read_bytes(n)
    }
}

/// Parse just enough of `bytes` to know the total on-wire size (header +
/// payload + optional CRC) of the packet starting at its front, without
/// validating CRC. Used by the collation decoder to walk a concatenation of
/// packets.
pub fn peek_framed_size(bytes: &[u8]) -> Result<usize> {
    if bytes.len() < HEADER_SIZE {
        return Err(TesError::Truncated {
            expected: HEADER_SIZE,
            available: bytes.len(),
        });
    }
    let payload_size = u16::from_le_bytes([bytes[12], bytes[13]]) as usize;
    let flags = PacketFlags::from_bits_truncate(bytes[14]);
    Ok(framed_size(payload_size, flags))
}

/// Compute the full byte length (header + payload + optional CRC) of a
/// packet whose payload is `payload_len` bytes.
pub fn framed_size(payload_len: usize, flags: PacketFlags) -> usize {
    HEADER_SIZE + payload_len + if flags.contains(PacketFlags::NO_CRC) { 0 } else { CRC_SIZE }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let mut writer = PacketWriter::new(7, 1);
        writer.write_element(0xDEADBEEFu32).unwrap();
        writer.write_element(3.5f32).unwrap();
        let bytes = writer.finalise().unwrap();

        let mut reader = PacketReader::new(&bytes).unwrap();
        assert_eq!(reader.routing_id(), 7);
        assert_eq!(reader.message_id(), 1);
        assert_eq!(reader.read_element::<u32>().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_element::<f32>().unwrap(), 3.5);
    }

    #[test]
    fn crc_is_present_by_default() {
        let writer = PacketWriter::new(1, 1);
        let bytes = writer.finalise().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + CRC_SIZE);
    }

    #[test]
    fn no_crc_flag_omits_trailer() {
        let writer = PacketWriter::with_flags(1, 1, PacketFlags::NO_CRC);
        let bytes = writer.finalise().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
    }

    #[test]
    fn bad_marker_is_malformed() {
        let bytes = vec![0u8; HEADER_SIZE];
        assert!(matches!(PacketReader::new(&bytes), Err(TesError::Malformed(_))));
    }

    #[test]
    fn string_roundtrip() {
        let mut writer = PacketWriter::new(1, 1);
        writer.write_string("hello, 3es").unwrap();
        let bytes = writer.finalise().unwrap();
        let mut reader = PacketReader::new(&bytes).unwrap();
        assert_eq!(reader.read_string().unwrap(), "hello, 3es");
    }

    #[test]
    fn string_write_then_read_array_afterwards() {
        let mut writer = PacketWriter::new(1, 1);
        writer.write_string("abc").unwrap();
        writer.write_array(&[1u8, 2, 3]).unwrap();
        let bytes = writer.finalise().unwrap();
        let mut reader = PacketReader::new(&bytes).unwrap();
        assert_eq!(reader.read_string().unwrap(), "abc");
        assert_eq!(reader.read_array::<u8>(3).unwrap(), vec![1, 2, 3]);
    }
}
