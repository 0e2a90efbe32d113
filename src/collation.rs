//! Collation codec: batches whole packets inside a single `CollatedPacket`,
//! optionally GZip-compressed (`spec.md` §4.3).

use std::io::{Read, Write};

use bitflags::bitflags;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, TesError};
use crate::messages::RoutingId;
use crate::packet::{peek_framed_size, PacketReader, PacketWriter};

bitflags! {
    /// Flags carried in a `CollatedPacket`'s payload header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CollationFlags: u16 {
        /// Payload is a GZip stream of the concatenated packets.
        const GZIP = 1 << 0;
    }
}

/// Default payload size budget that triggers an automatic flush.
pub const DEFAULT_BUDGET: usize = 64 * 1024;

/// Accumulates whole packets and emits `CollatedPacket` packets on
/// [`CollationEncoder::finalise`] or automatically once `budget` is crossed.
pub struct CollationEncoder {
    compress: bool,
    budget: usize,
    staging: Vec<u8>,
    packet_count: usize,
    flushed: Vec<Vec<u8>>,
}

impl CollationEncoder {
    pub fn new(compress: bool) -> Self {
        Self::with_budget(compress, DEFAULT_BUDGET)
    }

    pub fn with_budget(compress: bool, budget: usize) -> Self {
        Self {
            compress,
            budget,
            staging: Vec::new(),
            packet_count: 0,
            flushed: Vec::new(),
        }
    }

    /// Append one already-framed packet. Auto-flushes first if adding it
    /// would cross the size budget and at least one packet is already
    /// staged.
    pub fn push_packet(&mut self, packet_bytes: &[u8]) -> Result<()> {
        if self.packet_count > 0 && self.staging.len() + packet_bytes.len() > self.budget {
            self.finalise()?;
        }
        self.staging.extend_from_slice(packet_bytes);
        self.packet_count += 1;
        Ok(())
    }

    /// Number of packets currently staged (not yet flushed).
    pub fn staged_count(&self) -> usize {
        self.packet_count
    }

    /// Flush any staged packets into a single `CollatedPacket`.
    pub fn finalise(&mut self) -> Result<()> {
        if self.staging.is_empty() {
            return Ok(());
        }
        let uncompressed_len = self.staging.len() as u32;
        let (payload, flags) = if self.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&self.staging)
                .map_err(TesError::Io)?;
            (encoder.finish().map_err(TesError::Io)?, CollationFlags::GZIP)
        } else {
            (std::mem::take(&mut self.staging), CollationFlags::empty())
        };

        let mut writer = PacketWriter::new(RoutingId::CollatedPacket as u16, 0);
        writer.write_element(uncompressed_len)?;
        writer.write_element(flags.bits())?;
        writer.write_raw_bytes(&payload)?;
        self.flushed.push(writer.finalise()?);

        self.staging.clear();
        self.packet_count = 0;
        Ok(())
    }

    /// Drain and return every flushed `CollatedPacket` built so far.
    pub fn take_flushed(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.flushed)
    }
}

/// Expands a single packet into its constituent packets.
///
/// If the input packet's routing ID is not `CollatedPacket`, it is returned
/// unchanged as the sole element (`spec.md` §4.3: "If the input is an
/// ordinary packet the iterator yields it once.").
pub fn expand(packet_bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut reader = PacketReader::new(packet_bytes)?;
    if reader.routing_id() != RoutingId::CollatedPacket as u16 {
        return Ok(vec![packet_bytes.to_vec()]);
    }

    let uncompressed_len: u32 = reader.read_element()?;
    let flags = CollationFlags::from_bits_truncate(reader.read_element()?);
    let raw_payload = reader.read_remaining()?;

    let data = if flags.contains(CollationFlags::GZIP) {
        let mut decoder = GzDecoder::new(raw_payload);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(TesError::Io)?;
        out
    } else {
        raw_payload.to_vec()
    };

    if data.len() != uncompressed_len as usize {
        return Err(TesError::Malformed(format!(
            "collated payload length mismatch: declared {}, actual {}",
            uncompressed_len,
            data.len()
        )));
    }

    let mut packets = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let slice = &data[offset..];
        let total = peek_framed_size(slice)?;
        if total > slice.len() {
            return Err(TesError::Truncated {
                expected: total,
                available: slice.len(),
            });
        }
        let inner = PacketReader::new(&slice[..total])?;
        if inner.routing_id() == RoutingId::CollatedPacket as u16 {
            return Err(TesError::Malformed("nested collation is not permitted".into()));
        }
        packets.push(slice[..total].to_vec());
        offset += total;
    }
    Ok(packets)
}
