//! Byte-stream reassembly and keyframe tracking (`spec.md` §4.2 reassembler,
//! §4.7 "Stream reader and keyframes").
//!
//! Grounded on `3esview/3esview/data/StreamThread.cpp`'s packet-at-a-time
//! read loop: pull bytes, look for the marker, validate, hand the packet
//! onward or resync past a corrupt one.

use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Seek, SeekFrom};

use crate::crc::{crc16, INITIAL_SEED};
use crate::error::{Result, TesError};
use crate::packet::{PacketFlags, HEADER_SIZE, MARKER};

/// Policy governing when the reader records a keyframe (`spec.md` §4.7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyframeSettings {
    /// Insert a keyframe once this many bytes have been read since the last
    /// one (0 disables the byte-threshold trigger).
    pub byte_threshold: u64,
    /// Insert a keyframe once this many frames have elapsed since the last
    /// one (0 disables the frame-threshold trigger).
    pub frame_threshold: u32,
    /// Suppress keyframe insertion until at least this many frames have
    /// elapsed since the stream started.
    pub min_frames: u32,
}

impl Default for KeyframeSettings {
    fn default() -> Self {
        KeyframeSettings {
            byte_threshold: 1024 * 1024,
            frame_threshold: 0,
            min_frames: 2,
        }
    }
}

/// Wraps a byte source and reassembles it into validated, whole packets,
/// resyncing on the marker constant after a truncated read or CRC failure
/// (`spec.md` §7: Truncated / CrcFailed).
pub struct StreamReader<R> {
    source: R,
    /// Bytes pushed back after a failed resync attempt, re-read before
    /// pulling fresh bytes from `source`.
    pending: VecDeque<u8>,
    settings: KeyframeSettings,
    keyframes: BTreeMap<u32, u64>,
    bytes_since_keyframe: u64,
    frames_since_keyframe: u32,
    frames_seen: u32,
    bytes_read: u64,
    dropped_bytes: u64,
    crc_failures: u64,
}

impl<R: Read> StreamReader<R> {
    pub fn new(source: R) -> Self {
        Self::with_settings(source, KeyframeSettings::default())
    }

    pub fn with_settings(source: R, settings: KeyframeSettings) -> Self {
        StreamReader {
            source,
            pending: VecDeque::new(),
            settings,
            keyframes: BTreeMap::new(),
            bytes_since_keyframe: 0,
            frames_since_keyframe: 0,
            frames_seen: 0,
            bytes_read: 0,
            dropped_bytes: 0,
            crc_failures: 0,
        }
    }

    /// Total bytes dropped while resyncing on a bad marker or failed CRC.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    pub fn crc_failures(&self) -> u64 {
        self.crc_failures
    }

    /// Current byte position in the underlying source, i.e. the offset a
    /// keyframe recorded right now would need to seek back to.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Ordered map from frame number to the byte offset of the packet that
    /// began that frame, as observed so far.
    pub fn keyframes(&self) -> &BTreeMap<u32, u64> {
        &self.keyframes
    }

    /// Externally supply a keyframe index, e.g. loaded from a file's
    /// trailing index block.
    pub fn insert_keyframe(&mut self, frame: u32, byte_offset: u64) {
        self.keyframes.insert(frame, byte_offset);
    }

    /// Call once a frame-control packet has advanced the current frame,
    /// so the keyframe policy can decide whether to record one.
    pub fn note_frame_advance(&mut self, frame: u32, byte_offset: u64) {
        self.frames_seen += 1;
        self.frames_since_keyframe += 1;
        if self.frames_seen < self.settings.min_frames {
            return;
        }
        let byte_trigger =
            self.settings.byte_threshold > 0 && self.bytes_since_keyframe >= self.settings.byte_threshold;
        let frame_trigger =
            self.settings.frame_threshold > 0 && self.frames_since_keyframe >= self.settings.frame_threshold;
        if byte_trigger || frame_trigger {
            self.keyframes.insert(frame, byte_offset);
            self.bytes_since_keyframe = 0;
            self.frames_since_keyframe = 0;
        }
    }

    /// Read the next complete, CRC-validated packet, resyncing past any
    /// truncated trailing bytes or marker/CRC mismatches. Returns `Ok(None)`
    /// at a clean end of stream (no partial packet pending).
    pub fn next_packet(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let marker_bytes = match self.find_marker()? {
                Some(bytes) => bytes,
                None => return Ok(None),
            };

            let mut header = marker_bytes.clone();
            let mut rest = vec![0u8; HEADER_SIZE - 4];
            if !self.fill_exact(&mut rest)? {
                return Ok(None);
            }
            header.extend_from_slice(&rest);

            let payload_size = u16::from_le_bytes([header[12], header[13]]) as usize;
            let flags = PacketFlags::from_bits_truncate(header[14]);
            let crc_len = if flags.contains(PacketFlags::NO_CRC) { 0 } else { 2 };

            let mut rest = vec![0u8; payload_size + crc_len];
            if !self.fill_exact(&mut rest)? {
                // Truncated: drop what we had and report clean EOF.
                return Ok(None);
            }

            let mut packet = header;
            packet.extend_from_slice(&rest);

            if crc_len > 0 {
                let expected = u16::from_le_bytes([
                    packet[packet.len() - 2],
                    packet[packet.len() - 1],
                ]);
                let body = &packet[..packet.len() - 2];
                let actual = crc16(INITIAL_SEED, body);
                if actual != expected {
                    self.crc_failures += 1;
                    self.dropped_bytes += 1;
                    // The marker was coincidental. Push back everything
                    // after its first byte and resume scanning from there,
                    // per the "advance one byte and resume" rule.
                    for &b in packet[1..].iter().rev() {
                        self.pending.push_front(b);
                    }
                    continue;
                }
            }

            self.bytes_read += packet.len() as u64;
            self.bytes_since_keyframe += packet.len() as u64;
            return Ok(Some(packet));
        }
    }

    /// Scan forward for the marker constant, counting skipped bytes as
    /// dropped. Returns the 4 marker bytes once found, or `None` at EOF.
    fn find_marker(&mut self) -> Result<Option<Vec<u8>>> {
        let mut window = [0u8; 4];
        let mut filled = 0usize;
        loop {
            let byte = match self.read_byte()? {
                Some(b) => b,
                None => return Ok(None),
            };
            if filled < 4 {
                window[filled] = byte;
                filled += 1;
            } else {
                window.copy_within(1..4, 0);
                window[3] = byte;
                self.dropped_bytes += 1;
            }
            if filled == 4 && u32::from_le_bytes(window) == MARKER {
                return Ok(Some(window.to_vec()));
            }
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        if let Some(b) = self.pending.pop_front() {
            return Ok(Some(b));
        }
        let mut byte = [0u8; 1];
        match self.source.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) => Err(TesError::Io(e)),
        }
    }

    fn fill_exact(&mut self, buf: &mut [u8]) -> Result<bool> {
        for slot in buf.iter_mut() {
            match self.read_byte()? {
                Some(b) => *slot = b,
                None => return Ok(false),
            }
        }
        Ok(true)
    }
}

impl<R: Read + Seek> StreamReader<R> {
    /// Reposition the underlying source, invalidating any in-flight
    /// reassembly state (`spec.md` §4.7 `seek`).
    pub fn seek(&mut self, byte_offset: u64) -> Result<()> {
        self.source
            .seek(SeekFrom::Start(byte_offset))
            .map_err(TesError::Io)?;
        self.pending.clear();
        self.bytes_read = byte_offset;
        Ok(())
    }

    /// Seek to the latest recorded keyframe at or before `frame`, or to 0 if
    /// none exists.
    pub fn seek_to_keyframe(&mut self, frame: u32) -> Result<u32> {
        let target = self
            .keyframes
            .range(..=frame)
            .next_back()
            .map(|(&f, &offset)| (f, offset));
        match target {
            Some((f, offset)) => {
                self.seek(offset)?;
                Ok(f)
            }
            None => {
                self.seek(0)?;
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketWriter;
    use std::io::Cursor as IoCursor;

    fn make_packet(routing_id: u16, value: u32) -> Vec<u8> {
        let mut w = PacketWriter::new(routing_id, 0);
        w.write_element(value).unwrap();
        w.finalise().unwrap()
    }

    #[test]
    fn reads_sequential_packets() {
        let mut data = Vec::new();
        data.extend(make_packet(1, 10));
        data.extend(make_packet(2, 20));

        let mut reader = StreamReader::new(IoCursor::new(data));
        let p1 = reader.next_packet().unwrap().unwrap();
        let p2 = reader.next_packet().unwrap().unwrap();
        assert_eq!(reader.next_packet().unwrap(), None);

        assert_eq!(crate::packet::PacketReader::new(&p1).unwrap().routing_id(), 1);
        assert_eq!(crate::packet::PacketReader::new(&p2).unwrap().routing_id(), 2);
    }

    #[test]
    fn resyncs_past_garbage_prefix() {
        let mut data = vec![0xAAu8, 0xBB, 0xCC];
        data.extend(make_packet(5, 1));

        let mut reader = StreamReader::new(IoCursor::new(data));
        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(crate::packet::PacketReader::new(&packet).unwrap().routing_id(), 5);
        assert_eq!(reader.dropped_bytes(), 3);
    }

    #[test]
    fn resyncs_past_crc_failure() {
        let mut good = make_packet(5, 1);
        let corrupt_idx = HEADER_SIZE;
        good[corrupt_idx] ^= 0xFF;
        let mut data = good;
        data.extend(make_packet(6, 2));

        let mut reader = StreamReader::new(IoCursor::new(data));
        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(crate::packet::PacketReader::new(&packet).unwrap().routing_id(), 6);
        assert!(reader.crc_failures() >= 1);
    }

    #[test]
    fn truncated_trailing_packet_is_clean_eof() {
        let mut packet = make_packet(1, 1);
        packet.truncate(packet.len() - 1);
        let mut reader = StreamReader::new(IoCursor::new(packet));
        assert_eq!(reader.next_packet().unwrap(), None);
    }

    #[test]
    fn keyframe_policy_respects_min_frames_and_byte_threshold() {
        let settings = KeyframeSettings {
            byte_threshold: 10,
            frame_threshold: 0,
            min_frames: 2,
        };
        let mut reader = StreamReader::with_settings(IoCursor::new(Vec::<u8>::new()), settings);
        reader.bytes_since_keyframe = 100;
        reader.note_frame_advance(1, 0);
        assert!(reader.keyframes().is_empty(), "suppressed below min_frames");
        reader.note_frame_advance(2, 50);
        assert_eq!(reader.keyframes().get(&2), Some(&50));
    }

    #[test]
    fn seek_to_keyframe_falls_back_to_zero() {
        let mut reader = StreamReader::new(IoCursor::new(vec![0u8; 64]));
        reader.insert_keyframe(10, 20);
        assert_eq!(reader.seek_to_keyframe(3).unwrap(), 0);
        assert_eq!(reader.seek_to_keyframe(15).unwrap(), 10);
    }
}
