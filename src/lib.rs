//! # tes-core
//!
//! Wire protocol, shape/mesh resource model and viewer data pipeline for
//! Third Eye Scene (3es): a debugging and telemetry framework that lets an
//! instrumented program stream a 3D scene description to a separate viewer,
//! live over the network or recorded to a file for later playback.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tes_core::packet::{PacketWriter, PacketReader};
//! use tes_core::messages::{RoutingId, ServerInfo};
//!
//! let mut writer = PacketWriter::new(RoutingId::ServerInfo as u16, 0);
//! ServerInfo::default().write(&mut writer)?;
//! let bytes = writer.finalise()?;
//!
//! let mut reader = PacketReader::new(&bytes)?;
//! let info = ServerInfo::read(&mut reader)?;
//! # Ok::<(), tes_core::error::TesError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`codec`] / [`crc`] / [`packet`] — the wire codec: little-endian
//!   primitives, CRC16-validated packet framing.
//! - [`collation`] — batches whole packets into a single, optionally
//!   GZip-compressed `CollatedPacket`.
//! - [`stream`] — reassembles a byte stream into validated packets and
//!   tracks keyframe offsets for seeking.
//! - [`messages`] — routing IDs, control messages, object attributes and
//!   `ServerInfo`.
//! - [`shapes`] — the tagged-variant shape model (Sphere, Box, Arrow, …).
//! - [`mesh`] — mesh resource lifecycle (Create/Component/Finalise/Destroy).
//! - [`resource_list`] / [`culler`] — slot-allocated resource storage and
//!   frustum/visibility bookkeeping used by the viewer side.
//! - [`handler`] / [`coordinator`] — routes incoming messages to per-kind
//!   handlers and drives the render-thread frame loop.
//! - [`data_source`] — file-replay and live-network data feed threads.
//! - [`recorder`] — the `tes-record` CLI's argument parsing and output-file
//!   naming logic.

#![allow(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod codec;
pub mod collation;
pub mod crc;
pub mod culler;
pub mod data_buffer;
pub mod data_source;
pub mod error;
pub mod handler;
pub mod messages;
pub mod mesh;
pub mod packet;
pub mod recorder;
pub mod resource_list;
pub mod shapes;
pub mod stream;
pub mod types;

mod coordinator;

pub use coordinator::{FrameStamp, SceneCoordinator, ViewableWindow};
pub use error::{Result, TesError};
pub use messages::{ControlMessageId, CoordinateFrame, ObjectAttributes, RoutingId, ServerInfo};
pub use types::{Aabb, BoundingBox2D, BoundingBox3D, Quaternion, Vector2, Vector3};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
