//! Message taxonomy: routing IDs, control message IDs, the object-attribute
//! blob and the `ServerInfo` record (`spec.md` §3/§6).

use crate::codec::Primitive;
use crate::error::{Result, TesError};
use crate::types::{Quaternion, Vector3};

/// Fixed, low-numbered routing IDs. Shape kinds start at
/// [`SHAPE_ROUTING_BASE`]; anything at or above [`USER_ROUTING_BASE`] is
/// reserved for user extension and never matched by this crate's handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RoutingId {
    Null = 0,
    ServerInfo = 1,
    Control = 2,
    CollatedPacket = 3,
    Mesh = 4,
    Camera = 5,
    Category = 6,
    Material = 7,

    Sphere = SHAPE_ROUTING_BASE,
    Box,
    Cone,
    Cylinder,
    Capsule,
    Plane,
    Star,
    Arrow,
    MeshShape,
    MeshSet,
    PointCloud,
    Text2D,
    Text3D,
    Pose,
    MultiShape,
}

/// First routing ID reserved for shape kinds.
pub const SHAPE_ROUTING_BASE: u16 = 16;

/// First routing ID available for user extension; this crate never
/// registers a handler at or above this value.
pub const USER_ROUTING_BASE: u16 = 2048;

impl RoutingId {
    pub fn from_u16(value: u16) -> Option<Self> {
        use RoutingId::*;
        Some(match value {
            0 => Null,
            1 => ServerInfo,
            2 => Control,
            3 => CollatedPacket,
            4 => Mesh,
            5 => Camera,
            6 => Category,
            7 => Material,
            v if v == Sphere as u16 => Sphere,
            v if v == Box as u16 => Box,
            v if v == Cone as u16 => Cone,
            v if v == Cylinder as u16 => Cylinder,
            v if v == Capsule as u16 => Capsule,
            v if v == Plane as u16 => Plane,
            v if v == Star as u16 => Star,
            v if v == Arrow as u16 => Arrow,
            v if v == MeshShape as u16 => MeshShape,
            v if v == MeshSet as u16 => MeshSet,
            v if v == PointCloud as u16 => PointCloud,
            v if v == Text2D as u16 => Text2D,
            v if v == Text3D as u16 => Text3D,
            v if v == Pose as u16 => Pose,
            v if v == MultiShape as u16 => MultiShape,
            _ => return None,
        })
    }

    pub fn is_shape(self) -> bool {
        (self as u16) >= SHAPE_ROUTING_BASE
    }
}

/// Sub-dispatch within the `Control` routing ID (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ControlMessageId {
    Null = 0,
    Frame,
    CoordinateFrame,
    FrameCount,
    ForceFrameFlush,
    Reset,
    Keyframe,
    End,
}

impl ControlMessageId {
    pub fn from_u16(value: u16) -> Option<Self> {
        use ControlMessageId::*;
        Some(match value {
            0 => Null,
            1 => Frame,
            2 => CoordinateFrame,
            3 => FrameCount,
            4 => ForceFrameFlush,
            5 => Reset,
            6 => Keyframe,
            7 => End,
            _ => return None,
        })
    }
}

/// The `Control` routing ID's payload (`spec.md` §4.9 "Frame-control
/// sub-messages"). Every `ControlMessageId` variant reuses this one shape:
/// `Frame`'s delta time, `CoordinateFrame`'s frame index, `FrameCount`'s
/// total and `Reset`'s target frame all travel in `value32`, matching
/// `original_source/utils/3esrec/3esrec.cpp`'s `ControlMessage::value32`
/// usage across every control message it writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlMessage {
    pub value32: u32,
}

impl ControlMessage {
    pub fn write(&self, writer: &mut crate::packet::PacketWriter) -> Result<()> {
        writer.write_element(self.value32)
    }

    pub fn read(reader: &mut crate::packet::PacketReader) -> Result<Self> {
        Ok(ControlMessage {
            value32: reader.read_element()?,
        })
    }
}

/// Sub-dispatch within a shape's routing ID: Create, Update, Destroy and, for
/// complex shapes, Data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ShapeMessageId {
    Create = 0,
    Update,
    Destroy,
    Data,
}

impl ShapeMessageId {
    pub fn from_u16(value: u16) -> Option<Self> {
        use ShapeMessageId::*;
        Some(match value {
            0 => Create,
            1 => Update,
            2 => Destroy,
            3 => Data,
            _ => return None,
        })
    }
}

/// One of the 24 handedness/up-axis conventions a `ServerInfo` record may
/// declare (`spec.md` §4.4/§6/glossary "Coordinate frame").
///
/// Encoded as `permutation * 4 + handedness * 2 + up_is_z`, where
/// `permutation` selects one of the 6 axis orderings, `handedness` is
/// 0 (right) / 1 (left) and `up_is_z` picks between the permutation's
/// secondary and tertiary axis as "up". This crate treats the value as an
/// opaque, round-trippable token; it does not reinterpret shape data by
/// frame (`spec.md` Non-goals: no coordinate transforms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordinateFrame(u8);

impl CoordinateFrame {
    pub const COUNT: u8 = 24;

    /// The library's conventional default: first axis permutation,
    /// right-handed, Z up.
    pub const DEFAULT: CoordinateFrame = CoordinateFrame(0);

    pub fn new(value: u8) -> Result<Self> {
        if value >= Self::COUNT {
            return Err(TesError::Invalid(format!(
                "coordinate frame {value} out of range 0..{}",
                Self::COUNT
            )));
        }
        Ok(CoordinateFrame(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn axis_permutation(self) -> u8 {
        self.0 / 4
    }

    pub fn is_left_handed(self) -> bool {
        (self.0 / 2) % 2 == 1
    }

    pub fn up_is_z(self) -> bool {
        self.0 % 2 == 1
    }
}

impl Default for CoordinateFrame {
    fn default() -> Self {
        CoordinateFrame::DEFAULT
    }
}

/// The `ServerInfo` payload broadcast once near the start of a stream
/// (`spec.md` §6, "File format").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerInfo {
    /// Duration, in microseconds, of one server time unit.
    pub time_unit: u64,
    /// Default inter-frame time, in time units, used when a `Frame`
    /// control message omits an explicit delta.
    pub default_frame_time: u32,
    pub coordinate_frame: CoordinateFrame,
}

impl Default for ServerInfo {
    fn default() -> Self {
        ServerInfo {
            time_unit: 1_000,
            default_frame_time: 1_000 / 30,
            coordinate_frame: CoordinateFrame::DEFAULT,
        }
    }
}

impl ServerInfo {
    pub fn write(&self, writer: &mut crate::packet::PacketWriter) -> Result<()> {
        writer.write_element(self.time_unit)?;
        writer.write_element(self.default_frame_time)?;
        writer.write_element(self.coordinate_frame.value())?;
        writer.write_array(&[0u8; 3])?; // reserved padding
        Ok(())
    }

    pub fn read(reader: &mut crate::packet::PacketReader) -> Result<Self> {
        let time_unit = reader.read_element()?;
        let default_frame_time = reader.read_element()?;
        let coordinate_frame = CoordinateFrame::new(reader.read_element()?)?;
        let _reserved: [u8; 3] = reader.read_array(3)?.try_into().unwrap();
        Ok(ServerInfo {
            time_unit,
            default_frame_time,
            coordinate_frame,
        })
    }
}

/// Position/rotation/scale/colour shared by every shape's common record
/// (`spec.md` §3 "Object attributes"). `T` is `f32` or `f64` selected by the
/// owning message's `DoublePrecision` flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectAttributes<T> {
    pub colour: u32,
    pub position: [T; 3],
    pub rotation: [T; 4],
    pub scale: [T; 3],
}

impl<T: Primitive> ObjectAttributes<T> {
    pub fn identity(one: T, zero: T) -> Self {
        ObjectAttributes {
            colour: 0xFFFF_FFFF,
            position: [zero, zero, zero],
            rotation: [zero, zero, zero, one],
            scale: [one, one, one],
        }
    }

    pub fn write(&self, writer: &mut crate::packet::PacketWriter) -> Result<()> {
        writer.write_element(self.colour)?;
        writer.write_array(&self.position)?;
        writer.write_array(&self.rotation)?;
        writer.write_array(&self.scale)?;
        Ok(())
    }

    pub fn read(reader: &mut crate::packet::PacketReader) -> Result<Self> {
        let colour = reader.read_element()?;
        let position: Vec<T> = reader.read_array(3)?;
        let rotation: Vec<T> = reader.read_array(4)?;
        let scale: Vec<T> = reader.read_array(3)?;
        Ok(ObjectAttributes {
            colour,
            position: position.try_into().unwrap_or_else(|_| unreachable!()),
            rotation: rotation.try_into().unwrap_or_else(|_| unreachable!()),
            scale: scale.try_into().unwrap_or_else(|_| unreachable!()),
        })
    }
}

impl ObjectAttributes<f64> {
    pub fn position_vec3(&self) -> Vector3 {
        Vector3::new(self.position[0], self.position[1], self.position[2])
    }

    pub fn rotation_quaternion(&self) -> Quaternion {
        Quaternion::new(
            self.rotation[0],
            self.rotation[1],
            self.rotation[2],
            self.rotation[3],
        )
    }

    /// Narrow to the wire's single-precision representation.
    pub fn to_f32(self) -> ObjectAttributes<f32> {
        ObjectAttributes {
            colour: self.colour,
            position: self.position.map(|v| v as f32),
            rotation: self.rotation.map(|v| v as f32),
            scale: self.scale.map(|v| v as f32),
        }
    }
}

impl ObjectAttributes<f32> {
    /// Widen to this crate's internal double-precision representation.
    pub fn to_f64(self) -> ObjectAttributes<f64> {
        ObjectAttributes {
            colour: self.colour,
            position: self.position.map(|v| v as f64),
            rotation: self.rotation.map(|v| v as f64),
            scale: self.scale.map(|v| v as f64),
        }
    }
}
