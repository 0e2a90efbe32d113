//! Mesh resource lifecycle: Create → Component* → Finalise → Ready, with
//! Redefine/Destroy transitions (`spec.md` §4.6).
//!
//! Grounded on `original_source/3es-core/3esmeshmessages.h` for the wire
//! message shapes and `3escore/shapes/3essimplemesh.h` for the in-memory
//! vertex/index/normal/colour component layout.

use std::sync::Arc;

use crate::data_buffer::{DataBuffer, ElementType};
use crate::error::{Result, TesError};
use crate::messages::RoutingId;
use crate::packet::{PacketReader, PacketWriter};
use crate::types::Vector3;

/// Mesh primitive topology (`spec.md` §3 "Mesh resource").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DrawType {
    Points = 0,
    Lines = 1,
    Triangles = 2,
    Voxels = 3,
}

impl DrawType {
    pub fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => DrawType::Points,
            1 => DrawType::Lines,
            2 => DrawType::Triangles,
            3 => DrawType::Voxels,
            other => {
                return Err(TesError::Malformed(format!(
                    "draw type {other} out of range"
                )))
            }
        })
    }
}

/// Sub-dispatch within the `Mesh` routing ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MeshMessageId {
    Create = 0,
    Destroy = 1,
    Component = 2,
    Finalise = 3,
    /// "Extension. NYI." in the original wire protocol: accepted as a
    /// silent no-op (mesh ID + material ID), never produced by this crate.
    Material = 4,
    Redefine = 5,
}

impl MeshMessageId {
    pub fn from_u16(value: u16) -> Option<Self> {
        use MeshMessageId::*;
        Some(match value {
            0 => Create,
            1 => Destroy,
            2 => Component,
            3 => Finalise,
            4 => Material,
            5 => Redefine,
            _ => return None,
        })
    }
}

/// Which mesh component a `Component` message carries, and the element
/// types/component counts each permits (`spec.md` §4.6 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ComponentKind {
    Vertex = 0,
    Index = 1,
    Normal = 2,
    Colour = 3,
    Uv = 4,
}

impl ComponentKind {
    pub fn from_u16(value: u16) -> Result<Self> {
        use ComponentKind::*;
        Ok(match value {
            0 => Vertex,
            1 => Index,
            2 => Normal,
            3 => Colour,
            4 => Uv,
            other => return Err(TesError::Malformed(format!("unknown mesh component kind {other}"))),
        })
    }

    pub fn expected_component_count(self) -> u8 {
        match self {
            ComponentKind::Vertex | ComponentKind::Normal => 3,
            ComponentKind::Uv => 2,
            ComponentKind::Colour | ComponentKind::Index => 1,
        }
    }

    pub fn permits(self, element_type: ElementType) -> bool {
        use ElementType::*;
        match self {
            ComponentKind::Vertex | ComponentKind::Normal => {
                matches!(element_type, F32 | F64 | PackedF16 | PackedF32)
            }
            ComponentKind::Uv => matches!(element_type, F32 | PackedF16),
            ComponentKind::Colour => matches!(element_type, U32),
            ComponentKind::Index => {
                matches!(element_type, I8 | U8 | I16 | U16 | I32 | U32)
            }
        }
    }
}

/// A component delta: mesh ID, starting offset, and the elements
/// themselves (`spec.md` §4.6: "mesh ID, starting offset, a reserved u32,
/// count (u16), element type (u16), optional quantisation scale, then count
/// elements").
pub struct ComponentMessage<'a> {
    pub mesh_id: u32,
    pub offset: u32,
    pub kind: ComponentKind,
    pub buffer: DataBuffer<'a>,
}

impl<'a> ComponentMessage<'a> {
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_element(self.mesh_id)?;
        writer.write_element(self.offset)?;
        writer.write_element(0u32)?; // reserved
        writer.write_element(self.kind as u16)?;
        self.buffer.write(writer, 0, usize::MAX)?;
        Ok(())
    }

    pub fn read(reader: &mut PacketReader) -> Result<(u32, u32, ComponentKind, DataBuffer<'static>)> {
        let mesh_id = reader.read_element()?;
        let offset = reader.read_element()?;
        let _reserved: u32 = reader.read_element()?;
        let kind = ComponentKind::from_u16(reader.read_element()?)?;
        let buffer = DataBuffer::read(reader)?;
        if !kind.permits(buffer.element_type()) {
            return Err(TesError::Malformed(format!(
                "element type {:?} not permitted for component {:?}",
                buffer.element_type(),
                kind
            )));
        }
        if buffer.component_count() != kind.expected_component_count() {
            return Err(TesError::Malformed(format!(
                "component count {} does not match {:?}'s expected {}",
                buffer.component_count(),
                kind,
                kind.expected_component_count()
            )));
        }
        Ok((mesh_id, offset, kind, buffer))
    }
}

/// State machine stage a mesh resource is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshState {
    Defining,
    Ready,
}

/// Reference-counted mesh payload. Mutating a [`MeshResource`] first
/// detaches (clones) its [`MeshData`] whenever more than one handle shares
/// it, per `spec.md` §4.6 "Reference/copy semantics".
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertex_count: u32,
    pub index_count: u32,
    pub draw_type: DrawType,
    pub tint: u32,
    pub transform: [f64; 16],
    pub vertices: Vec<Vector3>,
    pub indices: Vec<u32>,
    pub normals: Vec<Vector3>,
    pub colours: Vec<u32>,
    pub uvs: Vec<(f32, f32)>,
}

impl Default for DrawType {
    fn default() -> Self {
        DrawType::Triangles
    }
}

impl MeshData {
    pub fn new(vertex_count: u32, index_count: u32, draw_type: DrawType) -> Self {
        MeshData {
            vertex_count,
            index_count,
            draw_type,
            tint: 0xFFFF_FFFF,
            transform: identity_matrix(),
            vertices: Vec::new(),
            indices: Vec::new(),
            normals: Vec::new(),
            colours: Vec::new(),
            uvs: Vec::new(),
        }
    }
}

fn identity_matrix() -> [f64; 16] {
    let mut m = [0.0; 16];
    m[0] = 1.0;
    m[5] = 1.0;
    m[10] = 1.0;
    m[15] = 1.0;
    m
}

/// A mesh resource's external identity and lifecycle state, owning a
/// reference-counted, copy-on-write handle to its vertex/index data.
#[derive(Debug, Clone)]
pub struct MeshResource {
    pub mesh_id: u32,
    state: MeshState,
    data: Arc<MeshData>,
}

impl MeshResource {
    pub fn create(mesh_id: u32, vertex_count: u32, index_count: u32, draw_type: DrawType) -> Self {
        MeshResource {
            mesh_id,
            state: MeshState::Defining,
            data: Arc::new(MeshData::new(vertex_count, index_count, draw_type)),
        }
    }

    /// As [`MeshResource::create`], but also stamps the tint/transform a
    /// wire Create or Redefine message carries alongside the counts.
    pub fn create_with_transform(
        mesh_id: u32,
        vertex_count: u32,
        index_count: u32,
        draw_type: DrawType,
        tint: u32,
        transform: [f64; 16],
    ) -> Self {
        let mut data = MeshData::new(vertex_count, index_count, draw_type);
        data.tint = tint;
        data.transform = transform;
        MeshResource {
            mesh_id,
            state: MeshState::Defining,
            data: Arc::new(data),
        }
    }

    pub fn state(&self) -> MeshState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == MeshState::Ready
    }

    pub fn data(&self) -> &MeshData {
        &self.data
    }

    /// Number of outstanding references to the shared mesh data; exposed
    /// for tests asserting the copy-on-write boundary.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    /// Clone this handle; the underlying `MeshData` is shared until one
    /// handle mutates.
    pub fn share(&self) -> Self {
        self.clone()
    }

    fn data_mut(&mut self) -> &mut MeshData {
        Arc::make_mut(&mut self.data)
    }

    /// Apply a component delta. Only legal while `Defining`.
    pub fn apply_component(&mut self, offset: u32, kind: ComponentKind, buffer: &DataBuffer) -> Result<()> {
        if self.state != MeshState::Defining {
            return Err(TesError::Invalid(
                "component message received for a mesh that is not Defining".into(),
            ));
        }
        let count = buffer.count();
        let offset = offset as usize;
        let (vertex_count, index_count) = (self.data.vertex_count as usize, self.data.index_count as usize);
        match kind {
            ComponentKind::Vertex => {
                check_bounds(offset, count, vertex_count)?;
                let mesh = self.data_mut();
                ensure_len(&mut mesh.vertices, vertex_count);
                for i in 0..count {
                    mesh.vertices[offset + i] = Vector3::new(
                        buffer.get::<f64>(i, 0)?,
                        buffer.get::<f64>(i, 1)?,
                        buffer.get::<f64>(i, 2)?,
                    );
                }
            }
            ComponentKind::Normal => {
                check_bounds(offset, count, vertex_count)?;
                let mesh = self.data_mut();
                ensure_len(&mut mesh.normals, vertex_count);
                for i in 0..count {
                    mesh.normals[offset + i] = Vector3::new(
                        buffer.get::<f64>(i, 0)?,
                        buffer.get::<f64>(i, 1)?,
                        buffer.get::<f64>(i, 2)?,
                    );
                }
            }
            ComponentKind::Colour => {
                check_bounds(offset, count, vertex_count)?;
                let mesh = self.data_mut();
                ensure_len(&mut mesh.colours, vertex_count);
                for i in 0..count {
                    mesh.colours[offset + i] = buffer.get::<u32>(i, 0)?;
                }
            }
            ComponentKind::Uv => {
                check_bounds(offset, count, vertex_count)?;
                let mesh = self.data_mut();
                ensure_len(&mut mesh.uvs, vertex_count);
                for i in 0..count {
                    mesh.uvs[offset + i] = (buffer.get::<f32>(i, 0)?, buffer.get::<f32>(i, 1)?);
                }
            }
            ComponentKind::Index => {
                check_bounds(offset, count, index_count)?;
                let mesh = self.data_mut();
                ensure_len(&mut mesh.indices, index_count);
                for i in 0..count {
                    mesh.indices[offset + i] = buffer.get::<u32>(i, 0)?;
                }
            }
        }
        Ok(())
    }

    pub fn finalise(&mut self) -> Result<()> {
        if self.state != MeshState::Defining {
            return Err(TesError::Invalid("Finalise received outside Defining".into()));
        }
        self.state = MeshState::Ready;
        Ok(())
    }

    /// Re-open a Ready mesh for another Create/Component/Finalise cycle.
    pub fn redefine(&mut self, vertex_count: u32, index_count: u32, draw_type: DrawType) -> Result<()> {
        if self.state != MeshState::Ready {
            return Err(TesError::Invalid("Redefine received outside Ready".into()));
        }
        self.data = Arc::new(MeshData::new(vertex_count, index_count, draw_type));
        self.state = MeshState::Defining;
        Ok(())
    }

    /// As [`Self::redefine`], carrying the tint/transform a wire Redefine
    /// message mirrors from Create.
    pub fn redefine_with_transform(
        &mut self,
        vertex_count: u32,
        index_count: u32,
        draw_type: DrawType,
        tint: u32,
        transform: [f64; 16],
    ) -> Result<()> {
        if self.state != MeshState::Ready {
            return Err(TesError::Invalid("Redefine received outside Ready".into()));
        }
        let mut data = MeshData::new(vertex_count, index_count, draw_type);
        data.tint = tint;
        data.transform = transform;
        self.data = Arc::new(data);
        self.state = MeshState::Defining;
        Ok(())
    }

    /// Clone the shared, reference-counted mesh payload handle, for callers
    /// (shape bounds resolution, resource enumeration) that need to hold a
    /// mesh's data independent of the resource's own lifetime.
    pub fn data_handle(&self) -> Arc<MeshData> {
        Arc::clone(&self.data)
    }
}

/// Wire helpers used by the mesh resource handler (`spec.md` §4.6, §4.9
/// `serialise`). Kept on `MeshResource` rather than the handler so the wire
/// layout lives beside the state machine it serialises.
impl MeshResource {
    pub fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_element(self.mesh_id)?;
        writer.write_element(self.data.vertex_count)?;
        writer.write_element(self.data.index_count)?;
        writer.write_element(self.data.draw_type as u8)?;
        writer.write_element(self.data.tint)?;
        let transform32: Vec<f32> = self.data.transform.iter().map(|&v| v as f32).collect();
        writer.write_array(&transform32)?;
        Ok(())
    }

    /// Decode a Create message's header, i.e. everything but the mesh ID
    /// (the handler owns keying meshes by ID, so it reads that separately).
    pub fn read_create(reader: &mut PacketReader) -> Result<(u32, u32, u32, DrawType, u32, [f64; 16])> {
        let mesh_id = reader.read_element()?;
        let vertex_count = reader.read_element()?;
        let index_count = reader.read_element()?;
        let draw_type = DrawType::from_u8(reader.read_element()?)?;
        let tint = reader.read_element()?;
        let transform32: Vec<f32> = reader.read_array(16)?;
        let mut transform = identity_matrix();
        for (dst, &src) in transform.iter_mut().zip(transform32.iter()) {
            *dst = src as f64;
        }
        Ok((mesh_id, vertex_count, index_count, draw_type, tint, transform))
    }

    pub fn write_finalise(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_element(self.mesh_id)
    }

    pub fn write_destroy(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_element(self.mesh_id)
    }

    /// Emit Create, one Component message per non-empty stream, then
    /// Finalise: a complete, replayable description of a `Ready` mesh, used
    /// for keyframe capture (`spec.md` §4.9 `serialise`).
    pub fn serialise(&self) -> Result<Vec<Vec<u8>>> {
        let mut packets = Vec::new();

        let mut create = PacketWriter::new(MESH_ROUTING_ID, MeshMessageId::Create as u16);
        self.write_create(&mut create)?;
        packets.push(create.finalise()?);

        self.write_component(&mut packets, ComponentKind::Vertex, &self.data.vertices, |v| {
            [v.x as f32, v.y as f32, v.z as f32]
        })?;
        self.write_component(&mut packets, ComponentKind::Normal, &self.data.normals, |v| {
            [v.x as f32, v.y as f32, v.z as f32]
        })?;
        self.write_scalar_component(&mut packets, ComponentKind::Colour, &self.data.colours)?;
        self.write_scalar_component(&mut packets, ComponentKind::Index, &self.data.indices)?;
        if !self.data.uvs.is_empty() {
            let bytes: Vec<u8> = self
                .data
                .uvs
                .iter()
                .flat_map(|(u, v)| u.to_le_bytes().into_iter().chain(v.to_le_bytes()))
                .collect();
            let buffer = DataBuffer::borrowed(ElementType::F32, 2, 2, self.data.uvs.len(), None, &bytes)?;
            packets.push(component_packet(self.mesh_id, ComponentKind::Uv, &buffer)?);
        }

        let mut finalise = PacketWriter::new(MESH_ROUTING_ID, MeshMessageId::Finalise as u16);
        self.write_finalise(&mut finalise)?;
        packets.push(finalise.finalise()?);

        Ok(packets)
    }

    fn write_component(
        &self,
        out: &mut Vec<Vec<u8>>,
        kind: ComponentKind,
        values: &[Vector3],
        to_f32: impl Fn(&Vector3) -> [f32; 3],
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let bytes: Vec<u8> = values.iter().flat_map(|v| to_f32(v).into_iter().flat_map(f32::to_le_bytes)).collect();
        let buffer = DataBuffer::borrowed(ElementType::F32, 3, 3, values.len(), None, &bytes)?;
        out.push(component_packet(self.mesh_id, kind, &buffer)?);
        Ok(())
    }

    fn write_scalar_component(&self, out: &mut Vec<Vec<u8>>, kind: ComponentKind, values: &[u32]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let buffer = DataBuffer::borrowed(ElementType::U32, 1, 1, values.len(), None, &bytes)?;
        out.push(component_packet(self.mesh_id, kind, &buffer)?);
        Ok(())
    }
}

fn component_packet(mesh_id: u32, kind: ComponentKind, buffer: &DataBuffer) -> Result<Vec<u8>> {
    let mut writer = PacketWriter::new(MESH_ROUTING_ID, MeshMessageId::Component as u16);
    writer.write_element(mesh_id)?;
    writer.write_element(0u32)?; // offset: serialise always emits the whole component in one message
    writer.write_element(0u32)?; // reserved
    writer.write_element(kind as u16)?;
    buffer.write(&mut writer, 0, MAX_COMPONENT_PAYLOAD)?;
    Ok(writer.finalise()?)
}

/// Conservative per-component payload budget, comfortably under the 16-bit
/// packet length limit after the header fields above.
const MAX_COMPONENT_PAYLOAD: usize = 60_000;

fn check_bounds(offset: usize, count: usize, capacity: usize) -> Result<()> {
    if offset + count > capacity {
        return Err(TesError::Malformed(format!(
            "component offset {offset} + count {count} exceeds declared capacity {capacity}"
        )));
    }
    Ok(())
}

fn ensure_len<T: Default + Clone>(v: &mut Vec<T>, len: usize) {
    if v.len() < len {
        v.resize(len, T::default());
    }
}

/// A zero-data stand-in for a mesh resource that has not yet arrived on the
/// wire, identified only by its mesh ID (`spec.md` §4.6 `MeshPlaceholder`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshPlaceholder {
    pub mesh_id: u32,
}

/// Resolves to either a not-yet-arrived placeholder or the full resource,
/// as returned by a shape's `enumerate_resources` once the registry is
/// consulted (`spec.md` §4.5 `enumerate_resources`).
#[derive(Debug, Clone)]
pub enum MeshHandle {
    Placeholder(MeshPlaceholder),
    Full(Arc<MeshData>),
}

impl MeshHandle {
    pub fn mesh_id(&self, resource: Option<&MeshResource>) -> Option<u32> {
        match self {
            MeshHandle::Placeholder(p) => Some(p.mesh_id),
            MeshHandle::Full(_) => resource.map(|r| r.mesh_id),
        }
    }
}

pub const MESH_ROUTING_ID: u16 = RoutingId::Mesh as u16;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_buffer::ElementType;

    fn vertex_buffer(values: &[[f32; 3]]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|v| v.iter().flat_map(|c| c.to_le_bytes()))
            .collect()
    }

    #[test]
    fn mesh_lifecycle_create_component_finalise() {
        let mut mesh = MeshResource::create(1, 2, 0, DrawType::Points);
        let raw = vertex_buffer(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let buffer = DataBuffer::borrowed(ElementType::F32, 3, 3, 2, None, &raw).unwrap();
        mesh.apply_component(0, ComponentKind::Vertex, &buffer).unwrap();
        assert!(!mesh.is_ready());
        mesh.finalise().unwrap();
        assert!(mesh.is_ready());
        assert_eq!(mesh.data().vertices[1], Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn component_outside_defining_is_invalid() {
        let mut mesh = MeshResource::create(1, 1, 0, DrawType::Points);
        mesh.finalise().unwrap();
        let raw = vertex_buffer(&[[0.0, 0.0, 0.0]]);
        let buffer = DataBuffer::borrowed(ElementType::F32, 3, 3, 1, None, &raw).unwrap();
        assert!(mesh.apply_component(0, ComponentKind::Vertex, &buffer).is_err());
    }

    #[test]
    fn component_out_of_bounds_is_malformed() {
        let mut mesh = MeshResource::create(1, 1, 0, DrawType::Points);
        let raw = vertex_buffer(&[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]);
        let buffer = DataBuffer::borrowed(ElementType::F32, 3, 3, 2, None, &raw).unwrap();
        assert!(matches!(
            mesh.apply_component(0, ComponentKind::Vertex, &buffer),
            Err(TesError::Malformed(_))
        ));
    }

    #[test]
    fn redefine_detaches_shared_data() {
        let mut mesh = MeshResource::create(1, 1, 0, DrawType::Points);
        mesh.finalise().unwrap();
        let shared = mesh.share();
        assert_eq!(mesh.strong_count(), 2);
        mesh.redefine(2, 0, DrawType::Lines).unwrap();
        assert_eq!(mesh.strong_count(), 1);
        assert_eq!(shared.data().vertex_count, 1);
        assert_eq!(mesh.data().vertex_count, 2);
    }

    #[test]
    fn serialise_roundtrips_through_component_messages() {
        let mut mesh = MeshResource::create(42, 2, 0, DrawType::Points);
        let raw = vertex_buffer(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let buffer = DataBuffer::borrowed(ElementType::F32, 3, 3, 2, None, &raw).unwrap();
        mesh.apply_component(0, ComponentKind::Vertex, &buffer).unwrap();
        mesh.finalise().unwrap();

        let packets = mesh.serialise().unwrap();
        // Create, one Vertex component, Finalise; no normals/colours/indices/uvs.
        assert_eq!(packets.len(), 3);

        let mut create_reader = PacketReader::new(&packets[0]).unwrap();
        assert_eq!(create_reader.message_id(), MeshMessageId::Create as u16);
        let (mesh_id, vertex_count, ..) = MeshResource::read_create(&mut create_reader).unwrap();
        assert_eq!(mesh_id, 42);
        assert_eq!(vertex_count, 2);

        let mut finalise_reader = PacketReader::new(packets.last().unwrap()).unwrap();
        assert_eq!(finalise_reader.message_id(), MeshMessageId::Finalise as u16);
        assert_eq!(finalise_reader.read_element::<u32>().unwrap(), 42);
    }

    #[test]
    fn component_kind_permits_table() {
        assert!(ComponentKind::Vertex.permits(ElementType::PackedF16));
        assert!(!ComponentKind::Colour.permits(ElementType::F32));
        assert!(ComponentKind::Index.permits(ElementType::U16));
        assert!(!ComponentKind::Uv.permits(ElementType::F64));
    }
}
