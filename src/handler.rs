//! Per-routing-ID message handlers: mesh resources and shapes, each driven
//! by the reader thread (`read_message`) and the render thread
//! (`begin_frame`/`draw`/`end_frame`) (`spec.md` §4.9).
//!
//! Grounded on `original_source/3esview/3esview/handler/Message.h` for the
//! `Handler` trait shape, `3esview/3esview/handler/MeshResource.h` for
//! `MeshResourceHandler`, and `3esview/3esview/handler/Shape.h` for the
//! generic per-routing-ID shape handler. The original splits one concrete
//! handler subclass per shape kind; since this crate already collapses
//! every shape kind into one [`crate::shapes::Shape`] tagged union, a
//! single generic [`ShapeHandler`] parameterised by routing ID replaces the
//! whole subclass family.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::culler::{BoundsCuller, BoundsId};
use crate::error::{Result, TesError};
use crate::mesh::{ComponentMessage, MeshMessageId, MeshResource};
use crate::messages::{RoutingId, ServerInfo, ShapeMessageId};
use crate::packet::{PacketReader, PacketWriter};
use crate::shapes::{Shape, UpdateFlags, WriteDataStatus};
use crate::types::{Aabb, Quaternion, Vector3};

/// Render passes a draw call may be scoped to (`spec.md` §4.9: "passes allow
/// opaque/transparent/overlay separation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawPass {
    Opaque,
    Transparent,
    Overlay,
}

/// Parameters a concrete renderer would thread through `draw`. Submitting
/// geometry to a GPU is out of this crate's scope (`spec.md` Non-goals); this
/// is an empty extension point a consumer can grow without touching the
/// `Handler` trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrawParams;

/// One routing ID's worth of message handling, called from the reader
/// thread (`read_message`) and the render thread (everything else). An
/// implementation is responsible for its own internal synchronization.
pub trait Handler: Send + Sync {
    fn routing_id(&self) -> RoutingId;

    /// One-time setup; called once before the first frame.
    fn initialise(&self) -> Result<()> {
        Ok(())
    }

    /// Discard all held state in response to a `Reset` control message.
    fn reset(&self);

    fn begin_frame(&self, stamp: FrameStamp);
    fn end_frame(&self, stamp: FrameStamp);

    /// Decode and apply a message already known to address this handler's
    /// routing ID. Returning `Err` discards just this packet; it does not
    /// disturb already-applied state (`spec.md` §7).
    fn read_message(&self, reader: &mut PacketReader) -> Result<()>;

    fn draw(&self, pass: DrawPass, stamp: FrameStamp, params: &DrawParams);

    /// Emit the messages that would recreate this handler's current state
    /// from nothing, for keyframe capture (`spec.md` §4.9 `serialise`).
    fn serialise(&self, out: &mut Vec<Vec<u8>>, server_info: &ServerInfo) -> Result<()>;
}

use crate::coordinator::FrameStamp;

/// Owns every mesh resource, keyed by its server-assigned mesh ID (never
/// slot-allocated: IDs are chosen by the sender, not by us, so a freelist
/// container doesn't fit).
pub struct MeshResourceHandler {
    meshes: Mutex<HashMap<u32, MeshResource>>,
}

impl Default for MeshResourceHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshResourceHandler {
    pub fn new() -> Self {
        MeshResourceHandler {
            meshes: Mutex::new(HashMap::new()),
        }
    }

    /// A shared handle to mesh `mesh_id`'s resource, if one is currently
    /// registered (ready or still Defining).
    pub fn get(&self, mesh_id: u32) -> Option<MeshResource> {
        self.meshes.lock().unwrap().get(&mesh_id).map(MeshResource::share)
    }

    pub fn len(&self) -> usize {
        self.meshes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Handler for MeshResourceHandler {
    fn routing_id(&self) -> RoutingId {
        RoutingId::Mesh
    }

    fn reset(&self) {
        self.meshes.lock().unwrap().clear();
    }

    fn begin_frame(&self, _stamp: FrameStamp) {}
    fn end_frame(&self, _stamp: FrameStamp) {}
    fn draw(&self, _pass: DrawPass, _stamp: FrameStamp, _params: &DrawParams) {}

    fn read_message(&self, reader: &mut PacketReader) -> Result<()> {
        let message_id = MeshMessageId::from_u16(reader.message_id())
            .ok_or_else(|| TesError::Malformed(format!("unknown mesh message id {}", reader.message_id())))?;
        match message_id {
            MeshMessageId::Create => {
                let (mesh_id, vertex_count, index_count, draw_type, tint, transform) =
                    MeshResource::read_create(reader)?;
                let resource =
                    MeshResource::create_with_transform(mesh_id, vertex_count, index_count, draw_type, tint, transform);
                self.meshes.lock().unwrap().insert(mesh_id, resource);
                Ok(())
            }
            MeshMessageId::Destroy => {
                let mesh_id: u32 = reader.read_element()?;
                self.meshes.lock().unwrap().remove(&mesh_id);
                Ok(())
            }
            MeshMessageId::Component => {
                let (mesh_id, offset, kind, buffer) = ComponentMessage::read(reader)?;
                let mut meshes = self.meshes.lock().unwrap();
                let resource = meshes
                    .get_mut(&mesh_id)
                    .ok_or_else(|| TesError::Malformed(format!("component message for unknown mesh {mesh_id}")))?;
                resource.apply_component(offset, kind, &buffer)
            }
            MeshMessageId::Finalise => {
                let mesh_id: u32 = reader.read_element()?;
                let mut meshes = self.meshes.lock().unwrap();
                let resource = meshes
                    .get_mut(&mesh_id)
                    .ok_or_else(|| TesError::Malformed(format!("finalise for unknown mesh {mesh_id}")))?;
                resource.finalise()
            }
            MeshMessageId::Redefine => {
                let (mesh_id, vertex_count, index_count, draw_type, tint, transform) =
                    MeshResource::read_create(reader)?;
                let mut meshes = self.meshes.lock().unwrap();
                let resource = meshes
                    .get_mut(&mesh_id)
                    .ok_or_else(|| TesError::Malformed(format!("redefine for unknown mesh {mesh_id}")))?;
                resource.redefine_with_transform(vertex_count, index_count, draw_type, tint, transform)
            }
            MeshMessageId::Material => {
                // NYI extension in the wire protocol; consumed and ignored.
                let _mesh_id: u32 = reader.read_element()?;
                let _material_id: u32 = reader.read_element()?;
                Ok(())
            }
        }
    }

    fn serialise(&self, out: &mut Vec<Vec<u8>>, _server_info: &ServerInfo) -> Result<()> {
        for resource in self.meshes.lock().unwrap().values() {
            if resource.is_ready() {
                out.extend(resource.serialise()?);
            }
        }
        Ok(())
    }
}

fn mesh_local_bounds(resource: &MeshResource) -> Option<Aabb> {
    Aabb::from_points(&resource.data().vertices)
}

fn world_attributes(common: &crate::shapes::CommonRecord) -> (Vector3, Quaternion, Vector3) {
    let a = &common.attributes;
    (
        a.position_vec3(),
        a.rotation_quaternion(),
        Vector3::new(a.scale[0], a.scale[1], a.scale[2]),
    )
}

/// Handles one shape routing ID: Create/Update/Destroy/Data dispatch, bounds
/// culling, and (for `MeshSet`/`PointCloud`) bounds resolution against a
/// mesh resource registry supplied at construction (dependency injection in
/// place of a global resource table, `spec.md` §9 design note).
pub struct ShapeHandler {
    routing_id: RoutingId,
    live: Mutex<HashMap<u32, (Shape, BoundsId)>>,
    /// ID-0 shapes valid for exactly the frame they were created in;
    /// released and cleared at `end_frame`.
    transient: Mutex<Vec<(Shape, BoundsId)>>,
    /// A complex shape's Create has arrived but not yet all of its Data
    /// messages. Data messages carry no shape ID on the wire, so at most one
    /// such shape may be under construction per routing ID at a time.
    pending: Mutex<Option<Shape>>,
    culler: Arc<Mutex<BoundsCuller>>,
    mesh_handler: Option<Arc<MeshResourceHandler>>,
}

impl ShapeHandler {
    pub fn new(routing_id: RoutingId, culler: Arc<Mutex<BoundsCuller>>) -> Self {
        ShapeHandler {
            routing_id,
            live: Mutex::new(HashMap::new()),
            transient: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            culler,
            mesh_handler: None,
        }
    }

    /// As [`Self::new`], additionally wired to a mesh resource registry so
    /// `MeshSet`/`PointCloud` bounds can be resolved against real vertex
    /// data once it arrives.
    pub fn with_mesh_handler(
        routing_id: RoutingId,
        culler: Arc<Mutex<BoundsCuller>>,
        mesh_handler: Arc<MeshResourceHandler>,
    ) -> Self {
        ShapeHandler {
            mesh_handler: Some(mesh_handler),
            ..Self::new(routing_id, culler)
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn transient_count(&self) -> usize {
        self.transient.lock().unwrap().len()
    }

    fn resolve_bounds(&self, shape: &Shape, placeholder: Aabb) -> Aabb {
        let mesh_handler = match &self.mesh_handler {
            Some(h) => h,
            None => return placeholder,
        };
        match shape {
            Shape::MeshSet(s) => self
                .resolve_mesh_set_bounds(shape, &s.parts, mesh_handler)
                .unwrap_or(placeholder),
            Shape::PointCloud(s) => self
                .resolve_point_cloud_bounds(shape, s, mesh_handler)
                .unwrap_or(placeholder),
            _ => placeholder,
        }
    }

    fn resolve_mesh_set_bounds(
        &self,
        shape: &Shape,
        parts: &[crate::shapes::MeshSetPart],
        mesh_handler: &MeshResourceHandler,
    ) -> Option<Aabb> {
        let (position, rotation, scale) = world_attributes(shape.common());
        let mut merged: Option<Aabb> = None;
        for part in parts {
            let resource = mesh_handler.get(part.mesh_id)?;
            if !resource.is_ready() {
                continue;
            }
            let local = mesh_local_bounds(&resource)?;
            let part_position = part.transform.position_vec3();
            let part_rotation = part.transform.rotation_quaternion();
            let part_scale = Vector3::new(part.transform.scale[0], part.transform.scale[1], part.transform.scale[2]);
            let part_world = crate::shapes::transform_aabb(local, part_scale, part_rotation, part_position);
            let world = crate::shapes::transform_aabb(part_world, scale, rotation, position);
            merged = Some(match merged {
                Some(existing) => existing.merge(&world),
                None => world,
            });
        }
        merged
    }

    fn resolve_point_cloud_bounds(
        &self,
        shape: &Shape,
        s: &crate::shapes::PointCloudShapeData,
        mesh_handler: &MeshResourceHandler,
    ) -> Option<Aabb> {
        let resource = mesh_handler.get(s.mesh_id)?;
        if !resource.is_ready() {
            return None;
        }
        let vertices = &resource.data().vertices;
        let points: Vec<Vector3> = s.indices.iter().filter_map(|&i| vertices.get(i as usize).copied()).collect();
        let local = Aabb::from_points(&points)?;
        let (position, rotation, scale) = world_attributes(shape.common());
        Some(crate::shapes::transform_aabb(local, scale, rotation, position))
    }

    fn install(&self, shape: Shape) {
        let placeholder = shape.world_bounds();
        let bounds = self.resolve_bounds(&shape, placeholder);
        let bounds_id = self.culler.lock().unwrap().allocate(bounds);
        if shape.common().is_transient() {
            self.transient.lock().unwrap().push((shape, bounds_id));
        } else {
            let id = shape.common().id;
            let mut live = self.live.lock().unwrap();
            if let Some((_, old_bounds_id)) = live.insert(id, (shape, bounds_id)) {
                // REPLACE semantics: a Create for a live ID supersedes it.
                self.culler.lock().unwrap().release(old_bounds_id);
            }
        }
    }

    fn handle_create(&self, reader: &mut PacketReader) -> Result<()> {
        let shape = Shape::read_create(self.routing_id, reader)?;
        if shape.is_complex() {
            *self.pending.lock().unwrap() = Some(shape);
        } else {
            self.install(shape);
        }
        Ok(())
    }

    fn handle_data(&self, reader: &mut PacketReader) -> Result<()> {
        let mut pending = self.pending.lock().unwrap();
        let shape = pending
            .as_mut()
            .ok_or_else(|| TesError::Malformed("Data message received with no shape under construction".into()))?;
        let status = shape.read_data(reader)?;
        if status == WriteDataStatus::Done {
            let shape = pending.take().unwrap();
            drop(pending);
            self.install(shape);
        }
        Ok(())
    }

    fn handle_update(&self, reader: &mut PacketReader) -> Result<()> {
        let id: u32 = reader.read_element()?;
        let subset = UpdateFlags::from_bits_truncate(reader.read_element()?);
        let mut live = self.live.lock().unwrap();
        let (shape, bounds_id) = live
            .get_mut(&id)
            .ok_or_else(|| TesError::Malformed(format!("update for unknown shape id {id}")))?;
        shape.common_mut().apply_update(subset, reader)?;
        let placeholder = shape.world_bounds();
        let bounds = self.resolve_bounds(shape, placeholder);
        self.culler.lock().unwrap().update(*bounds_id, bounds);
        Ok(())
    }

    fn handle_destroy(&self, reader: &mut PacketReader) -> Result<()> {
        let id: u32 = reader.read_element()?;
        if let Some((_, bounds_id)) = self.live.lock().unwrap().remove(&id) {
            self.culler.lock().unwrap().release(bounds_id);
        }
        Ok(())
    }
}

impl Handler for ShapeHandler {
    fn routing_id(&self) -> RoutingId {
        self.routing_id
    }

    fn reset(&self) {
        let live_ids: Vec<BoundsId> = self.live.lock().unwrap().drain().map(|(_, (_, id))| id).collect();
        let transient_ids: Vec<BoundsId> = self.transient.lock().unwrap().drain(..).map(|(_, id)| id).collect();
        let mut culler = self.culler.lock().unwrap();
        for id in live_ids.into_iter().chain(transient_ids) {
            culler.release(id);
        }
        *self.pending.lock().unwrap() = None;
    }

    fn begin_frame(&self, _stamp: FrameStamp) {}

    fn end_frame(&self, _stamp: FrameStamp) {
        let mut transient = self.transient.lock().unwrap();
        if transient.is_empty() {
            return;
        }
        let mut culler = self.culler.lock().unwrap();
        for (_, bounds_id) in transient.drain(..) {
            culler.release(bounds_id);
        }
    }

    fn read_message(&self, reader: &mut PacketReader) -> Result<()> {
        let message_id = ShapeMessageId::from_u16(reader.message_id())
            .ok_or_else(|| TesError::Malformed(format!("unknown shape message id {}", reader.message_id())))?;
        match message_id {
            ShapeMessageId::Create => self.handle_create(reader),
            ShapeMessageId::Update => self.handle_update(reader),
            ShapeMessageId::Destroy => self.handle_destroy(reader),
            ShapeMessageId::Data => self.handle_data(reader),
        }
    }

    fn draw(&self, _pass: DrawPass, stamp: FrameStamp, _params: &DrawParams) {
        // Actual geometry submission is a consumer concern (`spec.md`
        // Non-goals: no GPU renderer); this just demonstrates the
        // visibility gate a real draw call would use.
        let culler = self.culler.lock().unwrap();
        let live = self.live.lock().unwrap();
        for (_, bounds_id) in live.values() {
            if !culler.is_visible_at(*bounds_id, stamp.render_mark) {
                continue;
            }
        }
    }

    fn serialise(&self, out: &mut Vec<Vec<u8>>, _server_info: &ServerInfo) -> Result<()> {
        for (shape, _) in self.live.lock().unwrap().values() {
            let mut create_writer = PacketWriter::new(self.routing_id as u16, ShapeMessageId::Create as u16);
            shape.write_create(&mut create_writer)?;
            out.push(create_writer.finalise()?);

            if shape.is_complex() {
                let mut progress = 0u32;
                loop {
                    let mut data_writer = PacketWriter::new(self.routing_id as u16, ShapeMessageId::Data as u16);
                    let status = shape.write_data(&mut data_writer, &mut progress)?;
                    out.push(data_writer.finalise()?);
                    if status == WriteDataStatus::Done {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

fn log_discarded(routing_id: u16, message_id: u16, err: &TesError) {
    warn!("discarding malformed packet (routing {routing_id}, message {message_id}): {err}");
}
