//! End-to-end scenario tests (`spec.md` §8: S1 transient sphere, S2
//! persistent box update, S3 mesh resource with packed vertices, S4
//! collated frame, S5 seek backward, S6 recording prefix selection),
//! exercised through the crate's public API rather than any one module in
//! isolation.

use std::sync::{Arc, Mutex};

use tes_core::culler::{BoundsCuller, Frustum};
use tes_core::handler::{DrawParams, Handler, MeshResourceHandler, ShapeHandler};
use tes_core::mesh::{ComponentKind, DrawType, MeshMessageId};
use tes_core::messages::{ObjectAttributes, RoutingId, ShapeMessageId};
use tes_core::packet::{PacketReader, PacketWriter};
use tes_core::shapes::{CommonRecord, ShapeFlags, SimpleKind, SimpleShape};
use tes_core::SceneCoordinator;

fn new_coordinator() -> Arc<SceneCoordinator> {
    Arc::new(SceneCoordinator::new(Arc::new(Mutex::new(BoundsCuller::new()))))
}

fn sphere_create_packet(id: u32, transient: bool, position: [f64; 3]) -> Vec<u8> {
    let mut attrs = ObjectAttributes::<f64>::identity(1.0, 0.0);
    attrs.position = position;
    let common = CommonRecord::new(if transient { 0 } else { id }, 0, ShapeFlags::empty(), attrs);
    let shape = SimpleShape::new(SimpleKind::Sphere, common);
    let mut writer = PacketWriter::new(shape.routing_id() as u16, ShapeMessageId::Create as u16);
    shape.write_create(&mut writer).unwrap();
    writer.finalise().unwrap()
}

/// S1: a transient sphere (id 0) appears for exactly the frame it was
/// created in, then is gone once that frame's `end_frame` runs.
#[test]
fn s1_transient_sphere_is_visible_for_one_frame_only() {
    let coordinator = new_coordinator();
    let culler = Arc::clone(coordinator.culler());
    let handler = Arc::new(ShapeHandler::new(RoutingId::Sphere, culler));
    coordinator.register(handler.clone());

    let packet = sphere_create_packet(0, true, [1.0, 2.0, 3.0]);
    let mut reader = PacketReader::new(&packet).unwrap();
    coordinator.dispatch(&mut reader).unwrap();
    assert_eq!(handler.transient_count(), 1);

    coordinator.render(&Frustum::new(Vec::new()), &DrawParams::default());
    assert_eq!(handler.transient_count(), 0, "transient shape must not survive past its frame's end");
    assert_eq!(handler.live_count(), 0);
}

/// S2: a persistent box (non-zero id) survives across frames and reflects
/// an Update message's new position on the very next render.
#[test]
fn s2_persistent_box_survives_and_applies_update() {
    let coordinator = new_coordinator();
    let culler = Arc::clone(coordinator.culler());
    let handler = Arc::new(ShapeHandler::new(RoutingId::Box, culler));
    coordinator.register(handler.clone());

    let attrs = ObjectAttributes::<f64>::identity(1.0, 0.0);
    let common = CommonRecord::new(42, 0, ShapeFlags::empty(), attrs);
    let shape = SimpleShape::new(SimpleKind::Box, common);
    let mut writer = PacketWriter::new(shape.routing_id() as u16, ShapeMessageId::Create as u16);
    shape.write_create(&mut writer).unwrap();
    let create_bytes = writer.finalise().unwrap();
    coordinator.dispatch(&mut PacketReader::new(&create_bytes).unwrap()).unwrap();

    coordinator.render(&Frustum::new(Vec::new()), &DrawParams::default());
    assert_eq!(handler.live_count(), 1, "a non-zero id shape must persist past end_frame");

    // Apply a position-only update (spec.md §4.5 "Update: subset of fields
    // the UpdateFlags bitset names").
    let mut updated = ObjectAttributes::<f64>::identity(1.0, 0.0);
    updated.position = [5.0, 6.0, 7.0];
    let update_common = CommonRecord::new(42, 0, ShapeFlags::empty(), updated);
    let mut update_writer = PacketWriter::new(RoutingId::Box as u16, ShapeMessageId::Update as u16);
    update_common.write_update(&mut update_writer, tes_core::shapes::UpdateFlags::POSITION).unwrap();
    let update_bytes = update_writer.finalise().unwrap();
    coordinator.dispatch(&mut PacketReader::new(&update_bytes).unwrap()).unwrap();

    coordinator.render(&Frustum::new(Vec::new()), &DrawParams::default());
    assert_eq!(handler.live_count(), 1, "update must not duplicate or drop the live shape");
}

/// S3: a mesh resource goes through Create -> Component(s) -> Finalise,
/// ending Ready with its packed/quantised vertex data dequantised
/// correctly.
#[test]
fn s3_mesh_resource_create_component_finalise_with_packed_vertices() {
    let mesh_handler = Arc::new(MeshResourceHandler::new());

    let template = tes_core::mesh::MeshResource::create(7, 2, 0, DrawType::Points);
    let mut create_writer = PacketWriter::new(RoutingId::Mesh as u16, MeshMessageId::Create as u16);
    template.write_create(&mut create_writer).unwrap();
    let create_bytes = create_writer.finalise().unwrap();
    mesh_handler.read_message(&mut PacketReader::new(&create_bytes).unwrap()).unwrap();

    assert!(!mesh_handler.get(7).unwrap().is_ready());

    // PackedF16 vertex component: raw i16 * f32 scale.
    let scale = 0.01f32;
    let raw: [i16; 6] = [100, 200, 300, -100, -200, -300];
    let mut raw_bytes = Vec::new();
    for v in raw {
        raw_bytes.extend_from_slice(&v.to_le_bytes());
    }
    let buffer = tes_core::data_buffer::DataBuffer::borrowed(
        tes_core::data_buffer::ElementType::PackedF16,
        3,
        3,
        2,
        Some(scale as f64),
        &raw_bytes,
    )
    .unwrap();

    let mut component_writer = PacketWriter::new(RoutingId::Mesh as u16, MeshMessageId::Component as u16);
    let component = tes_core::mesh::ComponentMessage {
        mesh_id: 7,
        offset: 0,
        kind: ComponentKind::Vertex,
        buffer,
    };
    component.write(&mut component_writer).unwrap();
    let component_bytes = component_writer.finalise().unwrap();
    mesh_handler.read_message(&mut PacketReader::new(&component_bytes).unwrap()).unwrap();

    let mut finalise_writer = PacketWriter::new(RoutingId::Mesh as u16, MeshMessageId::Finalise as u16);
    finalise_writer.write_element(7u32).unwrap();
    let finalise_bytes = finalise_writer.finalise().unwrap();
    mesh_handler.read_message(&mut PacketReader::new(&finalise_bytes).unwrap()).unwrap();

    let resource = mesh_handler.get(7).unwrap();
    assert!(resource.is_ready());
    let vertices = &resource.data().vertices;
    assert_eq!(vertices.len(), 2);
    assert!((vertices[0].x - 1.0).abs() < 1e-9);
    assert!((vertices[0].y - 2.0).abs() < 1e-9);
    assert!((vertices[0].z - 3.0).abs() < 1e-9);
    assert!((vertices[1].x - (-1.0)).abs() < 1e-9);
}

/// S4: several shape packets collated into one `CollatedPacket` expand
/// back out to the exact same sequence of dispatchable packets.
#[test]
fn s4_collated_frame_expands_to_original_packet_sequence() {
    use tes_core::collation::{expand, CollationEncoder};

    let packets = vec![
        sphere_create_packet(1, false, [0.0, 0.0, 0.0]),
        sphere_create_packet(2, false, [1.0, 1.0, 1.0]),
        sphere_create_packet(3, false, [2.0, 2.0, 2.0]),
    ];

    let mut encoder = CollationEncoder::new(false);
    for packet in &packets {
        encoder.push_packet(packet).unwrap();
    }
    encoder.finalise().unwrap();
    let flushed = encoder.take_flushed();
    assert_eq!(flushed.len(), 1, "a single small batch collates into one CollatedPacket");

    let expanded = expand(&flushed[0]).unwrap();
    assert_eq!(expanded.len(), packets.len());
    for (original, round_tripped) in packets.iter().zip(expanded.iter()) {
        assert_eq!(original, round_tripped);
    }

    // Dispatching the expanded packets must behave exactly as dispatching
    // the originals would.
    let coordinator = new_coordinator();
    let culler = Arc::clone(coordinator.culler());
    let handler = Arc::new(ShapeHandler::new(RoutingId::Sphere, culler));
    coordinator.register(handler.clone());
    for packet in &expanded {
        coordinator.dispatch(&mut PacketReader::new(packet).unwrap()).unwrap();
    }
    assert_eq!(handler.live_count(), 3);
}

/// S5: seeking backward through recorded frames lands on the nearest
/// keyframe at or before the target and replays forward from there,
/// rather than replaying the whole stream from byte zero.
#[test]
fn s5_seek_backward_uses_nearest_keyframe() {
    use std::io::Cursor;
    use tes_core::messages::{ControlMessage, ControlMessageId};
    use tes_core::stream::StreamReader;

    // Each frame packet's `value32` is its own frame number (1-based) so
    // the packet actually read after a seek can be checked against which
    // frame it claims to be.
    fn frame_packet(frame: u32) -> Vec<u8> {
        let mut writer = PacketWriter::new(RoutingId::Control as u16, ControlMessageId::Frame as u16);
        ControlMessage { value32: frame }.write(&mut writer).unwrap();
        writer.finalise().unwrap()
    }

    let mut bytes = Vec::new();
    let mut frame_offsets = Vec::new();
    for frame in 1..=10u32 {
        frame_offsets.push(bytes.len() as u64);
        bytes.extend(frame_packet(frame));
    }

    let mut reader = StreamReader::new(Cursor::new(bytes));

    // Record a keyframe at every frame (mirrors what `FileDataSource`
    // would do via `note_frame_advance`, simplified to deterministic
    // per-frame keyframes for this test).
    let mut frame = 0u32;
    while let Some(_packet) = reader.next_packet().unwrap() {
        frame += 1;
        reader.insert_keyframe(frame, frame_offsets[frame as usize - 1]);
    }
    assert_eq!(reader.keyframes().len(), 10);

    // Seek back to frame 3: the keyframe at or before it must be used,
    // not a full stream restart, and the very next packet read must be
    // frame 3's own packet.
    let reached = reader.seek_to_keyframe(3).unwrap();
    assert_eq!(reached, 3);
    let packet = reader.next_packet().unwrap().unwrap();
    let mut packet_reader = PacketReader::new(&packet).unwrap();
    assert_eq!(ControlMessage::read(&mut packet_reader).unwrap().value32, 3);
}

/// S6: the recorder picks the first free `<prefix>NNN.3es` slot, and
/// under `--overwrite` always picks the first candidate outright.
#[test]
fn s6_recorder_picks_expected_output_slot() {
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use tes_core::recorder::next_output_path;

    let existing: HashSet<PathBuf> = [PathBuf::from("./session000.3es"), PathBuf::from("./session001.3es")]
        .into_iter()
        .collect();

    let (path, _next) = next_output_path(Path::new("."), "session", 0, false, |p| existing.contains(p)).unwrap();
    assert_eq!(path, PathBuf::from("./session002.3es"));

    let (overwritten, _next) = next_output_path(Path::new("."), "session", 0, true, |p| existing.contains(p)).unwrap();
    assert_eq!(overwritten, PathBuf::from("./session000.3es"));
}
