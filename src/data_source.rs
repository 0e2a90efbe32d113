//! File-replay and live-network data feed threads (`spec.md` §4.8).
//!
//! Grounded on `original_source/3esview/3esview/data/StreamThread.cpp`
//! ([`FileDataSource`]: `blockOnPause`/`skipBack`/`processControlMessage`
//! pacing loop) and `NetworkThread.cpp` ([`NetworkDataSource`]: connect-with
//! -retry, `isLiveStream() == true`, frame controls as playback-control
//! no-ops). Both share the [`DataSource`] contract that mirrors
//! `original_source/3esview/3esview/data/DataThread.h`.

use std::io::{Read, Seek};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, warn};

use crate::collation;
use crate::coordinator::SceneCoordinator;
use crate::messages::{ControlMessage, ControlMessageId, RoutingId, ServerInfo};
use crate::packet::PacketReader;
use crate::stream::{KeyframeSettings, StreamReader};

/// Contract shared by [`FileDataSource`] and [`NetworkDataSource`]
/// (`spec.md` §4.8, mirrors `DataThread.h`). Pause/seek/loop/speed controls
/// are accepted but are no-ops on a live stream.
pub trait DataSource: Send + Sync {
    fn is_live_stream(&self) -> bool;
    fn current_frame(&self) -> u32;
    fn total_frames(&self) -> u32;
    fn target_frame(&self) -> Option<u32>;
    fn set_target_frame(&self, frame: u32);
    fn paused(&self) -> bool;
    fn pause(&self);
    fn unpause(&self);
    fn looping(&self) -> bool;
    fn set_looping(&self, loop_playback: bool);
    fn playback_speed(&self) -> f32;
    fn set_playback_speed(&self, speed: f32);
    fn stop(&self);
    fn join(&self);
}

/// Playback pacing/behaviour knobs (`spec.md` §2 "Configuration" ambient
/// concern; mirrors `original_source/3esview/3esview/settings/Playback.h`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSettings {
    pub looping: bool,
    pub playback_speed: f32,
    /// Pause playback when a handler reports a fatal decode error
    /// (`spec.md` §4.8 "Pause-on-error (optional setting)").
    pub pause_on_error: bool,
    pub keyframes: KeyframeSettings,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        PlaybackSettings {
            looping: false,
            playback_speed: 1.0,
            pause_on_error: false,
            keyframes: KeyframeSettings::default(),
        }
    }
}

/// State shared between a data source's background thread and the handles
/// returned to callers, guarded the way the original splits `_data_mutex`
/// (frame bookkeeping) from `_notify_mutex`/`_notify` (pause blocking).
struct Shared {
    quit: AtomicBool,
    current_frame: AtomicU32,
    total_frames: AtomicU32,
    target_frame: Mutex<Option<u32>>,
    looping: AtomicBool,
    playback_speed: Mutex<f32>,
    paused: Mutex<bool>,
    pause_notify: Condvar,
}

impl Shared {
    fn new(settings: &PlaybackSettings) -> Self {
        Shared {
            quit: AtomicBool::new(false),
            current_frame: AtomicU32::new(0),
            total_frames: AtomicU32::new(0),
            target_frame: Mutex::new(None),
            looping: AtomicBool::new(settings.looping),
            playback_speed: Mutex::new(settings.playback_speed),
            paused: Mutex::new(false),
            pause_notify: Condvar::new(),
        }
    }

    /// `blockOnPause`: if paused with no seek target pending, sleep until
    /// unpaused, a target frame is set, or a stop is requested. Polls with
    /// a bounded wait rather than a single `wait_while` predicate so a
    /// `set_target_frame` call (which touches a different mutex) reliably
    /// unblocks it.
    fn block_on_pause(&self) -> bool {
        let mut blocked = false;
        let mut paused = self.paused.lock().unwrap();
        loop {
            if !*paused || self.quit.load(Ordering::Acquire) {
                return blocked;
            }
            if self.target_frame.lock().unwrap().is_some() {
                return blocked;
            }
            blocked = true;
            let (guard, _timed_out) = self
                .pause_notify
                .wait_timeout(paused, Duration::from_millis(50))
                .unwrap();
            paused = guard;
        }
    }

    /// Unpause and wake any thread blocked in [`Self::block_on_pause`].
    fn wake(&self) {
        *self.paused.lock().unwrap() = false;
        self.pause_notify.notify_all();
    }

    /// Wake a blocked thread without forcing `paused` false, so a seek
    /// requested while paused can still be serviced (`original_source`'s
    /// `blockOnPause` re-check of `_target_frame` mid-pause).
    fn nudge(&self) {
        self.pause_notify.notify_all();
    }
}

/// Decode one reassembled packet, route `Control`/`ServerInfo` to the
/// coordinator's own hooks and everything else through `dispatch`. Returns
/// `Some(dt)` (in server time units) when the packet ended a frame, so the
/// caller can re-pace; `None` otherwise.
fn route_packet(coordinator: &SceneCoordinator, packet_bytes: &[u8], is_live: bool) -> Option<u32> {
    let mut reader = match PacketReader::new(packet_bytes) {
        Ok(r) => r,
        Err(err) => {
            warn!("dropping truncated packet: {err}");
            return None;
        }
    };
    let routing_id = match RoutingId::from_u16(reader.routing_id()) {
        Some(id) => id,
        None => {
            warn!("unknown routing id {}", reader.routing_id());
            return None;
        }
    };
    match routing_id {
        RoutingId::Control => {
            let message_id = match ControlMessageId::from_u16(reader.message_id()) {
                Some(id) => id,
                None => {
                    error!("unknown control message id {}", reader.message_id());
                    return None;
                }
            };
            let msg = match ControlMessage::read(&mut reader) {
                Ok(m) => m,
                Err(err) => {
                    error!("failed to decode control packet: {err}");
                    return None;
                }
            };
            let dt = coordinator.handle_control(message_id, msg.value32);
            // A live stream has no pacing; frame control still advances the
            // coordinator's frame stamp but the caller never sleeps on it.
            if is_live {
                None
            } else {
                dt
            }
        }
        RoutingId::ServerInfo => match ServerInfo::read(&mut reader) {
            Ok(info) => {
                coordinator.update_server_info(info);
                None
            }
            Err(err) => {
                error!("failed to decode server info: {err}");
                None
            }
        },
        _ => {
            if let Err(err) = coordinator.dispatch(&mut reader) {
                warn!("discarding packet (routing {routing_id:?}): {err}");
            }
            None
        }
    }
}

/// Expand a raw reassembled packet (possibly a `CollatedPacket`) and route
/// every inner packet. Returns the frame-control delay reported by the last
/// control packet in the batch, if any.
fn route_collated(coordinator: &SceneCoordinator, packet_bytes: &[u8], is_live: bool) -> Option<u32> {
    let inner = match collation::expand(packet_bytes) {
        Ok(packets) => packets,
        Err(err) => {
            error!("malformed collated packet: {err}");
            return None;
        }
    };
    let mut dt = None;
    for packet in inner {
        if let Some(value) = route_packet(coordinator, &packet, is_live) {
            dt = Some(value);
        }
    }
    dt
}

/// Replays a seekable byte source at real-time pace, with pause, seek,
/// loop and playback-speed controls (`spec.md` §4.8 "File replay").
pub struct FileDataSource {
    shared: Arc<Shared>,
    /// `FrameCount` control messages land on the coordinator, not `Shared`
    /// (the coordinator already owns that bookkeeping for keyframe
    /// serialisation); `total_frames()` reads through it.
    coordinator: Arc<SceneCoordinator>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Any seekable, readable byte source a [`FileDataSource`] can replay from.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

impl FileDataSource {
    pub fn new(
        coordinator: Arc<SceneCoordinator>,
        source: Box<dyn ReadSeek>,
        settings: PlaybackSettings,
    ) -> Self {
        let shared = Arc::new(Shared::new(&settings));
        let thread_shared = Arc::clone(&shared);
        let thread_coordinator = Arc::clone(&coordinator);
        let handle = thread::spawn(move || file_run(thread_shared, thread_coordinator, source, settings));
        FileDataSource {
            shared,
            coordinator,
            thread: Mutex::new(Some(handle)),
        }
    }
}

fn file_run(
    shared: Arc<Shared>,
    coordinator: Arc<SceneCoordinator>,
    source: Box<dyn ReadSeek>,
    settings: PlaybackSettings,
) {
    let mut reader = StreamReader::with_settings(source, settings.keyframes);
    let mut next_frame_start = Instant::now();

    while !shared.quit.load(Ordering::Acquire) {
        if shared.block_on_pause() {
            continue;
        }

        let current = shared.current_frame.load(Ordering::Acquire);
        let target = *shared.target_frame.lock().unwrap();
        match target {
            None => {
                let now = Instant::now();
                if next_frame_start > now {
                    thread::sleep(next_frame_start - now);
                }
            }
            Some(t) if t < current => {
                let reached = reader.seek_to_keyframe(t).unwrap_or(0);
                coordinator.request_reset(reached);
                shared.current_frame.store(reached, Ordering::Release);
                // Catching up: fall through without sleeping until the
                // reader reaches `t`.
            }
            Some(t) if t > current => {
                // Catching up towards the target; sleeps are suppressed
                // below for the duration of this iteration.
            }
            Some(_) => {
                *shared.target_frame.lock().unwrap() = None;
                next_frame_start = Instant::now();
            }
        }
        let catching_up = matches!(target, Some(t) if t != current);

        let mut at_frame = false;
        while !at_frame {
            let packet = match reader.next_packet() {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(err) => {
                    error!("stream read error: {err}");
                    if settings.pause_on_error {
                        *shared.paused.lock().unwrap() = true;
                    }
                    break;
                }
            };
            if let Some(dt) = route_collated(&coordinator, &packet, false) {
                at_frame = true;
                let new_frame = shared.current_frame.fetch_add(1, Ordering::AcqRel) + 1;
                let offset = reader.bytes_read();
                reader.note_frame_advance(new_frame, offset);
                if !catching_up {
                    let speed = *shared.playback_speed.lock().unwrap();
                    let info = coordinator.server_info();
                    let micros = (info.time_unit as f64 * dt as f64 / speed.max(f32::EPSILON) as f64) as u64;
                    next_frame_start = Instant::now() + Duration::from_micros(micros);
                }
            }
        }

        if !at_frame {
            // Clean end of stream.
            if shared.looping.load(Ordering::Acquire) {
                *shared.target_frame.lock().unwrap() = Some(0);
            } else {
                // Nothing left to do but wait for a seek, loop toggle or
                // stop; avoid a hot spin.
                thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

impl DataSource for FileDataSource {
    fn is_live_stream(&self) -> bool {
        false
    }

    fn current_frame(&self) -> u32 {
        self.shared.current_frame.load(Ordering::Acquire)
    }

    fn total_frames(&self) -> u32 {
        self.coordinator.total_frames()
    }

    fn target_frame(&self) -> Option<u32> {
        *self.shared.target_frame.lock().unwrap()
    }

    fn set_target_frame(&self, frame: u32) {
        *self.shared.target_frame.lock().unwrap() = Some(frame);
        self.shared.nudge();
    }

    fn paused(&self) -> bool {
        *self.shared.paused.lock().unwrap()
    }

    fn pause(&self) {
        *self.shared.paused.lock().unwrap() = true;
    }

    fn unpause(&self) {
        self.shared.wake();
    }

    fn looping(&self) -> bool {
        self.shared.looping.load(Ordering::Acquire)
    }

    fn set_looping(&self, loop_playback: bool) {
        self.shared.looping.store(loop_playback, Ordering::Release);
    }

    fn playback_speed(&self) -> f32 {
        *self.shared.playback_speed.lock().unwrap()
    }

    fn set_playback_speed(&self, speed: f32) {
        *self.shared.playback_speed.lock().unwrap() = speed.max(f32::EPSILON);
    }

    fn stop(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.shared.wake();
    }

    fn join(&self) {
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// Opens a TCP connection to a server and ingests its live packet stream,
/// reconnecting on failure when allowed (`spec.md` §4.8 "Live network").
/// Playback controls are no-ops: `is_live_stream()` is always `true`.
pub struct NetworkDataSource {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkDataSource {
    pub fn new(
        coordinator: Arc<SceneCoordinator>,
        host: String,
        port: u16,
        allow_reconnect: bool,
    ) -> Self {
        let shared = Arc::new(Shared::new(&PlaybackSettings::default()));
        let thread_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            network_run(thread_shared, coordinator, host, port, allow_reconnect)
        });
        NetworkDataSource {
            shared,
            thread: Mutex::new(Some(handle)),
        }
    }
}

const RECONNECT_INTERVAL: Duration = Duration::from_millis(200);

fn network_run(
    shared: Arc<Shared>,
    coordinator: Arc<SceneCoordinator>,
    host: String,
    port: u16,
    mut allow_reconnect: bool,
) {
    loop {
        if shared.quit.load(Ordering::Acquire) {
            return;
        }
        match TcpStream::connect((host.as_str(), port)) {
            Ok(stream) => {
                coordinator.request_reset(0);
                shared.current_frame.store(0, Ordering::Release);
                shared.total_frames.store(0, Ordering::Release);
                network_session(&shared, &coordinator, stream);
            }
            Err(err) => {
                warn!("connection to {host}:{port} failed: {err}");
            }
        }
        allow_reconnect = allow_reconnect && !shared.quit.load(Ordering::Acquire);
        if !allow_reconnect {
            return;
        }
        thread::sleep(RECONNECT_INTERVAL);
    }
}

fn network_session(shared: &Arc<Shared>, coordinator: &Arc<SceneCoordinator>, stream: TcpStream) {
    let mut reader = StreamReader::new(stream);
    while !shared.quit.load(Ordering::Acquire) {
        match reader.next_packet() {
            Ok(Some(bytes)) => {
                route_collated(coordinator, &bytes, true);
                let frame = coordinator.frame_stamp().frame;
                let current = shared.current_frame.swap(frame, Ordering::AcqRel);
                if frame > current {
                    shared
                        .total_frames
                        .fetch_max(frame, Ordering::AcqRel);
                }
            }
            Ok(None) => return, // connection closed
            Err(err) => {
                error!("socket read error: {err}");
                return;
            }
        }
    }
}

impl DataSource for NetworkDataSource {
    fn is_live_stream(&self) -> bool {
        true
    }

    fn current_frame(&self) -> u32 {
        self.shared.current_frame.load(Ordering::Acquire)
    }

    fn total_frames(&self) -> u32 {
        self.shared.total_frames.load(Ordering::Acquire)
    }

    fn target_frame(&self) -> Option<u32> {
        None
    }

    fn set_target_frame(&self, _frame: u32) {}

    fn paused(&self) -> bool {
        false
    }

    fn pause(&self) {}

    fn unpause(&self) {}

    fn looping(&self) -> bool {
        false
    }

    fn set_looping(&self, _loop_playback: bool) {}

    fn playback_speed(&self) -> f32 {
        1.0
    }

    fn set_playback_speed(&self, _speed: f32) {}

    fn stop(&self) {
        self.shared.quit.store(true, Ordering::Release);
    }

    fn join(&self) {
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::culler::BoundsCuller;
    use crate::messages::ControlMessageId;
    use crate::packet::PacketWriter;
    use std::io::Cursor as IoCursor;

    fn new_coordinator() -> Arc<SceneCoordinator> {
        Arc::new(SceneCoordinator::new(Arc::new(Mutex::new(BoundsCuller::new()))))
    }

    fn frame_packet(dt: u32) -> Vec<u8> {
        let mut writer = PacketWriter::new(RoutingId::Control as u16, ControlMessageId::Frame as u16);
        ControlMessage { value32: dt }.write(&mut writer).unwrap();
        writer.finalise().unwrap()
    }

    #[test]
    fn route_packet_advances_coordinator_frame_on_control_frame() {
        let coordinator = new_coordinator();
        let dt = route_packet(&coordinator, &frame_packet(16_667), false);
        assert_eq!(dt, Some(16_667));
        coordinator.render(&crate::culler::Frustum::new(Vec::new()), &crate::handler::DrawParams::default());
        assert_eq!(coordinator.frame_stamp().frame, 1);
    }

    #[test]
    fn live_frame_control_never_reports_a_pacing_delay() {
        let coordinator = new_coordinator();
        let dt = route_packet(&coordinator, &frame_packet(16_667), true);
        assert_eq!(dt, None);
    }

    #[test]
    fn file_data_source_replays_to_completion_and_reports_current_frame() {
        let coordinator = new_coordinator();
        let mut bytes = Vec::new();
        for _ in 0..3 {
            bytes.extend(frame_packet(1));
        }
        let source = FileDataSource::new(
            coordinator,
            Box::new(IoCursor::new(bytes)),
            PlaybackSettings {
                playback_speed: 1000.0,
                ..PlaybackSettings::default()
            },
        );
        // Replay is fast (dt=1 time unit, speed 1000x); poll briefly for
        // the reader thread to reach the end.
        for _ in 0..200 {
            if source.current_frame() == 3 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(source.current_frame(), 3);
        source.stop();
        source.join();
    }

    #[test]
    fn set_target_frame_wakes_a_paused_file_source() {
        let coordinator = new_coordinator();
        let bytes = frame_packet(1);
        let source = FileDataSource::new(
            coordinator,
            Box::new(IoCursor::new(bytes)),
            PlaybackSettings::default(),
        );
        source.pause();
        assert!(source.paused());
        source.set_target_frame(0);
        // set_target_frame wakes the reader even while paused (a seek
        // request is serviced regardless of pause state).
        for _ in 0..200 {
            if source.target_frame().is_none() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        source.stop();
        source.join();
    }
}
