use a3d_core::*;
use a3d_reflections::backends::{SimBuffer, SimDevice, SimOp};
use a3d_reflections::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

const BUFFER_BYTES: u32 = 65536;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (SimDevice, Arc<SimBuffer>) {
    init_tracing();
    let device = SimDevice::hardware(16);
    let source = device.create_buffer(
        BufferCaps {
            flags: SimDevice::reflection_flags(),
            buffer_bytes: BUFFER_BYTES,
        },
        WaveFormat::new(2, 44100, 16),
    );
    (device, source)
}

fn engine(device: &SimDevice, source: &Arc<SimBuffer>) -> ReflectionEngine {
    ReflectionEngine::initialize(
        Arc::new(device.clone()),
        source.clone(),
        &EngineConfig::default(),
    )
    .unwrap()
}

fn reflection(delay: f32, gain: f32) -> ReflectionParams {
    let ear = EarParams {
        azimuth: 0.5,
        elevation: 0.0,
        gain,
        delay,
    };
    ReflectionParams {
        enable: true,
        available: true,
        mute: false,
        alpha: 0.0,
        left_ear: ear,
        right_ear: ear,
    }
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_initialize_reads_source_geometry() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    assert_eq!(engine.timing(), Timing::new(BUFFER_BYTES, 2, 44100));
    assert_eq!(engine.ready_count(), 0);
    assert_eq!(engine.service_state(), ServiceState::Idle);

    let voice = device.voice(source.id()).unwrap();
    assert_eq!(voice.notifications, vec![NotifyOffset::Stop]);
}

#[test]
fn test_initialize_rejects_software_device() {
    let (_, source) = setup();
    let device = SimDevice::new(DeviceCaps {
        max_hw_3d_buffers: 0,
        continuous_rate: true,
    });
    let result = ReflectionEngine::initialize(
        Arc::new(device),
        source,
        &EngineConfig::default(),
    );
    assert!(matches!(result, Err(ReflectionError::DeviceUnsupported)));
}

#[test]
fn test_initialize_rejects_source_without_notify() {
    let (device, _) = setup();
    let source = device.create_buffer(
        BufferCaps {
            flags: BufferFlags {
                ctrl_3d: true,
                loc_hardware: true,
                ctrl_position_notify: false,
            },
            buffer_bytes: BUFFER_BYTES,
        },
        WaveFormat::default(),
    );
    let result = ReflectionEngine::initialize(
        Arc::new(device.clone()),
        source,
        &EngineConfig::default(),
    );
    assert!(matches!(result, Err(ReflectionError::SourceUnsupported(_))));
}

#[test]
fn test_initialize_disabled_by_config() {
    let (device, source) = setup();
    let config = EngineConfig {
        enabled: false,
        ..Default::default()
    };
    let result = ReflectionEngine::initialize(Arc::new(device), source, &config);
    assert!(matches!(result, Err(ReflectionError::Disabled)));
}

#[test]
fn test_apply_while_stopped_arms_reflection() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    engine
        .apply_control_packet(&[reflection(0.01, 0.5)], 44100)
        .unwrap();

    let slot = engine.snapshot()[0];
    assert!(slot.active);
    assert!(slot.armed);
    assert_eq!(slot.offset, 882);
    assert_eq!(engine.ready_count(), 1);
    assert_eq!(engine.armed_count(), 1);
    assert_eq!(engine.service_state(), ServiceState::Running);

    let voice = device.voice(source.id()).unwrap();
    assert_eq!(
        voice.notifications,
        vec![NotifyOffset::Stop, NotifyOffset::At(882)]
    );

    let duplicates = device.duplicates_of(source.id());
    assert_eq!(duplicates.len(), 1);
    assert!(!duplicates[0].playing);
    assert_eq!(duplicates[0].volume, -602);
    assert_eq!(duplicates[0].params.unwrap().mode, Mode3d::HeadRelative);
}

#[test]
fn test_service_starts_reflection_when_offset_crossed() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    engine
        .apply_control_packet(&[reflection(0.01, 0.5)], 44100)
        .unwrap();

    source.play(true).unwrap();
    // 176400 bytes per second of stereo 16-bit: 10 ms moves the cursor 1764 bytes
    device.advance(Duration::from_millis(10));
    assert_eq!(source.current_position().unwrap(), 1764);

    assert!(wait_until(|| engine.armed_count() == 0));
    assert!(wait_until(|| device.duplicates_of(source.id())[0].playing));

    let voice = device.duplicates_of(source.id()).remove(0);
    assert!(voice.looping);
    assert_eq!(voice.cursor, 1764 - 882);
    assert_eq!(voice.frequency, 44100);
    assert_eq!(engine.service_state(), ServiceState::Running);
}

#[test]
fn test_apply_while_playing_starts_immediately() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    source.set_current_position(10_000).unwrap();
    source.play(true).unwrap();

    engine
        .apply_control_packet(&[reflection(0.01, 1.0)], 44100)
        .unwrap();

    let voice = device.duplicates_of(source.id()).remove(0);
    assert!(voice.playing);
    assert!(voice.looping);
    assert_eq!(voice.cursor, 10_000 - 882);
    assert_eq!(voice.volume, 0);
    assert_eq!(engine.armed_count(), 0);
    assert_eq!(engine.service_state(), ServiceState::Idle);
}

#[test]
fn test_offset_wraps_behind_buffer_start() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    source.set_current_position(100).unwrap();
    source.play(false).unwrap();
    engine
        .apply_control_packet(&[reflection(0.01, 1.0)], 44100)
        .unwrap();

    let voice = device.duplicates_of(source.id()).remove(0);
    assert_eq!(voice.cursor, BUFFER_BYTES + 100 - 882);
    assert!(!voice.looping);
}

#[test]
fn test_entries_beyond_capacity_ignored() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    let entries: Vec<ReflectionParams> = (0..MAX_SOURCE_REFLECTIONS + 1)
        .map(|i| reflection(0.005 * (i + 1) as f32, 0.5))
        .collect();
    engine.apply_control_packet(&entries, 44100).unwrap();

    assert_eq!(engine.ready_count(), MAX_SOURCE_REFLECTIONS);
    assert_eq!(device.stats().duplicated, MAX_SOURCE_REFLECTIONS as u32);
}

#[test]
fn test_coinciding_delays_get_distinct_offsets() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    let entries = [reflection(0.01, 0.5); 3];
    engine.apply_control_packet(&entries, 44100).unwrap();

    let offsets: Vec<u32> = engine.snapshot()[..3].iter().map(|s| s.offset).collect();
    assert_eq!(offsets, vec![882, 884, 886]);

    let voice = device.voice(source.id()).unwrap();
    assert_eq!(voice.notifications.len(), 4);
}

#[test]
fn test_disabling_entry_releases_slot() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    engine
        .apply_control_packet(&[reflection(0.01, 0.5), reflection(0.02, 0.5)], 44100)
        .unwrap();
    assert_eq!(engine.ready_count(), 2);

    let mut muted = reflection(0.01, 0.5);
    muted.mute = true;
    engine
        .apply_control_packet(&[muted, reflection(0.02, 0.5)], 44100)
        .unwrap();

    let slots = engine.snapshot();
    assert!(!slots[0].active);
    assert!(!slots[0].armed);
    assert!(slots[1].active);
    assert_eq!(device.stats().released, 1);

    let voice = device.voice(source.id()).unwrap();
    assert_eq!(
        voice.notifications,
        vec![NotifyOffset::Stop, NotifyOffset::At(1764)]
    );

    // An empty packet disables everything
    engine.apply_control_packet(&[], 44100).unwrap();
    assert_eq!(engine.ready_count(), 0);
    assert_eq!(device.stats().released, 2);
}

#[test]
fn test_repeated_apply_reuses_voices() {
    let (device, source) = setup();
    let engine = engine(&device, &source);
    source.play(true).unwrap();

    let entries = [reflection(0.01, 0.5), reflection(0.03, 0.25)];
    engine.apply_control_packet(&entries, 44100).unwrap();
    engine.apply_control_packet(&entries, 44100).unwrap();

    let stats = device.stats();
    assert_eq!(stats.duplicated, 2);
    assert_eq!(stats.released, 0);
    assert_eq!(engine.ready_count(), 2);
}

#[test]
fn test_stop_releases_everything() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    engine
        .apply_control_packet(&[reflection(0.01, 0.5), reflection(0.02, 0.5)], 44100)
        .unwrap();
    engine.stop();

    assert_eq!(engine.ready_count(), 0);
    assert_eq!(engine.armed_count(), 0);
    assert!(device.duplicates_of(source.id()).is_empty());
}

#[test]
fn test_backend_failure_stops_all_reflections() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    engine
        .apply_control_packet(&[reflection(0.01, 0.5)], 44100)
        .unwrap();
    assert_eq!(engine.ready_count(), 1);

    device.fail_on(SimOp::Duplicate);
    let result =
        engine.apply_control_packet(&[reflection(0.01, 0.5), reflection(0.02, 0.5)], 44100);

    assert!(matches!(result, Err(ReflectionError::Backend(_))));
    assert_eq!(engine.ready_count(), 0);
    assert!(device.duplicates_of(source.id()).is_empty());
}

#[test]
fn test_source_stop_ends_service() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    engine
        .apply_control_packet(&[reflection(0.2, 0.5)], 44100)
        .unwrap();
    assert_eq!(engine.service_state(), ServiceState::Running);

    source.play(true).unwrap();
    source.stop().unwrap();

    assert!(wait_until(|| engine.service_state() == ServiceState::Stopped));
    assert_eq!(engine.ready_count(), 0);

    // A later stopped-source apply starts a fresh thread
    engine
        .apply_control_packet(&[reflection(0.01, 0.5)], 44100)
        .unwrap();
    assert_eq!(engine.service_state(), ServiceState::Running);
    assert_eq!(engine.armed_count(), 1);
}

#[test]
fn test_track_delay_speeds_up_lagging_reflection() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    source.set_current_position(10_000).unwrap();
    source.play(true).unwrap();
    engine
        .apply_control_packet(&[reflection(0.01, 0.5)], 44100)
        .unwrap();

    engine.track_delay().unwrap();
    assert_eq!(device.duplicates_of(source.id())[0].frequency, 44100);

    // Source jumps ahead: the reflection now trails by far more than 882 bytes
    source.set_current_position(15_000).unwrap();
    engine.track_delay().unwrap();
    assert_eq!(device.duplicates_of(source.id())[0].frequency, 44100 * 130 / 128);

    // Source jumps back behind the target: slow down
    source.set_current_position(9_500).unwrap();
    engine.track_delay().unwrap();
    assert_eq!(device.duplicates_of(source.id())[0].frequency, 44100 * 126 / 128);
}

#[test]
fn test_track_delay_ignores_armed_slots() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    engine
        .apply_control_packet(&[reflection(0.01, 0.5)], 44100)
        .unwrap();
    engine.track_delay().unwrap();

    assert_eq!(device.stats().plays, 0);
    assert_eq!(engine.armed_count(), 1);
}

#[test]
fn test_drop_tears_down_service_and_voices() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    engine
        .apply_control_packet(&[reflection(0.01, 0.5), reflection(0.05, 0.5)], 44100)
        .unwrap();
    assert_eq!(engine.service_state(), ServiceState::Running);

    let started = Instant::now();
    drop(engine);

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(device.duplicates_of(source.id()).is_empty());
    assert_eq!(device.stats().released, 2);
    // Stopped source: nothing stays registered for the dead engine
    assert!(device.voice(source.id()).unwrap().notifications.is_empty());
}

#[test]
fn test_drop_while_playing_keeps_source_registrations() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    source.play(true).unwrap();
    engine
        .apply_control_packet(&[reflection(0.01, 0.5)], 44100)
        .unwrap();
    drop(engine);

    assert!(device.duplicates_of(source.id()).is_empty());
    assert_eq!(
        device.voice(source.id()).unwrap().notifications,
        vec![NotifyOffset::Stop]
    );
    // Signalling a registration whose engine is gone is harmless
    source.stop().unwrap();
}

#[test]
fn test_delayed_start_failure_stops_service() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    engine
        .apply_control_packet(&[reflection(0.01, 0.5), reflection(0.02, 0.5)], 44100)
        .unwrap();
    assert_eq!(engine.ready_count(), 2);

    device.fail_on(SimOp::SetPosition);
    source.play(true).unwrap();
    device.advance(Duration::from_millis(10));

    assert!(wait_until(|| engine.service_state() == ServiceState::Stopped));
    assert_eq!(engine.ready_count(), 0);
    assert_eq!(engine.armed_count(), 0);
    assert!(device.duplicates_of(source.id()).is_empty());
    assert!(source.status().unwrap().playing);
}

#[test]
fn test_reflection_armed_while_service_running_is_started() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    engine
        .apply_control_packet(&[reflection(0.01, 0.5)], 44100)
        .unwrap();
    assert_eq!(engine.service_state(), ServiceState::Running);

    // Second reflection joins while the thread is already waiting
    engine
        .apply_control_packet(&[reflection(0.01, 0.5), reflection(0.02, 0.5)], 44100)
        .unwrap();
    assert_eq!(engine.armed_count(), 2);
    assert_eq!(engine.service_state(), ServiceState::Running);

    source.play(true).unwrap();
    // 20 ms = 3528 bytes, past both 882 and 1764
    device.advance(Duration::from_millis(20));

    assert!(wait_until(|| engine.armed_count() == 0));
    assert!(wait_until(|| device
        .duplicates_of(source.id())
        .iter()
        .all(|v| v.playing)));

    let slots = engine.snapshot();
    assert!(slots[1].active);
    assert!(!slots[1].armed);

    let mut cursors: Vec<u32> = device
        .duplicates_of(source.id())
        .iter()
        .map(|v| v.cursor)
        .collect();
    cursors.sort_unstable();
    assert_eq!(cursors, vec![3528 - 1764, 3528 - 882]);
    assert_eq!(engine.service_state(), ServiceState::Running);
}

#[test]
fn test_reflection_notification_after_source_stopped_ends_service() {
    let (device, source) = setup();
    let engine = engine(&device, &source);

    engine
        .apply_control_packet(&[reflection(0.01, 0.5)], 44100)
        .unwrap();
    assert_eq!(engine.service_state(), ServiceState::Running);

    // The offset notification arrives but the source is not playing
    assert_eq!(device.signal_position(source.id(), NotifyOffset::At(882)), 1);

    assert!(wait_until(|| engine.service_state() == ServiceState::Stopped));
    assert_eq!(engine.ready_count(), 0);
    assert_eq!(device.stats().plays, 0);
    assert!(device.duplicates_of(source.id()).is_empty());
}

fn packet(freq_factor: f32, reflections: &[ReflectionParams]) -> ControlPacket {
    let mut packet = ControlPacket {
        left_ear: EarParams {
            azimuth: 0.0,
            elevation: 0.0,
            gain: 1.0,
            delay: 0.0,
        },
        right_ear: EarParams {
            azimuth: 0.0,
            elevation: 0.0,
            gain: 1.0,
            delay: 0.0,
        },
        alpha: 0.0,
        freq_factor,
        ..Default::default()
    };
    packet.reflections[..reflections.len()].copy_from_slice(reflections);
    packet
}

#[test]
fn test_dal_voice_drives_source_and_reflections() {
    let (device, source) = setup();
    let mut voice = DalVoice::new(
        Arc::new(device.clone()),
        source.clone(),
        &EngineConfig::default(),
    );
    assert!(voice.has_reflections());

    voice
        .set_control(&packet(1.5, &[reflection(0.01, 0.5)]))
        .unwrap();

    let snapshot = device.voice(source.id()).unwrap();
    assert_eq!(snapshot.frequency, 33075);
    assert_eq!(snapshot.volume, 0);
    let position = snapshot.params.unwrap().position;
    assert!(position.x.abs() < 1e-6);
    assert!((position.z - 1.0).abs() < 1e-6);

    assert_eq!(voice.reflections_ready(), 1);
    // 33075 Hz * 2 bytes * 10 ms
    assert_eq!(voice.engine().unwrap().snapshot()[0].offset, 662);
}

#[test]
fn test_dal_voice_repeated_packet_only_tracks() {
    let (device, source) = setup();
    let mut voice = DalVoice::new(
        Arc::new(device.clone()),
        source.clone(),
        &EngineConfig::default(),
    );
    source.play(true).unwrap();

    let control = packet(2.0, &[reflection(0.01, 0.5)]);
    voice.set_control(&control).unwrap();
    let after_first = device.stats();

    // Volume changed behind the wrapper's back stays untouched by a cached packet
    source.set_volume(-100).unwrap();
    voice.set_control(&control).unwrap();

    assert_eq!(device.voice(source.id()).unwrap().volume, -100);
    assert_eq!(device.stats().duplicated, after_first.duplicated);
    assert_eq!(voice.reflections_ready(), 1);
}

#[test]
fn test_dal_voice_without_reflection_support() {
    let (_, source) = setup();
    let device = SimDevice::new(DeviceCaps {
        max_hw_3d_buffers: 4,
        continuous_rate: false,
    });
    let mut voice = DalVoice::new(Arc::new(device), source.clone(), &EngineConfig::default());

    assert!(!voice.has_reflections());
    voice
        .set_control(&packet(1.0, &[reflection(0.01, 0.5)]))
        .unwrap();
    assert_eq!(voice.reflections_ready(), 0);
    assert_eq!(source.frequency().unwrap(), 22050);
}
