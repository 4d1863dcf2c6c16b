//! Software stand-in for a hardware 3-D audio device.
//!
//! No audio is produced. Each voice is a play cursor over a circular byte
//! buffer that moves only when [`SimDevice::advance`] is called, which
//! makes cursor arithmetic and notification timing deterministic.

use a3d_core::{
    BackendError, BackendResult, Buffer3dParams, BufferCaps, BufferFlags, BufferStatus,
    DeviceCaps, NotifyEvent, NotifyOffset, NotifyPosition, PositionNotify, Positional3d,
    SoundBuffer, SoundDevice, VoiceId, WaveFormat, VOLUME_MAX, VOLUME_MIN,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Backend operations that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SimOp {
    DeviceCaps,
    Duplicate,
    BufferCaps,
    Format,
    Status,
    GetPosition,
    SetPosition,
    Play,
    Stop,
    SetFrequency,
    SetVolume,
    Positional,
    SetParameters,
    Notifier,
    SetNotifications,
}

impl SimOp {
    fn name(self) -> &'static str {
        match self {
            SimOp::DeviceCaps => "device_caps",
            SimOp::Duplicate => "duplicate_buffer",
            SimOp::BufferCaps => "buffer_caps",
            SimOp::Format => "format",
            SimOp::Status => "status",
            SimOp::GetPosition => "current_position",
            SimOp::SetPosition => "set_current_position",
            SimOp::Play => "play",
            SimOp::Stop => "stop",
            SimOp::SetFrequency => "set_frequency",
            SimOp::SetVolume => "set_volume",
            SimOp::Positional => "positional",
            SimOp::SetParameters => "set_all_parameters",
            SimOp::Notifier => "notifier",
            SimOp::SetNotifications => "set_notification_positions",
        }
    }
}

/// Lifetime counters of the simulated device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub created: u32,
    pub duplicated: u32,
    pub released: u32,
    pub plays: u32,
}

/// Observable state of one simulated voice.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VoiceSnapshot {
    pub id: VoiceId,
    pub duplicate_of: Option<VoiceId>,
    pub playing: bool,
    pub looping: bool,
    pub cursor: u32,
    pub frequency: u32,
    pub volume: i32,
    pub params: Option<Buffer3dParams>,
    pub notifications: Vec<NotifyOffset>,
}

struct SimVoice {
    caps: BufferCaps,
    format: WaveFormat,
    status: BufferStatus,
    cursor: u32,
    /// Sub-byte remainder carried between advances
    carry: f64,
    frequency: u32,
    volume: i32,
    params: Option<Buffer3dParams>,
    notifications: Vec<NotifyPosition>,
    duplicate_of: Option<VoiceId>,
}

impl SimVoice {
    fn snapshot(&self, id: VoiceId) -> VoiceSnapshot {
        VoiceSnapshot {
            id,
            duplicate_of: self.duplicate_of,
            playing: self.status.playing,
            looping: self.status.looping,
            cursor: self.cursor,
            frequency: self.frequency,
            volume: self.volume,
            params: self.params,
            notifications: self.notifications.iter().map(|p| p.offset).collect(),
        }
    }

    fn stop_events(&self) -> impl Iterator<Item = NotifyEvent> + '_ {
        self.notifications
            .iter()
            .filter(|p| p.offset == NotifyOffset::Stop)
            .map(|p| p.event.clone())
    }

    /// Move the cursor forward, returning the events it crossed.
    fn advance(&mut self, elapsed: Duration) -> Vec<NotifyEvent> {
        let size = self.caps.buffer_bytes;
        if !self.status.playing || size == 0 {
            return Vec::new();
        }

        let bytes = f64::from(self.frequency) * f64::from(self.format.block_align())
            * elapsed.as_secs_f64()
            + self.carry;
        let whole = bytes.floor();
        self.carry = bytes - whole;
        let step = whole as u64;
        if step == 0 {
            return Vec::new();
        }

        let start = u64::from(self.cursor);
        let end = start + step;
        let size64 = u64::from(size);
        let mut fired = Vec::new();

        if !self.status.looping && end >= size64 {
            // Runs off the end: everything ahead fires, then the voice stops
            for position in &self.notifications {
                if let NotifyOffset::At(offset) = position.offset {
                    if u64::from(offset) > start {
                        fired.push(position.event.clone());
                    }
                }
            }
            self.cursor = 0;
            self.carry = 0.0;
            self.status.playing = false;
            fired.extend(self.stop_events());
            return fired;
        }

        for position in &self.notifications {
            if let NotifyOffset::At(offset) = position.offset {
                let offset = u64::from(offset);
                // Offset is crossed if some k*size + offset lies in (start, end]
                let first = if offset > start {
                    offset
                } else {
                    offset + size64 * ((start - offset) / size64 + 1)
                };
                if first <= end {
                    fired.push(position.event.clone());
                }
            }
        }
        self.cursor = (end % size64) as u32;
        fired
    }
}

struct SimWorld {
    voices: HashMap<VoiceId, SimVoice>,
    next_id: u64,
    failures: HashSet<SimOp>,
    stats: SimStats,
}

impl SimWorld {
    fn check(&self, op: SimOp) -> BackendResult<()> {
        if self.failures.contains(&op) {
            return Err(BackendError::failed(op.name()));
        }
        Ok(())
    }

    fn voice(&self, id: VoiceId) -> BackendResult<&SimVoice> {
        self.voices
            .get(&id)
            .ok_or_else(|| BackendError::InvalidParam(format!("{id} released")))
    }

    fn voice_mut(&mut self, id: VoiceId) -> BackendResult<&mut SimVoice> {
        self.voices
            .get_mut(&id)
            .ok_or_else(|| BackendError::InvalidParam(format!("{id} released")))
    }

    fn insert(&mut self, voice: SimVoice) -> VoiceId {
        self.next_id += 1;
        let id = VoiceId(self.next_id);
        self.voices.insert(id, voice);
        id
    }
}

fn signal_all(events: Vec<NotifyEvent>) {
    for event in events {
        trace!(token = ?event.token(), "sim notification");
        event.signal();
    }
}

/// Simulated device. Cloning yields another handle to the same device.
#[derive(Clone)]
pub struct SimDevice {
    caps: DeviceCaps,
    world: Arc<Mutex<SimWorld>>,
}

impl SimDevice {
    pub fn new(caps: DeviceCaps) -> Self {
        Self {
            caps,
            world: Arc::new(Mutex::new(SimWorld {
                voices: HashMap::new(),
                next_id: 0,
                failures: HashSet::new(),
                stats: SimStats::default(),
            })),
        }
    }

    /// A device with hardware 3-D voices and continuous-rate playback.
    pub fn hardware(max_hw_3d_buffers: u32) -> Self {
        Self::new(DeviceCaps {
            max_hw_3d_buffers,
            continuous_rate: true,
        })
    }

    /// Flags of a hardware voice able to host reflections.
    pub fn reflection_flags() -> BufferFlags {
        BufferFlags {
            ctrl_3d: true,
            loc_hardware: true,
            ctrl_position_notify: true,
        }
    }

    pub fn create_buffer(&self, caps: BufferCaps, format: WaveFormat) -> Arc<SimBuffer> {
        let mut world = self.world.lock();
        let id = world.insert(SimVoice {
            caps,
            format,
            status: BufferStatus::default(),
            cursor: 0,
            carry: 0.0,
            frequency: format.samples_per_sec,
            volume: VOLUME_MAX,
            params: None,
            notifications: Vec::new(),
            duplicate_of: None,
        });
        world.stats.created += 1;
        Arc::new(SimBuffer {
            id,
            world: self.world.clone(),
        })
    }

    /// Make every subsequent `op` fail until cleared.
    pub fn fail_on(&self, op: SimOp) {
        self.world.lock().failures.insert(op);
    }

    pub fn clear_failures(&self) {
        self.world.lock().failures.clear();
    }

    pub fn stats(&self) -> SimStats {
        self.world.lock().stats
    }

    pub fn voice(&self, id: VoiceId) -> Option<VoiceSnapshot> {
        self.world.lock().voices.get(&id).map(|v| v.snapshot(id))
    }

    /// Live duplicates of `source`, ordered by creation.
    pub fn duplicates_of(&self, source: VoiceId) -> Vec<VoiceSnapshot> {
        let world = self.world.lock();
        let mut voices: Vec<VoiceSnapshot> = world
            .voices
            .iter()
            .filter(|(_, v)| v.duplicate_of == Some(source))
            .map(|(&id, v)| v.snapshot(id))
            .collect();
        voices.sort_by_key(|v| v.id);
        voices
    }

    /// Let `elapsed` of playback time pass on every playing voice.
    pub fn advance(&self, elapsed: Duration) {
        let fired: Vec<NotifyEvent> = {
            let mut world = self.world.lock();
            world
                .voices
                .values_mut()
                .flat_map(|voice| voice.advance(elapsed))
                .collect()
        };
        signal_all(fired);
    }

    /// Fire the events registered at `offset` on voice `id` without moving
    /// its cursor, as a backend delivering a notification late would.
    /// Returns how many events fired.
    pub fn signal_position(&self, id: VoiceId, offset: NotifyOffset) -> usize {
        let fired: Vec<NotifyEvent> = {
            let world = self.world.lock();
            match world.voices.get(&id) {
                Some(voice) => voice
                    .notifications
                    .iter()
                    .filter(|p| p.offset == offset)
                    .map(|p| p.event.clone())
                    .collect(),
                None => Vec::new(),
            }
        };
        let count = fired.len();
        signal_all(fired);
        count
    }
}

impl SoundDevice for SimDevice {
    fn caps(&self) -> BackendResult<DeviceCaps> {
        self.world.lock().check(SimOp::DeviceCaps)?;
        Ok(self.caps)
    }

    fn duplicate_buffer(&self, source: &dyn SoundBuffer) -> BackendResult<Box<dyn SoundBuffer>> {
        let mut world = self.world.lock();
        world.check(SimOp::Duplicate)?;
        let template = world.voice(source.voice_id())?;
        let voice = SimVoice {
            caps: template.caps,
            format: template.format,
            status: BufferStatus::default(),
            cursor: 0,
            carry: 0.0,
            frequency: template.frequency,
            volume: template.volume,
            params: None,
            notifications: Vec::new(),
            duplicate_of: Some(source.voice_id()),
        };
        let id = world.insert(voice);
        world.stats.duplicated += 1;
        Ok(Box::new(SimBuffer {
            id,
            world: self.world.clone(),
        }))
    }
}

/// Handle to a simulated voice; dropping it releases the voice.
pub struct SimBuffer {
    id: VoiceId,
    world: Arc<Mutex<SimWorld>>,
}

impl SimBuffer {
    pub fn id(&self) -> VoiceId {
        self.id
    }
}

impl Drop for SimBuffer {
    fn drop(&mut self) {
        let mut world = self.world.lock();
        if world.voices.remove(&self.id).is_some() {
            world.stats.released += 1;
        }
    }
}

impl SoundBuffer for SimBuffer {
    fn voice_id(&self) -> VoiceId {
        self.id
    }

    fn caps(&self) -> BackendResult<BufferCaps> {
        let world = self.world.lock();
        world.check(SimOp::BufferCaps)?;
        Ok(world.voice(self.id)?.caps)
    }

    fn format(&self) -> BackendResult<WaveFormat> {
        let world = self.world.lock();
        world.check(SimOp::Format)?;
        Ok(world.voice(self.id)?.format)
    }

    fn status(&self) -> BackendResult<BufferStatus> {
        let world = self.world.lock();
        world.check(SimOp::Status)?;
        Ok(world.voice(self.id)?.status)
    }

    fn current_position(&self) -> BackendResult<u32> {
        let world = self.world.lock();
        world.check(SimOp::GetPosition)?;
        Ok(world.voice(self.id)?.cursor)
    }

    fn set_current_position(&self, position: u32) -> BackendResult<()> {
        let mut world = self.world.lock();
        world.check(SimOp::SetPosition)?;
        let voice = world.voice_mut(self.id)?;
        if position >= voice.caps.buffer_bytes {
            return Err(BackendError::InvalidParam(format!(
                "position {position} outside {} byte buffer",
                voice.caps.buffer_bytes
            )));
        }
        voice.cursor = position;
        voice.carry = 0.0;
        Ok(())
    }

    fn play(&self, looping: bool) -> BackendResult<()> {
        let mut world = self.world.lock();
        world.check(SimOp::Play)?;
        let voice = world.voice_mut(self.id)?;
        voice.status.playing = true;
        voice.status.looping = looping;
        world.stats.plays += 1;
        Ok(())
    }

    fn stop(&self) -> BackendResult<()> {
        let fired: Vec<NotifyEvent> = {
            let mut world = self.world.lock();
            world.check(SimOp::Stop)?;
            let voice = world.voice_mut(self.id)?;
            if !voice.status.playing {
                return Ok(());
            }
            voice.status.playing = false;
            voice.stop_events().collect()
        };
        signal_all(fired);
        Ok(())
    }

    fn frequency(&self) -> BackendResult<u32> {
        let world = self.world.lock();
        Ok(world.voice(self.id)?.frequency)
    }

    fn set_frequency(&self, frequency: u32) -> BackendResult<()> {
        let mut world = self.world.lock();
        world.check(SimOp::SetFrequency)?;
        let voice = world.voice_mut(self.id)?;
        // Zero restores the format's native rate
        voice.frequency = if frequency == 0 {
            voice.format.samples_per_sec
        } else {
            frequency
        };
        Ok(())
    }

    fn set_volume(&self, volume: i32) -> BackendResult<()> {
        let mut world = self.world.lock();
        world.check(SimOp::SetVolume)?;
        if !(VOLUME_MIN..=VOLUME_MAX).contains(&volume) {
            return Err(BackendError::InvalidParam(format!("volume {volume}")));
        }
        world.voice_mut(self.id)?.volume = volume;
        Ok(())
    }

    fn positional(&self) -> BackendResult<Box<dyn Positional3d>> {
        let world = self.world.lock();
        world.check(SimOp::Positional)?;
        if !world.voice(self.id)?.caps.flags.ctrl_3d {
            return Err(BackendError::Unsupported("positional"));
        }
        Ok(Box::new(SimControl {
            id: self.id,
            world: self.world.clone(),
        }))
    }

    fn notifier(&self) -> BackendResult<Box<dyn PositionNotify>> {
        let world = self.world.lock();
        world.check(SimOp::Notifier)?;
        if !world.voice(self.id)?.caps.flags.ctrl_position_notify {
            return Err(BackendError::Unsupported("notifier"));
        }
        Ok(Box::new(SimControl {
            id: self.id,
            world: self.world.clone(),
        }))
    }
}

/// Secondary interface of a simulated voice (3-D control or notifications).
struct SimControl {
    id: VoiceId,
    world: Arc<Mutex<SimWorld>>,
}

impl Positional3d for SimControl {
    fn set_all_parameters(&self, params: &Buffer3dParams) -> BackendResult<()> {
        let mut world = self.world.lock();
        world.check(SimOp::SetParameters)?;
        world.voice_mut(self.id)?.params = Some(*params);
        Ok(())
    }
}

impl PositionNotify for SimControl {
    fn set_notification_positions(&self, positions: &[NotifyPosition]) -> BackendResult<()> {
        let mut world = self.world.lock();
        world.check(SimOp::SetNotifications)?;
        let voice = world.voice_mut(self.id)?;
        if voice.status.playing {
            return Err(BackendError::InvalidParam(
                "notifications cannot change while playing".into(),
            ));
        }
        for position in positions {
            if let NotifyOffset::At(offset) = position.offset {
                if offset >= voice.caps.buffer_bytes {
                    return Err(BackendError::InvalidParam(format!(
                        "notification offset {offset} outside buffer"
                    )));
                }
            }
        }
        voice.notifications = positions.to_vec();
        Ok(())
    }
}
