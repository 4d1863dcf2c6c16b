use serde::{Deserialize, Serialize};

/// Number of early-reflection voices a single source can drive.
pub const MAX_SOURCE_REFLECTIONS: usize = 8;

/// Lowest volume the backend accepts (hundredths of a decibel, silence).
pub const VOLUME_MIN: i32 = -10_000;

/// Highest volume the backend accepts (unattenuated).
pub const VOLUME_MAX: i32 = 0;

/// Default cone angle in degrees for inside and outside cones.
pub const DEFAULT_CONE_ANGLE: u32 = 360;

/// Directional and level parameters for one ear.
///
/// Angles are in radians, delay in seconds, gain linear.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EarParams {
    pub azimuth: f32,
    pub elevation: f32,
    pub gain: f32,
    pub delay: f32,
}

/// Desired state of one reflection slot as carried by a control packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionParams {
    pub enable: bool,
    pub available: bool,
    pub mute: bool,
    /// High-frequency absorption factor (0.0 = none).
    pub alpha: f32,
    pub left_ear: EarParams,
    pub right_ear: EarParams,
}

impl ReflectionParams {
    /// Whether the slot should carry a live reflection voice.
    pub fn is_audible(&self) -> bool {
        self.enable && self.available && !self.mute
    }

    /// Mean delay of both ears in seconds.
    pub fn average_delay(&self) -> f32 {
        (self.left_ear.delay + self.right_ear.delay) * 0.5
    }

    /// Mean gain of both ears.
    pub fn average_gain(&self) -> f32 {
        (self.left_ear.gain + self.right_ear.gain) * 0.5
    }

    /// Mean azimuth and elevation of both ears.
    pub fn average_direction(&self) -> (f32, f32) {
        average_direction(&self.left_ear, &self.right_ear)
    }
}

/// Per-source control packet, sent periodically by the renderer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlPacket {
    pub left_ear: EarParams,
    pub right_ear: EarParams,
    pub alpha: f32,
    /// Playback rate multiplier applied to the base sample rate.
    pub freq_factor: f32,
    pub reflections: [ReflectionParams; MAX_SOURCE_REFLECTIONS],
}

impl ControlPacket {
    /// Mean gain of both ears for the source voice.
    pub fn average_gain(&self) -> f32 {
        (self.left_ear.gain + self.right_ear.gain) * 0.5
    }

    /// Mean azimuth and elevation for the source voice.
    pub fn average_direction(&self) -> (f32, f32) {
        average_direction(&self.left_ear, &self.right_ear)
    }

    /// Number of reflection entries that ask for a live voice.
    pub fn audible_reflections(&self) -> usize {
        self.reflections.iter().filter(|r| r.is_audible()).count()
    }
}

fn average_direction(left: &EarParams, right: &EarParams) -> (f32, f32) {
    (
        (left.azimuth + right.azimuth) * 0.5,
        (left.elevation + right.elevation) * 0.5,
    )
}

/// Device-wide capabilities reported by the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCaps {
    /// Number of simultaneous hardware-mixed 3-D voices.
    pub max_hw_3d_buffers: u32,
    /// Hardware supports arbitrary playback rates.
    pub continuous_rate: bool,
}

impl DeviceCaps {
    /// Whether the device can host delayed reflection voices at all.
    pub fn supports_reflections(&self) -> bool {
        self.max_hw_3d_buffers > 0 && self.continuous_rate
    }
}

/// Capability flags of a single voice buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferFlags {
    pub ctrl_3d: bool,
    pub loc_hardware: bool,
    pub ctrl_position_notify: bool,
}

impl BufferFlags {
    /// Flags a source voice needs before reflections can track it.
    pub fn supports_reflections(&self) -> bool {
        self.ctrl_3d && self.loc_hardware && self.ctrl_position_notify
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferCaps {
    pub flags: BufferFlags,
    /// Length of the circular buffer in bytes.
    pub buffer_bytes: u32,
}

/// PCM layout of a voice buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveFormat {
    pub channels: u16,
    pub samples_per_sec: u32,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    pub fn new(channels: u16, samples_per_sec: u32, bits_per_sample: u16) -> Self {
        Self {
            channels,
            samples_per_sec,
            bits_per_sample,
        }
    }

    /// Bytes occupied by one sample of one channel.
    pub fn bytes_per_sample(&self) -> u32 {
        u32::from(self.bits_per_sample / 8)
    }

    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> u32 {
        self.bytes_per_sample() * u32::from(self.channels)
    }
}

impl Default for WaveFormat {
    fn default() -> Self {
        Self::new(2, 22050, 16)
    }
}

/// Playback status of a voice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStatus {
    pub playing: bool,
    pub looping: bool,
    pub buffer_lost: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode3d {
    Normal,
    #[default]
    HeadRelative,
    Disable,
}

/// Full 3-D parameter block applied to a voice in one call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Buffer3dParams {
    pub position: Vector3,
    pub velocity: Vector3,
    pub inside_cone_angle: u32,
    pub outside_cone_angle: u32,
    pub cone_orientation: Vector3,
    pub cone_outside_volume: i32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub mode: Mode3d,
}

impl Buffer3dParams {
    /// Head-relative block placed at `position`, one unit-ish away from the listener.
    pub fn head_relative(position: Vector3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

impl Default for Buffer3dParams {
    fn default() -> Self {
        Self {
            position: Vector3::default(),
            velocity: Vector3::default(),
            inside_cone_angle: DEFAULT_CONE_ANGLE,
            outside_cone_angle: DEFAULT_CONE_ANGLE,
            cone_orientation: Vector3::new(0.0, 0.0, 1.0),
            cone_outside_volume: VOLUME_MAX,
            min_distance: 0.5,
            max_distance: 2.0,
            mode: Mode3d::HeadRelative,
        }
    }
}

/// Opaque identity of a backend voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoiceId(pub u64);

impl std::fmt::Display for VoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "voice#{}", self.0)
    }
}
