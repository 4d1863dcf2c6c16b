use crate::error::BackendResult;
use crate::models::{
    Buffer3dParams, BufferCaps, BufferStatus, DeviceCaps, VoiceId, WaveFormat,
};
use crate::notify::NotifyPosition;

/// Playback device able to mint independent copies of a voice.
pub trait SoundDevice: Send + Sync {
    /// Device-wide capabilities
    fn caps(&self) -> BackendResult<DeviceCaps>;

    /// Create a new voice sharing `source`'s sample memory but with its own
    /// cursor, rate, volume and 3-D state.
    fn duplicate_buffer(&self, source: &dyn SoundBuffer) -> BackendResult<Box<dyn SoundBuffer>>;
}

/// A double-buffered, circular playback voice.
pub trait SoundBuffer: Send + Sync {
    /// Identity used by the device to find the voice's memory
    fn voice_id(&self) -> VoiceId;

    fn caps(&self) -> BackendResult<BufferCaps>;

    fn format(&self) -> BackendResult<WaveFormat>;

    fn status(&self) -> BackendResult<BufferStatus>;

    /// Play cursor as a byte offset into the circular buffer
    fn current_position(&self) -> BackendResult<u32>;

    fn set_current_position(&self, position: u32) -> BackendResult<()>;

    fn play(&self, looping: bool) -> BackendResult<()>;

    fn stop(&self) -> BackendResult<()>;

    fn frequency(&self) -> BackendResult<u32>;

    fn set_frequency(&self, frequency: u32) -> BackendResult<()>;

    /// Attenuation in hundredths of a decibel, `VOLUME_MIN..=VOLUME_MAX`
    fn set_volume(&self, volume: i32) -> BackendResult<()>;

    /// Positional-control interface of this voice
    fn positional(&self) -> BackendResult<Box<dyn Positional3d>>;

    /// Position-notification interface of this voice
    fn notifier(&self) -> BackendResult<Box<dyn PositionNotify>>;
}

/// 3-D placement of a voice relative to the listener.
pub trait Positional3d: Send + Sync {
    fn set_all_parameters(&self, params: &Buffer3dParams) -> BackendResult<()>;
}

/// Registers events the backend signals when the play cursor crosses offsets.
pub trait PositionNotify: Send + Sync {
    /// Replace the whole registration set. Only legal while the voice is stopped.
    fn set_notification_positions(&self, positions: &[NotifyPosition]) -> BackendResult<()>;
}
