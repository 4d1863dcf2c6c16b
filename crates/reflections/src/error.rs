use a3d_core::{BackendError, BufferFlags};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReflectionError {
    #[error("device lacks hardware 3D voices or continuous-rate playback")]
    DeviceUnsupported,

    #[error("source voice lacks reflection support: {0:?}")]
    SourceUnsupported(BufferFlags),

    #[error("unsupported source format: {0} bits per sample")]
    InvalidFormat(u16),

    #[error("reflections disabled by configuration")]
    Disabled,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to spawn reflection service thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReflectionError>;
