use thiserror::Error;

/// Failure reported by an audio backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend call `{op}` failed with code {code:#010x}")]
    Failed { op: &'static str, code: u32 },

    #[error("backend does not support `{0}`")]
    Unsupported(&'static str),

    #[error("voice memory was lost")]
    BufferLost,

    #[error("invalid parameter: {0}")]
    InvalidParam(String),
}

impl BackendError {
    /// Generic failure code used when a backend has nothing more specific.
    pub const E_FAIL: u32 = 0x8000_4005;

    pub fn failed(op: &'static str) -> Self {
        BackendError::Failed {
            op,
            code: Self::E_FAIL,
        }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;
