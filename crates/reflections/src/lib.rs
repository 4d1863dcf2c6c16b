//! Early-reflection synthesis on hardware 3-D audio voices.
//!
//! A [`ReflectionEngine`] owns up to eight duplicates of a source voice and
//! keeps each one playing a fixed delay behind the source. [`DalVoice`] is
//! the per-voice wrapper that feeds it control packets.

pub mod backends;
pub mod engine;
pub mod error;
pub mod gain;
pub mod lag;
pub mod projector;
pub mod scheduler;
pub mod service;
pub mod slots;
pub mod voice;

pub use engine::ReflectionEngine;
pub use error::{ReflectionError, Result};
pub use lag::{LagAction, LagTuning};
pub use scheduler::{OffsetPass, Timing};
pub use service::ServiceState;
pub use slots::SlotSnapshot;
pub use voice::DalVoice;
