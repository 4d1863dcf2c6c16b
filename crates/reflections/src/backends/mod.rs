//! Backend implementations of the `a3d-core` device traits.

pub mod sim;

pub use sim::{SimBuffer, SimDevice, SimOp, SimStats, VoiceSnapshot};
