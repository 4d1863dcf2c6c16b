//! Keeps a reflection voice trailing the source by its scheduled offset.
//!
//! Independently clocked voices drift. While a reflection plays, each call
//! compares the real cursor distance with the target and bangs the
//! reflection's rate between three states: slightly fast, nominal,
//! slightly slow.

use crate::scheduler::Timing;
use a3d_core::{BackendResult, BufferStatus, EngineConfig, SoundBuffer};
use tracing::trace;

/// Tolerance and correction strength of the lag tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LagTuning {
    /// Tolerance in 1/1024ths of a second of source playback
    pub precision: u32,
    /// Rate nudge in 1/128ths
    pub change_frequency: u32,
}

impl LagTuning {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            precision: config.delay_precision,
            change_frequency: config.change_frequency,
        }
    }

    /// Allowed deviation from the target lag, in bytes.
    pub fn max_delta(&self, timing: &Timing) -> u32 {
        (timing.bytes_per_second() * u64::from(self.precision) / 1024).min(u64::from(u32::MAX)) as u32
    }

    /// Rate for a reflection whose measured lag is `lag` bytes.
    pub fn corrected_frequency(&self, lag: u32, target: u32, timing: &Timing) -> u32 {
        let max_delta = self.max_delta(timing);
        let nominal = u64::from(timing.frequency);
        let change = u64::from(self.change_frequency);

        let frequency = if u64::from(lag) > u64::from(target) + u64::from(max_delta) {
            nominal * (128 + change) / 128
        } else if lag < target.saturating_sub(max_delta) {
            nominal * 128u64.saturating_sub(change) / 128
        } else {
            nominal
        };
        frequency as u32
    }
}

impl Default for LagTuning {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// What [`play_with_lag`] did to the reflection voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LagAction {
    /// The voice was stopped and has been started at `position`.
    Started { position: u32 },
    /// The voice was playing; its rate was set to `frequency`.
    Tracked { lag: u32, frequency: u32 },
}

/// Start `reflection` trailing `source` by `target` bytes, or correct its
/// rate if it already plays. `source_status` decides looping.
///
/// Backend failures abort immediately.
pub fn play_with_lag(
    source: &dyn SoundBuffer,
    reflection: &dyn SoundBuffer,
    target: u32,
    timing: &Timing,
    tuning: &LagTuning,
    source_status: BufferStatus,
) -> BackendResult<LagAction> {
    let source_cursor = source.current_position()?;
    let status = reflection.status()?;

    let action = if status.playing {
        let reflection_cursor = reflection.current_position()?;
        let lag = timing.circular_distance(source_cursor, reflection_cursor);
        let frequency = tuning.corrected_frequency(lag, target, timing);
        reflection.set_frequency(frequency)?;
        trace!(lag, target, frequency, "reflection rate corrected");
        LagAction::Tracked { lag, frequency }
    } else {
        reflection.set_frequency(timing.frequency)?;
        let position = timing.circular_distance(source_cursor, target);
        reflection.set_current_position(position)?;
        trace!(source_cursor, target, position, "reflection positioned");
        LagAction::Started { position }
    };

    if !status.playing || status.looping != source_status.looping {
        reflection.play(source_status.looping)?;
    }

    Ok(action)
}
