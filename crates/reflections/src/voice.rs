use crate::engine::ReflectionEngine;
use crate::error::Result;
use crate::gain;
use crate::projector;
use a3d_core::{
    Buffer3dParams, ControlPacket, EngineConfig, Positional3d, SoundBuffer, SoundDevice,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// A source voice driven by control packets, with optional reflections.
///
/// Applies each packet's direction, gain and pitch to the source voice and
/// forwards the reflection entries to its [`ReflectionEngine`]. A packet
/// identical to the previous one only re-tracks reflection drift.
pub struct DalVoice {
    // Declared first so it is torn down before the source handle is released
    engine: Option<ReflectionEngine>,
    source: Arc<dyn SoundBuffer>,
    positional: Option<Box<dyn Positional3d>>,
    last_packet: Option<ControlPacket>,
    base_sample_rate: u32,
}

impl DalVoice {
    pub fn new(
        device: Arc<dyn SoundDevice>,
        source: Arc<dyn SoundBuffer>,
        config: &EngineConfig,
    ) -> Self {
        let engine = match ReflectionEngine::initialize(device, source.clone(), config) {
            Ok(engine) => Some(engine),
            Err(e) => {
                debug!(source = %source.voice_id(), "reflections unavailable: {}", e);
                None
            }
        };

        Self {
            engine,
            source,
            positional: None,
            last_packet: None,
            base_sample_rate: config.base_sample_rate,
        }
    }

    /// Apply a control packet to the source voice and its reflections.
    pub fn set_control(&mut self, packet: &ControlPacket) -> Result<()> {
        if self.last_packet.as_ref() == Some(packet) {
            if let Some(engine) = &self.engine {
                if let Err(e) = engine.track_delay() {
                    self.last_packet = None;
                    return Err(e);
                }
            }
            return Ok(());
        }

        if self.positional.is_none() {
            self.positional = Some(self.source.positional()?);
        }
        let (azimuth, elevation) = packet.average_direction();
        let params = Buffer3dParams::head_relative(projector::project_direction(azimuth, elevation));
        if let Some(positional) = &self.positional {
            positional.set_all_parameters(&params)?;
        }

        let volume = gain::volume_for(packet.average_gain(), packet.alpha);
        self.source.set_volume(volume)?;

        let frequency = (self.base_sample_rate as f32 * packet.freq_factor) as u32;
        self.source.set_frequency(frequency)?;
        trace!(volume, frequency, "source voice updated");

        if let Some(engine) = &self.engine {
            engine.apply_control_packet(&packet.reflections, frequency)?;
        }

        self.last_packet = Some(packet.clone());
        Ok(())
    }

    /// Number of live reflection voices.
    pub fn reflections_ready(&self) -> usize {
        self.engine.as_ref().map_or(0, ReflectionEngine::ready_count)
    }

    pub fn has_reflections(&self) -> bool {
        self.engine.is_some()
    }

    pub fn engine(&self) -> Option<&ReflectionEngine> {
        self.engine.as_ref()
    }

    pub fn source(&self) -> &Arc<dyn SoundBuffer> {
        &self.source
    }
}
