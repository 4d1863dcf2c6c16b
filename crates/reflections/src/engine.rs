use crate::error::{ReflectionError, Result};
use crate::gain;
use crate::lag::{self, LagAction, LagTuning};
use crate::projector;
use crate::scheduler::{OffsetPass, Timing};
use crate::service::{ServiceHandle, ServiceState};
use crate::slots::{SlotSnapshot, SlotTable};
use a3d_core::{
    BackendError, BackendResult, BufferStatus, EngineConfig, NotifyEvent, NotifyOffset,
    NotifyPosition, PositionNotify, ReflectionParams, SoundBuffer, SoundDevice, WakeToken,
    MAX_SOURCE_REFLECTIONS,
};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Everything guarded by the engine lock.
pub(crate) struct EngineState {
    pub(crate) slots: SlotTable,
    pub(crate) timing: Timing,
}

/// State shared between the engine and its service thread.
pub(crate) struct Shared {
    pub(crate) state: Mutex<EngineState>,
    pub(crate) device: Arc<dyn SoundDevice>,
    pub(crate) source: Arc<dyn SoundBuffer>,
    pub(crate) tuning: LagTuning,
}

impl Shared {
    pub(crate) fn play_with_lag(
        &self,
        state: &EngineState,
        slot: usize,
        source_status: BufferStatus,
    ) -> BackendResult<LagAction> {
        let entry = state.slots.get(slot);
        let reflection = entry
            .buffer()
            .ok_or_else(|| BackendError::InvalidParam(format!("reflection slot {slot} is empty")))?;
        lag::play_with_lag(
            self.source.as_ref(),
            reflection,
            entry.offset(),
            &state.timing,
            &self.tuning,
            source_status,
        )
    }
}

/// Early-reflection synthesizer bound to one source voice.
///
/// Each reflection is a duplicate of the source voice, placed in 3-D space,
/// attenuated and started a fixed byte distance behind the source cursor.
/// Reflections that cannot start yet (the source is stopped) are armed on a
/// backend notification and started by a background service thread.
///
/// The engine borrows the device and source; it must be dropped before the
/// owner gives them up. Dropping it shuts the service thread down and
/// releases every reflection voice.
pub struct ReflectionEngine {
    shared: Arc<Shared>,
    notifier: Box<dyn PositionNotify>,
    stop_event: NotifyEvent,
    wake_tx: Sender<WakeToken>,
    wake_rx: Receiver<WakeToken>,
    service: Mutex<Option<ServiceHandle>>,
    teardown_timeout: Duration,
}

impl ReflectionEngine {
    /// Validate `device` and `source` and register the source-stop notification.
    ///
    /// Any error means reflections are unavailable for this voice; the
    /// voice itself is unaffected.
    pub fn initialize(
        device: Arc<dyn SoundDevice>,
        source: Arc<dyn SoundBuffer>,
        config: &EngineConfig,
    ) -> Result<Self> {
        if !config.enabled {
            return Err(ReflectionError::Disabled);
        }

        let device_caps = device.caps()?;
        if !device_caps.supports_reflections() {
            debug!(?device_caps, "device cannot host reflections");
            return Err(ReflectionError::DeviceUnsupported);
        }

        let caps = source.caps()?;
        if !caps.flags.supports_reflections() {
            debug!(flags = ?caps.flags, "source voice cannot host reflections");
            return Err(ReflectionError::SourceUnsupported(caps.flags));
        }

        let format = source.format()?;
        let bytes_per_sample = format.bytes_per_sample();
        if bytes_per_sample == 0 {
            return Err(ReflectionError::InvalidFormat(format.bits_per_sample));
        }

        let notifier = source.notifier()?;
        let (wake_tx, wake_rx) = crossbeam_channel::unbounded();
        let stop_event = NotifyEvent::new(WakeToken::SourceStopped, wake_tx.clone());
        notifier.set_notification_positions(&[NotifyPosition::new(
            NotifyOffset::Stop,
            stop_event.clone(),
        )])?;

        let timing = Timing::new(caps.buffer_bytes, bytes_per_sample, format.samples_per_sec);
        info!(
            source = %source.voice_id(),
            buffer_size = timing.buffer_size,
            bytes_per_sample,
            "reflections initialized"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState {
                    slots: SlotTable::new(),
                    timing,
                }),
                device,
                source,
                tuning: LagTuning::from_config(config),
            }),
            notifier,
            stop_event,
            wake_tx,
            wake_rx,
            service: Mutex::new(None),
            teardown_timeout: config.teardown_timeout(),
        })
    }

    /// Bring the reflection voices in line with `reflections`.
    ///
    /// Entries beyond the slot capacity are ignored; missing entries count
    /// as disabled. Any backend failure stops every reflection.
    pub fn apply_control_packet(
        &self,
        reflections: &[ReflectionParams],
        source_frequency: u32,
    ) -> Result<()> {
        let source_status = self.shared.source.status()?;
        let format = self.shared.source.format()?;
        let bytes_per_sample = format.bytes_per_sample();
        if bytes_per_sample == 0 {
            return Err(ReflectionError::InvalidFormat(format.bits_per_sample));
        }
        if reflections.len() > MAX_SOURCE_REFLECTIONS {
            trace!(
                ignored = reflections.len() - MAX_SOURCE_REFLECTIONS,
                "reflection entries beyond capacity"
            );
        }

        let mut state = self.shared.state.lock();
        state.timing.frequency = source_frequency;
        state.timing.bytes_per_sample = bytes_per_sample;

        let result = self.apply_locked(&mut state, reflections, source_status);
        if let Err(e) = &result {
            warn!("reflection update failed, stopping all reflections: {}", e);
            state.slots.stop_all();
        }
        result
    }

    fn apply_locked(
        &self,
        state: &mut EngineState,
        reflections: &[ReflectionParams],
        source_status: BufferStatus,
    ) -> Result<()> {
        let mut pass = OffsetPass::new(state.timing);

        for index in 0..MAX_SOURCE_REFLECTIONS {
            let params = match reflections.get(index) {
                Some(params) if params.is_audible() => params,
                _ => {
                    if state.slots.get(index).is_active() {
                        state.slots.reset(index);
                    }
                    continue;
                }
            };

            if !state.slots.get(index).is_active() {
                state
                    .slots
                    .create(index, self.shared.device.as_ref(), self.shared.source.as_ref())?;
            }

            state
                .slots
                .set_parameters(index, &projector::reflection_params(params))?;
            state
                .slots
                .set_volume(index, gain::volume_for(params.average_gain(), params.alpha))?;

            let offset = pass.assign(index, params.average_delay());
            state.slots.set_offset(index, offset);
            trace!(slot = index, offset, "reflection offset assigned");

            if state.slots.get(index).is_armed() {
                continue;
            }
            if source_status.playing {
                let action = self.shared.play_with_lag(state, index, source_status)?;
                trace!(slot = index, ?action, "reflection played immediately");
            } else {
                state.slots.arm(index, &self.wake_tx);
            }
        }

        if !source_status.playing {
            self.schedule_play(state)?;
        }
        Ok(())
    }

    /// Register notifications for every armed slot and make sure a service
    /// thread is waiting on them.
    fn schedule_play(&self, state: &EngineState) -> Result<()> {
        let positions = state.slots.notify_positions(&self.stop_event);
        self.notifier.set_notification_positions(&positions)?;

        let armed = positions.len() - 1;
        if armed == 0 {
            return Ok(());
        }

        let mut service = self.service.lock();
        if let Some(handle) = service.as_ref() {
            if handle.is_alive() && handle.rescan() {
                trace!(armed, "service thread rescanning");
                return Ok(());
            }
        }
        // Either never started or already past its loop, joining cannot block
        if let Some(finished) = service.take() {
            finished.reap();
        }

        // Tokens queued while no thread listened describe the past
        let stale = self.wake_rx.try_iter().count();
        if stale > 0 {
            debug!(stale, "discarded stale notifications");
        }

        *service = Some(ServiceHandle::spawn(self.shared.clone(), self.wake_rx.clone())?);
        debug!(armed, "reflections scheduled");
        Ok(())
    }

    /// Correct drift of running reflections without touching offsets.
    pub fn track_delay(&self) -> Result<()> {
        let source_status = self.shared.source.status()?;
        if !source_status.playing {
            return Ok(());
        }

        let mut state = self.shared.state.lock();
        let running: Vec<usize> = state.slots.running().collect();
        for index in running {
            if let Err(e) = self.shared.play_with_lag(&state, index, source_status) {
                warn!(slot = index, "delay tracking failed, stopping all reflections: {}", e);
                state.slots.stop_all();
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Number of slots holding a reflection voice.
    pub fn ready_count(&self) -> usize {
        self.shared.state.lock().slots.active_count()
    }

    /// Number of reflections waiting for the source to reach their offset.
    pub fn armed_count(&self) -> usize {
        self.shared.state.lock().slots.armed_count()
    }

    /// Release every reflection voice. The service thread keeps running.
    pub fn stop(&self) {
        self.shared.state.lock().slots.stop_all();
    }

    pub fn service_state(&self) -> ServiceState {
        match self.service.lock().as_ref() {
            None => ServiceState::Idle,
            Some(handle) if handle.is_alive() => ServiceState::Running,
            Some(_) => ServiceState::Stopped,
        }
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.shared.state.lock().slots.snapshot()
    }

    /// Current offset geometry (buffer size, sample width, source rate).
    pub fn timing(&self) -> Timing {
        self.shared.state.lock().timing
    }
}

impl Drop for ReflectionEngine {
    fn drop(&mut self) {
        if let Some(service) = self.service.get_mut().take() {
            service.shutdown(self.teardown_timeout);
        }
        self.shared.state.lock().slots.stop_all();

        // Registrations can only change while the source is stopped
        match self.shared.source.status() {
            Ok(status) if !status.playing => {
                if let Err(e) = self.notifier.set_notification_positions(&[]) {
                    debug!("failed to clear source notifications: {}", e);
                }
            }
            Ok(_) => trace!("source playing, notifications left registered"),
            Err(e) => debug!("failed to query source status on teardown: {}", e),
        }
        debug!(source = %self.shared.source.voice_id(), "reflections torn down");
    }
}
