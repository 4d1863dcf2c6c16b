use a3d_core::{
    BackendResult, Buffer3dParams, NotifyEvent, NotifyOffset, NotifyPosition, Positional3d,
    SoundBuffer, SoundDevice, WakeToken, MAX_SOURCE_REFLECTIONS,
};
use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{debug, warn};

/// Backend resources of a live reflection. Both halves exist or neither.
struct ReflectionVoice {
    buffer: Box<dyn SoundBuffer>,
    positional: Box<dyn Positional3d>,
}

/// State of one reflection slot.
#[derive(Default)]
pub struct ReflectionSlot {
    voice: Option<ReflectionVoice>,
    /// Distance in bytes the reflection trails the source cursor
    offset: u32,
    /// Present while the reflection waits for the source to reach `offset`
    notify: Option<NotifyEvent>,
    generation: u64,
}

impl ReflectionSlot {
    pub fn is_active(&self) -> bool {
        self.voice.is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.notify.is_some()
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn buffer(&self) -> Option<&dyn SoundBuffer> {
        self.voice.as_ref().map(|voice| voice.buffer.as_ref())
    }
}

/// Point-in-time view of a slot for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SlotSnapshot {
    pub index: usize,
    pub active: bool,
    pub armed: bool,
    pub offset: u32,
}

/// Fixed-capacity table of reflection slots.
pub struct SlotTable {
    slots: [ReflectionSlot; MAX_SOURCE_REFLECTIONS],
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| ReflectionSlot::default()),
        }
    }

    pub fn get(&self, index: usize) -> &ReflectionSlot {
        &self.slots[index]
    }

    /// Duplicate `source` into slot `index` and acquire its positional control.
    pub fn create(
        &mut self,
        index: usize,
        device: &dyn SoundDevice,
        source: &dyn SoundBuffer,
    ) -> BackendResult<()> {
        let slot = &mut self.slots[index];
        debug_assert!(!slot.is_active(), "slot {index} already active");

        let buffer = device.duplicate_buffer(source)?;
        // Dropping `buffer` on error releases the duplicate
        let positional = buffer.positional()?;

        debug!(slot = index, voice = %buffer.voice_id(), "reflection voice created");
        slot.voice = Some(ReflectionVoice { buffer, positional });
        Ok(())
    }

    /// Release slot `index`'s voice and notification.
    pub fn reset(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        if let Some(voice) = slot.voice.take() {
            let ReflectionVoice { buffer, positional } = voice;
            drop(positional);
            if let Err(e) = buffer.stop() {
                warn!(slot = index, "failed to stop reflection voice: {}", e);
            }
            debug!(slot = index, voice = %buffer.voice_id(), "reflection voice released");
        }
        slot.notify = None;
    }

    /// Reset every active slot.
    pub fn stop_all(&mut self) {
        for index in 0..MAX_SOURCE_REFLECTIONS {
            if self.slots[index].is_active() {
                self.reset(index);
            }
        }
    }

    pub fn set_parameters(&self, index: usize, params: &Buffer3dParams) -> BackendResult<()> {
        match &self.slots[index].voice {
            Some(voice) => voice.positional.set_all_parameters(params),
            None => Ok(()),
        }
    }

    pub fn set_volume(&self, index: usize, volume: i32) -> BackendResult<()> {
        match &self.slots[index].voice {
            Some(voice) => voice.buffer.set_volume(volume),
            None => Ok(()),
        }
    }

    pub fn set_offset(&mut self, index: usize, offset: u32) {
        self.slots[index].offset = offset;
    }

    /// Arm slot `index` to start when the source crosses its offset.
    pub fn arm(&mut self, index: usize, tx: &Sender<WakeToken>) {
        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        let token = WakeToken::Reflection {
            slot: index,
            generation: slot.generation,
        };
        slot.notify = Some(NotifyEvent::new(token, tx.clone()));
    }

    pub fn disarm(&mut self, index: usize) {
        self.slots[index].notify = None;
    }

    /// Whether `token` still names a currently armed slot.
    pub fn is_armed_with(&self, index: usize, generation: u64) -> bool {
        self.slots
            .get(index)
            .and_then(|slot| slot.notify.as_ref())
            .is_some_and(|event| {
                event.token()
                    == WakeToken::Reflection {
                        slot: index,
                        generation,
                    }
            })
    }

    /// The stop position followed by one position per armed slot.
    pub fn notify_positions(&self, stop: &NotifyEvent) -> Vec<NotifyPosition> {
        let mut positions = vec![NotifyPosition::new(NotifyOffset::Stop, stop.clone())];
        positions.extend(self.slots.iter().filter_map(|slot| {
            slot.notify
                .as_ref()
                .map(|event| NotifyPosition::new(NotifyOffset::At(slot.offset), event.clone()))
        }));
        positions
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_active()).count()
    }

    pub fn armed_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_armed()).count()
    }

    /// Indices of active slots not waiting on a notification.
    pub fn running(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_active() && !slot.is_armed())
            .map(|(index, _)| index)
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| SlotSnapshot {
                index,
                active: slot.is_active(),
                armed: slot.is_armed(),
                offset: slot.offset,
            })
            .collect()
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}
