//! Notification plumbing between a backend and the reflection engine.
//!
//! A backend never sees engine internals: it is handed [`NotifyEvent`]s
//! bound to byte offsets and calls [`NotifyEvent::signal`] when playback
//! crosses one. Each event posts its [`WakeToken`] to the engine's channel.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

/// What a fired notification means to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WakeToken {
    /// The source voice stopped (reached its end or was stopped).
    SourceStopped,
    /// The source crossed the start offset of an armed reflection.
    Reflection { slot: usize, generation: u64 },
}

/// Event handle the backend signals.
#[derive(Clone, Debug)]
pub struct NotifyEvent {
    token: WakeToken,
    tx: Sender<WakeToken>,
}

impl NotifyEvent {
    pub fn new(token: WakeToken, tx: Sender<WakeToken>) -> Self {
        Self { token, tx }
    }

    pub fn token(&self) -> WakeToken {
        self.token
    }

    /// Post the token. A closed receiver means the engine is gone; nothing to do.
    pub fn signal(&self) {
        if self.tx.send(self.token).is_err() {
            tracing::trace!(token = ?self.token, "notification receiver closed");
        }
    }
}

/// Where in the buffer a notification fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyOffset {
    /// When the voice stops.
    Stop,
    /// When the play cursor crosses this byte offset.
    At(u32),
}

#[derive(Clone, Debug)]
pub struct NotifyPosition {
    pub offset: NotifyOffset,
    pub event: NotifyEvent,
}

impl NotifyPosition {
    pub fn new(offset: NotifyOffset, event: NotifyEvent) -> Self {
        Self { offset, event }
    }
}
