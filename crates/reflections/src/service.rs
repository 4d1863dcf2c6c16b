//! Background thread that starts armed reflections on time.
//!
//! The thread blocks, outside the engine lock, on two channels: wake tokens
//! posted by backend notifications and control messages from the engine.
//! `Shutdown` ends the loop. A `SourceStopped` token means the source really
//! stopped.
//!
//! Newly armed reflections need no re-registration with the thread: their
//! tokens arrive on the same wake channel. `Rescan` therefore carries no
//! work; the engine sends it to learn whether the thread is still listening
//! before deciding to spawn a new one.

use crate::engine::Shared;
use a3d_core::WakeToken;
use crossbeam_channel::{select, Receiver, Sender};
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const THREAD_NAME: &str = "a3d-reflections";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    /// Liveness check after the engine armed more reflections
    Rescan,
    /// Stop every reflection and exit
    Shutdown,
}

/// Lifecycle of the service thread as seen by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    /// No thread was ever needed
    Idle,
    /// Thread alive, waiting for notifications
    Running,
    /// Thread exited
    Stopped,
}

/// Why the loop exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Exit {
    Shutdown,
    SourceStopped,
    Failed,
}

enum Wake {
    Control(Option<Control>),
    Token(Option<WakeToken>),
}

/// Owner's handle on a running service thread.
pub(crate) struct ServiceHandle {
    thread: JoinHandle<()>,
    control: Sender<Control>,
    done: Receiver<()>,
}

impl ServiceHandle {
    pub fn spawn(shared: Arc<Shared>, wakes: Receiver<WakeToken>) -> std::io::Result<Self> {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                run(&shared, &wakes, &control_rx);
                let _ = done_tx.send(());
            })?;

        debug!("reflection service thread started");
        Ok(Self {
            thread,
            control: control_tx,
            done: done_rx,
        })
    }

    pub fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Ask a live thread to pick up newly armed reflections.
    pub fn rescan(&self) -> bool {
        self.control.send(Control::Rescan).is_ok()
    }

    /// Signal shutdown and wait up to `timeout` for the thread to exit.
    ///
    /// Returns false if the thread had to be abandoned.
    pub fn shutdown(self, timeout: Duration) -> bool {
        let _ = self.control.send(Control::Shutdown);

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    error!("reflection service thread panicked");
                }
                true
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                // A std thread cannot be killed. Detach it; the shared state it
                // holds stays alive until it exits.
                error!(
                    "reflection service thread did not exit within {:?}, detaching it",
                    timeout
                );
                false
            }
        }
    }

    /// Join a thread that already exited.
    pub fn reap(self) {
        if self.thread.join().is_err() {
            error!("reflection service thread panicked");
        }
    }
}

fn run(shared: &Shared, wakes: &Receiver<WakeToken>, control: &Receiver<Control>) {
    let exit = loop {
        let wake = select! {
            recv(control) -> msg => Wake::Control(msg.ok()),
            recv(wakes) -> msg => Wake::Token(msg.ok()),
        };

        match wake {
            Wake::Control(Some(Control::Rescan)) => {
                trace!("rescan requested, thread still listening");
                continue;
            }
            Wake::Control(Some(Control::Shutdown)) | Wake::Control(None) => break Exit::Shutdown,
            Wake::Token(None) => {
                warn!("notification channel closed");
                break Exit::Failed;
            }
            Wake::Token(Some(WakeToken::SourceStopped)) => break Exit::SourceStopped,
            Wake::Token(Some(WakeToken::Reflection { slot, generation })) => {
                if let Err(exit) = start_reflection(shared, slot, generation) {
                    break exit;
                }
            }
        }
    };

    let mut state = shared.state.lock();
    let active = state.slots.active_count();
    state.slots.stop_all();
    info!(?exit, stopped = active, "reflection service exiting");
}

fn start_reflection(shared: &Shared, slot: usize, generation: u64) -> Result<(), Exit> {
    let mut state = shared.state.lock();

    if !state.slots.is_armed_with(slot, generation) {
        trace!(slot, generation, "stale reflection notification");
        return Ok(());
    }

    // The slot is started (or abandoned) now, it no longer waits
    state.slots.disarm(slot);

    if !state.slots.get(slot).is_active() {
        return Ok(());
    }

    let status = match shared.source.status() {
        Ok(status) => status,
        Err(e) => {
            warn!(slot, "failed to query source status: {}", e);
            return Err(Exit::Failed);
        }
    };
    if !status.playing {
        return Err(Exit::SourceStopped);
    }

    match shared.play_with_lag(&state, slot, status) {
        Ok(action) => {
            debug!(slot, ?action, "delayed reflection started");
            Ok(())
        }
        Err(e) => {
            warn!(slot, "failed to start delayed reflection: {}", e);
            Err(Exit::Failed)
        }
    }
}
