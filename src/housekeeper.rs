//! Background Maintenance Task
//!
//! One housekeeper thread per cache (when any periodic work is configured)
//! drives the expiration sweep, the write-buffer drain and pending refreshes.
//! The thread sleeps on a channel with a timeout:
//!
//! - a timeout is a tick: run one maintenance pass;
//! - a message (or a closed channel) is the shutdown signal.
//!
//! The maintenance closure holds only a weak reference to the cache
//! internals and reports whether its target is still alive, so a dropped
//! cache ends the thread at the next tick even if no explicit shutdown was
//! requested.

use std::fmt;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

/// Handle to a cache's maintenance thread.
pub(crate) struct Housekeeper {
    shutdown_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Housekeeper {
    /// Spawns a maintenance thread ticking every `tick`.
    ///
    /// `task` runs one maintenance pass and returns `false` when its target
    /// is gone, ending the thread.
    pub(crate) fn start(tick: Duration, mut task: Box<dyn FnMut() -> bool + Send>) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("polycache-maintenance".to_owned())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(tick) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !task() {
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .ok();
        if handle.is_none() {
            tracing::warn!("failed to spawn cache maintenance thread; relying on inline maintenance");
        }
        Housekeeper {
            shutdown_tx,
            handle,
        }
    }

    /// Signals the thread to stop and waits for it to exit.
    pub(crate) fn stop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Signals the thread to stop without waiting. Used from drop paths where
    /// joining could deadlock with a maintenance pass in progress.
    pub(crate) fn signal_stop(&self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

impl Drop for Housekeeper {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

impl fmt::Debug for Housekeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Housekeeper")
            .field("running", &self.handle.is_some())
            .finish()
    }
}
