//! Background polling of the session.
//!
//! A dedicated thread calls [`BridgeState::poll_once`] about every 16ms so
//! the command window stays full, recorded audio reaches disk, and device
//! faults are noticed even when the host makes no calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use loopdeck_core::EngineBridge;

use crate::state::BridgeState;

pub const POLL_INTERVAL: Duration = Duration::from_millis(16);

pub struct PollLoop {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PollLoop {
    pub fn spawn<E>(state: &'static BridgeState<E>) -> std::io::Result<Self>
    where
        E: EngineBridge + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("loopdeck-poll".into())
            .spawn(move || {
                log::debug!("poll loop started");
                while flag.load(Ordering::Relaxed) {
                    state.poll_once();
                    thread::sleep(POLL_INTERVAL);
                }
                log::debug!("poll loop stopped");
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to finish its current tick.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("poll thread panicked");
            }
        }
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
