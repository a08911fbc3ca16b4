//! Process-wide workstation state.
//!
//! The host sees a single workstation. It is created on the first engine
//! start and lives until the process exits; starting and stopping the
//! engine are idempotent.

use std::sync::{Mutex, MutexGuard};

use loopdeck_core::{
    AudioEngine, CpalDevice, EngineBridge, Session, WorkstationConfig, WorkstationResult,
};

use crate::poll::PollLoop;
use crate::status::{BridgeError, BridgeResult, StatusCode};

pub type Workstation = Session<AudioEngine<CpalDevice>>;

pub static STATE: BridgeState<AudioEngine<CpalDevice>> = BridgeState::new();

pub(crate) fn create_workstation() -> WorkstationResult<Workstation> {
    let config = WorkstationConfig::load();
    let engine = AudioEngine::new(CpalDevice::new(), config.engine_config());
    Session::new(engine, &config)
}

struct LastError {
    status: StatusCode,
    message: String,
}

pub struct BridgeState<E: EngineBridge> {
    session: Mutex<Option<Session<E>>>,
    poll: Mutex<Option<PollLoop>>,
    last_error: Mutex<LastError>,
}

impl<E: EngineBridge> BridgeState<E> {
    pub const fn new() -> Self {
        Self {
            session: Mutex::new(None),
            poll: Mutex::new(None),
            last_error: Mutex::new(LastError {
                status: StatusCode::Ok,
                message: String::new(),
            }),
        }
    }

    fn lock_session(&self) -> BridgeResult<MutexGuard<'_, Option<Session<E>>>> {
        self.session.lock().map_err(|_| BridgeError::Poisoned)
    }

    /// Run `f` against the session. Fails with `NotStarted` before the first
    /// engine start.
    pub fn with_session<T>(
        &self,
        f: impl FnOnce(&mut Session<E>) -> WorkstationResult<T>,
    ) -> BridgeResult<T> {
        let mut guard = self.lock_session()?;
        let session = guard.as_mut().ok_or(BridgeError::NotStarted)?;
        Ok(f(session)?)
    }

    /// Remember `err` for `loopdeck_last_error` and return its status.
    pub fn fail(&self, err: BridgeError) -> StatusCode {
        let status = StatusCode::from(&err);
        log::warn!("bridge call failed ({status:?}): {err}");
        if let Ok(mut last) = self.last_error.lock() {
            last.status = status;
            last.message = err.to_string();
        }
        status
    }

    pub fn last_error(&self) -> (StatusCode, String) {
        match self.last_error.lock() {
            Ok(last) => (last.status, last.message.clone()),
            Err(_) => (StatusCode::Internal, BridgeError::Poisoned.to_string()),
        }
    }

    /// One tick of the background loop. Skips the tick if a host call holds
    /// the session. Returns whether a session was polled.
    pub fn poll_once(&self) -> bool {
        let Ok(mut guard) = self.session.try_lock() else {
            return false;
        };
        let Some(session) = guard.as_mut() else {
            return false;
        };
        let result = session.poll();
        drop(guard);

        if let Err(err) = result {
            self.fail(err.into());
        }
        true
    }
}

impl<E: EngineBridge> Default for BridgeState<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EngineBridge + 'static> BridgeState<E> {
    /// Create the session on first use, start its engine, and make sure the
    /// poll loop is running.
    pub fn start(
        &'static self,
        create: impl FnOnce() -> WorkstationResult<Session<E>>,
    ) -> BridgeResult<()> {
        {
            let mut guard = self.lock_session()?;
            if guard.is_none() {
                *guard = Some(create()?);
            }
            if let Some(session) = guard.as_mut() {
                session.start_engine()?;
            }
        }

        let mut poll = self.poll.lock().map_err(|_| BridgeError::Poisoned)?;
        if poll.is_none() {
            *poll = Some(PollLoop::spawn(self).map_err(BridgeError::Thread)?);
        }
        Ok(())
    }

    /// Stop polling and release the audio device. The session and its
    /// tracks are kept for the next start.
    pub fn stop(&self) -> BridgeResult<()> {
        let poll = self
            .poll
            .lock()
            .map_err(|_| BridgeError::Poisoned)?
            .take();
        if let Some(poll) = poll {
            poll.stop();
        }

        let mut guard = self.lock_session()?;
        if let Some(session) = guard.as_mut() {
            session.stop_engine()?;
        }
        Ok(())
    }

    pub fn is_polling(&self) -> bool {
        self.poll.lock().is_ok_and(|poll| poll.is_some())
    }
}
