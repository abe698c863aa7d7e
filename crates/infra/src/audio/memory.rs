//! In-memory audio backend
//!
//! Simulates a default output endpoint with a set of per-process sessions.
//! Clones share state, so a test (or the `--simulate` run mode) can keep a
//! handle for inspection after the backend has been moved into a sink.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use volware_core::domain::audio::{AudioBackend, AudioError, AudioSession, Result};

/// Identifier of a simulated session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(usize);

/// Observable state of one simulated session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub pid: u32,
    pub volume: f32,
    pub muted: bool,
}

/// Observable state of the whole simulated endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSnapshot {
    pub master_volume: f32,
    pub master_muted: bool,
    pub sessions: Vec<SessionSnapshot>,
}

impl BackendSnapshot {
    pub fn session(&self, id: SessionId) -> Option<&SessionSnapshot> {
        self.sessions.iter().find(|s| s.id == id)
    }
}

#[derive(Debug)]
struct SessionState {
    id: SessionId,
    pid: u32,
    volume: f32,
    muted: bool,
    failing: bool,
}

#[derive(Debug)]
struct State {
    master_volume: f32,
    master_muted: bool,
    master_failing: bool,
    sessions: Vec<SessionState>,
    processes: HashMap<u32, PathBuf>,
    next_id: usize,
    process_lookups: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            master_volume: 1.0,
            master_muted: false,
            master_failing: false,
            sessions: Vec::new(),
            processes: HashMap::new(),
            next_id: 0,
            process_lookups: 0,
        }
    }
}

/// Simulated audio subsystem
#[derive(Debug, Clone, Default)]
pub struct InMemoryAudioBackend {
    state: Arc<Mutex<State>>,
}

impl InMemoryAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session for `pid`, registering the process image path
    pub fn add_session(&self, pid: u32, image_path: impl Into<PathBuf>) -> SessionId {
        let mut state = self.state();
        let id = SessionId(state.next_id);
        state.next_id += 1;
        state.processes.insert(pid, image_path.into());
        state.sessions.push(SessionState {
            id,
            pid,
            volume: 1.0,
            muted: false,
            failing: false,
        });
        id
    }

    /// Process exit: its sessions disappear and lookups start failing
    pub fn remove_process(&self, pid: u32) {
        let mut state = self.state();
        state.processes.remove(&pid);
        state.sessions.retain(|s| s.pid != pid);
    }

    /// Change the image path reported for a running process
    pub fn rename_process(&self, pid: u32, image_path: impl Into<PathBuf>) {
        self.state().processes.insert(pid, image_path.into());
    }

    /// Make every call on a session fail (or succeed again)
    pub fn set_session_failing(&self, id: SessionId, failing: bool) {
        if let Some(session) = self.state().sessions.iter_mut().find(|s| s.id == id) {
            session.failing = failing;
        }
    }

    /// Make every endpoint call fail (or succeed again)
    pub fn set_master_failing(&self, failing: bool) {
        self.state().master_failing = failing;
    }

    /// How many times a process image path was queried
    pub fn process_lookups(&self) -> usize {
        self.state().process_lookups
    }

    pub fn snapshot(&self) -> BackendSnapshot {
        let state = self.state();
        BackendSnapshot {
            master_volume: state.master_volume,
            master_muted: state.master_muted,
            sessions: state
                .sessions
                .iter()
                .map(|s| SessionSnapshot {
                    id: s.id,
                    pid: s.pid,
                    volume: s.volume,
                    muted: s.muted,
                })
                .collect(),
        }
    }

    fn with_master<T>(&self, f: impl FnOnce(&mut State) -> T) -> Result<T> {
        let mut state = self.state();
        if state.master_failing {
            return Err(AudioError::Endpoint("simulated endpoint failure".to_string()));
        }
        Ok(f(&mut state))
    }
}

/// Handle onto one simulated session
struct MemorySession {
    id: SessionId,
    pid: u32,
    state: Arc<Mutex<State>>,
}

impl MemorySession {
    fn with_session<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> Result<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == self.id)
            .ok_or_else(|| AudioError::Session {
                pid: self.pid,
                reason: "session expired".to_string(),
            })?;
        if session.failing {
            return Err(AudioError::Session {
                pid: self.pid,
                reason: "simulated session failure".to_string(),
            });
        }
        Ok(f(session))
    }
}

impl AudioSession for MemorySession {
    fn process_id(&self) -> Result<u32> {
        Ok(self.pid)
    }

    fn set_volume(&self, level: f32) -> Result<()> {
        self.with_session(|s| s.volume = level)?;
        debug!(pid = self.pid, level, "Simulated session volume set");
        Ok(())
    }

    fn volume(&self) -> Result<f32> {
        self.with_session(|s| s.volume)
    }

    fn set_mute(&self, muted: bool) -> Result<()> {
        self.with_session(|s| s.muted = muted)?;
        debug!(pid = self.pid, muted, "Simulated session mute set");
        Ok(())
    }

    fn is_muted(&self) -> Result<bool> {
        self.with_session(|s| s.muted)
    }
}

impl AudioBackend for InMemoryAudioBackend {
    fn sessions(&self) -> Result<Vec<Box<dyn AudioSession>>> {
        let state = self.state();
        Ok(state
            .sessions
            .iter()
            .map(|s| {
                Box::new(MemorySession {
                    id: s.id,
                    pid: s.pid,
                    state: Arc::clone(&self.state),
                }) as Box<dyn AudioSession>
            })
            .collect())
    }

    fn set_master_volume(&self, level: f32) -> Result<()> {
        self.with_master(|state| state.master_volume = level)?;
        debug!(level, "Simulated master volume set");
        Ok(())
    }

    fn master_volume(&self) -> Result<f32> {
        self.with_master(|state| state.master_volume)
    }

    fn set_master_mute(&self, muted: bool) -> Result<()> {
        self.with_master(|state| state.master_muted = muted)?;
        debug!(muted, "Simulated master mute set");
        Ok(())
    }

    fn is_master_muted(&self) -> Result<bool> {
        self.with_master(|state| state.master_muted)
    }

    fn process_image_path(&self, pid: u32) -> Result<PathBuf> {
        let mut state = self.state();
        state.process_lookups += 1;
        state
            .processes
            .get(&pid)
            .cloned()
            .ok_or_else(|| AudioError::ProcessLookup {
                pid,
                reason: "no such process".to_string(),
            })
    }
}
