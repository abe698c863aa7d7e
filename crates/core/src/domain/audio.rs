//! Audio subsystem capability
//!
//! This module defines the platform-agnostic interface the volume layer
//! drives. Implementations for specific platforms (Windows Core Audio, the
//! in-memory simulator) live in the `infra` crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// The audio subsystem could not be brought up at all
    #[error("Audio subsystem initialization failed: {0}")]
    Initialization(String),

    /// A call against the default output endpoint failed
    #[error("Endpoint error: {0}")]
    Endpoint(String),

    /// A call against a single audio session failed
    #[error("Session error (pid {pid}): {reason}")]
    Session { pid: u32, reason: String },

    /// Session enumeration on the default endpoint failed
    #[error("Session enumeration failed: {0}")]
    Enumeration(String),

    /// The owning process of a session could not be inspected
    #[error("Process lookup failed for pid {pid}: {reason}")]
    ProcessLookup { pid: u32, reason: String },

    /// No backend exists for the current platform
    #[error("Unsupported platform: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// One process's audio stream on the default render endpoint.
///
/// Handles are owned values; whatever OS resource backs them is released
/// when the handle is dropped.
pub trait AudioSession: Send {
    /// Process id owning this session
    fn process_id(&self) -> Result<u32>;

    /// Set the session volume as a scalar in `[0, 1]`
    fn set_volume(&self, level: f32) -> Result<()>;

    /// Current session volume scalar
    fn volume(&self) -> Result<f32>;

    /// Set the session mute state
    fn set_mute(&self, muted: bool) -> Result<()>;

    /// Current session mute state
    fn is_muted(&self) -> Result<bool>;
}

/// Trait for platform-specific audio subsystem access
///
/// Calls are synchronous and run to completion. The volume layer serializes
/// every call behind its own lock, so implementations need not be `Sync`.
pub trait AudioBackend: Send {
    /// Enumerate the active sessions on the default render endpoint
    fn sessions(&self) -> Result<Vec<Box<dyn AudioSession>>>;

    /// Set the endpoint (master) volume scalar
    fn set_master_volume(&self, level: f32) -> Result<()>;

    /// Current endpoint volume scalar
    fn master_volume(&self) -> Result<f32>;

    /// Set the endpoint mute state
    fn set_master_mute(&self, muted: bool) -> Result<()>;

    /// Current endpoint mute state
    fn is_master_muted(&self) -> Result<bool>;

    /// Full path of the executable image running as `pid`
    fn process_image_path(&self, pid: u32) -> Result<PathBuf>;
}

impl<B: AudioBackend + ?Sized> AudioBackend for Box<B> {
    fn sessions(&self) -> Result<Vec<Box<dyn AudioSession>>> {
        (**self).sessions()
    }

    fn set_master_volume(&self, level: f32) -> Result<()> {
        (**self).set_master_volume(level)
    }

    fn master_volume(&self) -> Result<f32> {
        (**self).master_volume()
    }

    fn set_master_mute(&self, muted: bool) -> Result<()> {
        (**self).set_master_mute(muted)
    }

    fn is_master_muted(&self) -> Result<bool> {
        (**self).is_master_muted()
    }

    fn process_image_path(&self, pid: u32) -> Result<PathBuf> {
        (**self).process_image_path(pid)
    }
}
