//! Audio subsystem backends
//!
//! - Windows: Core Audio (WASAPI endpoint and session APIs)
//! - Everywhere: an in-memory simulator for tests and dry runs

pub mod memory;
#[cfg(windows)]
pub mod wasapi;

pub use memory::*;
#[cfg(windows)]
pub use wasapi::WindowsAudioBackend;

use volware_core::domain::audio::{AudioBackend, Result};

/// Backend for the default output device of this platform.
///
/// Failure here leaves no way to control audio, so callers treat it as fatal.
pub fn default_backend() -> Result<Box<dyn AudioBackend>> {
    #[cfg(windows)]
    {
        Ok(Box::new(WindowsAudioBackend::new()?))
    }

    #[cfg(not(windows))]
    {
        Err(volware_core::domain::audio::AudioError::Unsupported(format!(
            "no audio session backend for {}; use --simulate",
            std::env::consts::OS
        )))
    }
}
