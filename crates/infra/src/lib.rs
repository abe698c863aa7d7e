//! VolWare infrastructure
//!
//! Platform adapters for the core domain: the serial link to the controller
//! and the audio subsystem backends.

pub mod audio;
pub mod serial;
