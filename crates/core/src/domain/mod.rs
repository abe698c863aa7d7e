//! Domain entities and business rules

pub mod audio;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod frame;
pub mod router;
pub mod session;
pub mod volume;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{AudioBackend, AudioError, AudioSession};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChannelMapping, ConfigError, ConfigManager, VolwareConfig};
pub use dispatch::{FrameDispatcher, LineConsumer};
pub use frame::{parse_frame, Frame};
pub use router::{ChannelCommand, ChannelRouter, RouterSettings, VolumeCommand};
pub use session::{ProcessNameCache, SessionResolver, UNKNOWN_PROCESS};
pub use volume::{Target, VolumeSink, MASTER};
