//! Channel routing: frame values to per-channel volume and mute commands
//!
//! Frame layout for `N` configured channels:
//!
//! ```text
//! [ slider 0 .. slider N-1 | mute_offset ignored values | mute 0 .. mute N-1 ]
//! ```
//!
//! The mute block is only read when mute buttons are enabled. With the
//! default `mute_offset` of 0 it follows the slider block directly.

use crate::domain::config::ChannelMapping;
use crate::domain::volume::{clamp_level, Target};
use tracing::trace;

/// Raw slider reading that maps to full volume
pub const FULL_SCALE: f32 = 1024.0;

/// Frame interpretation switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterSettings {
    /// Reverse slider direction (`level = 1 - level`)
    pub invert: bool,
    /// Read a mute flag per channel after the slider block
    pub mute_buttons: bool,
    /// Values between the slider block and the mute block
    pub mute_offset: usize,
}

/// A single volume (and optional mute) instruction for one target
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeCommand {
    pub target: Target,
    pub level: f32,
    pub mute: Option<bool>,
}

/// Everything one channel asks for in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCommand {
    pub channel: usize,
    pub targets: Vec<Target>,
    pub level: f32,
    pub mute: Option<bool>,
}

impl ChannelCommand {
    /// One command per configured target, in configuration order
    pub fn volume_commands(&self) -> impl Iterator<Item = VolumeCommand> + '_ {
        self.targets.iter().map(move |target| VolumeCommand {
            target: target.clone(),
            level: self.level,
            mute: self.mute,
        })
    }
}

/// Converts frames into channel commands
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    /// Indexed by channel; `None` for indices with no configured apps
    channels: Vec<Option<Vec<Target>>>,
    settings: RouterSettings,
}

impl ChannelRouter {
    /// Channel count is the number of mapping entries.
    pub fn new(mapping: &ChannelMapping, settings: RouterSettings) -> Self {
        let channels = (0..mapping.len())
            .map(|index| {
                mapping
                    .apps(index)
                    .filter(|apps| !apps.is_empty())
                    .map(|apps| apps.iter().map(|name| Target::from_name(name)).collect())
            })
            .collect();

        Self { channels, settings }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn settings(&self) -> RouterSettings {
        self.settings
    }

    /// Volume level for a raw slider reading
    pub fn level(&self, raw: i32) -> f32 {
        let level = clamp_level(raw as f32 / FULL_SCALE);
        if self.settings.invert {
            1.0 - level
        } else {
            level
        }
    }

    fn mute_flag(&self, frame: &[i32], channel: usize) -> Option<bool> {
        if !self.settings.mute_buttons {
            return None;
        }
        let index = self.channel_count() + self.settings.mute_offset + channel;
        frame.get(index).map(|&value| value != 0)
    }

    /// Commands for every mapped channel present in `frame`.
    ///
    /// Values beyond the channel count are ignored (except the mute block);
    /// a short frame yields commands only for the channels it covers.
    pub fn route(&self, frame: &[i32]) -> Vec<ChannelCommand> {
        let commands: Vec<ChannelCommand> = frame
            .iter()
            .take(self.channel_count())
            .enumerate()
            .filter_map(|(channel, &raw)| {
                let targets = self.channels[channel].as_ref()?;
                Some(ChannelCommand {
                    channel,
                    targets: targets.clone(),
                    level: self.level(raw),
                    mute: self.mute_flag(frame, channel),
                })
            })
            .collect();

        trace!(values = frame.len(), commands = commands.len(), "Frame routed");
        commands
    }
}
