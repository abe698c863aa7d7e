//! Line consumer port and the frame → volume pipeline behind it

use crate::domain::frame::parse_frame;
use crate::domain::router::{ChannelRouter, VolumeCommand};
use crate::domain::volume::VolumeSink;
use std::sync::Arc;
use tracing::{trace, warn};

/// Receives every complete line read from the device.
///
/// Called on the serial worker for each line, with no backpressure: an
/// implementation must return promptly.
pub trait LineConsumer: Send + Sync {
    fn on_line(&self, line: &str);
}

/// Parses, routes and applies each line
pub struct FrameDispatcher {
    router: ChannelRouter,
    sink: Arc<VolumeSink>,
}

impl FrameDispatcher {
    pub fn new(router: ChannelRouter, sink: Arc<VolumeSink>) -> Self {
        Self { router, sink }
    }

    pub fn sink(&self) -> &Arc<VolumeSink> {
        &self.sink
    }
}

impl LineConsumer for FrameDispatcher {
    fn on_line(&self, line: &str) {
        let frame = parse_frame(line);
        trace!(line, values = frame.len(), "Line received");

        // Each channel stands alone: one failing target list does not stop
        // the remaining channels of the frame.
        for command in self.router.route(&frame) {
            let commands: Vec<VolumeCommand> = command.volume_commands().collect();
            if let Err(e) = self.sink.apply_commands(&commands) {
                warn!(
                    channel = command.channel,
                    level = command.level,
                    mute = ?command.mute,
                    error = %e,
                    "Failed to apply channel"
                );
            }
        }
    }
}
