use std::fmt::{Display, Formatter};

use capture_bus::attr::{ChannelId, GroupId};

use crate::error::WorkerFailure;

/// Lifecycle of one encoder worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Streaming,
    Draining,
    Stopped,
}

impl Display for WorkerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Starting => "starting",
            WorkerState::Streaming => "streaming",
            WorkerState::Draining => "draining",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What a worker hands back through its join handle.
#[derive(Debug)]
pub struct WorkerReport {
    pub stream: String,
    pub group: GroupId,
    pub channel: ChannelId,
    /// Last state reached before stopping. `Starting` means setup failed.
    pub reached: WorkerState,
    pub frames: u64,
    pub bytes: u64,
    pub timeouts: u64,
    /// Completed FPS windows.
    pub fps_samples: u64,
    pub result: Result<(), WorkerFailure>,
}

impl WorkerReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl Display for WorkerReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stream {} group {} channel {}: {} frames, {} bytes, {} poll timeouts, {} fps windows, reached {}",
            self.stream,
            self.group,
            self.channel,
            self.frames,
            self.bytes,
            self.timeouts,
            self.fps_samples,
            self.reached
        )?;
        match &self.result {
            Ok(()) => write!(f, ", ok"),
            Err(e) => write!(f, ", {}", e),
        }
    }
}
