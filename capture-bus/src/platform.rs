//! Request/response contract of the capture platform.
//!
//! All methods take `&self`: a platform instance is shared by every encoder
//! worker thread, so implementations synchronise internally.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::{
    attr::{ChannelId, EncoderChnAttr, FrameSourceAttr, GroupId},
    audio::{AudioInput, PcmLoopback},
    isp::Isp,
    packet::{EncodedStream, PollStatus},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceId {
    FrameSource,
    Encoder,
}

/// One end of a binding between platform modules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cell {
    pub device: DeviceId,
    pub group: GroupId,
    pub output: u32,
}

impl Cell {
    pub fn frame_source(group: GroupId) -> Self {
        Self {
            device: DeviceId::FrameSource,
            group,
            output: 0,
        }
    }

    pub fn encoder(group: GroupId, channel: ChannelId) -> Self {
        Self {
            device: DeviceId::Encoder,
            group,
            output: channel,
        }
    }
}

impl Display for Cell {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({}, {})", self.device, self.group, self.output)
    }
}

/// Capture group subsystem.
pub trait FrameSource: Send + Sync {
    fn create_source(&self, group: GroupId, attr: &FrameSourceAttr) -> anyhow::Result<()>;

    fn set_source_attr(&self, group: GroupId, attr: &FrameSourceAttr) -> anyhow::Result<()>;

    fn source_attr(&self, group: GroupId) -> anyhow::Result<FrameSourceAttr>;

    /// Start producing frames. Must be called at most once per group.
    fn enable_source(&self, group: GroupId) -> anyhow::Result<()>;

    fn disable_source(&self, group: GroupId) -> anyhow::Result<()>;

    fn destroy_source(&self, group: GroupId) -> anyhow::Result<()>;
}

/// Encoder subsystem.
pub trait EncoderSystem: Send + Sync {
    fn create_group(&self, group: GroupId) -> anyhow::Result<()>;

    fn destroy_group(&self, group: GroupId) -> anyhow::Result<()>;

    fn create_channel(&self, channel: ChannelId, attr: &EncoderChnAttr) -> anyhow::Result<()>;

    fn destroy_channel(&self, channel: ChannelId) -> anyhow::Result<()>;

    fn register_channel(&self, group: GroupId, channel: ChannelId) -> anyhow::Result<()>;

    fn unregister_channel(&self, channel: ChannelId) -> anyhow::Result<()>;

    fn bind(&self, source: Cell, sink: Cell) -> anyhow::Result<()>;

    fn unbind(&self, source: Cell, sink: Cell) -> anyhow::Result<()>;

    fn start_recv_pic(&self, channel: ChannelId) -> anyhow::Result<()>;

    fn stop_recv_pic(&self, channel: ChannelId) -> anyhow::Result<()>;

    /// Wait up to `timeout` for a completed stream. A timeout is not an error.
    fn poll_stream(&self, channel: ChannelId, timeout: Duration) -> anyhow::Result<PollStatus>;

    fn get_stream(&self, channel: ChannelId, block: bool) -> anyhow::Result<EncodedStream>;

    fn release_stream(&self, channel: ChannelId, stream: EncodedStream) -> anyhow::Result<()>;
}

/// Everything a capture process needs from the hardware.
pub trait Platform: FrameSource + EncoderSystem + Isp + AudioInput + PcmLoopback {}

impl<T> Platform for T where T: FrameSource + EncoderSystem + Isp + AudioInput + PcmLoopback {}
