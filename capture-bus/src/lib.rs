//! Platform contract for camera capture pipelines.
//!
//! The capture-group (frame source) subsystem, the encoder subsystem, the
//! sensor/ISP and the audio input are modelled as traits in [`platform`],
//! [`isp`] and [`audio`]. Callers only ever talk to those traits; the
//! [`soft`] module provides a software implementation that follows the same
//! request/response contract on a regular Linux host.

/// Registers FFmpeg components. Call once at startup before creating a
/// [`soft::SoftPlatform`].
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod attr;
pub mod audio;
pub mod hw;
pub mod isp;
pub mod nal;
pub mod packet;
pub mod platform;
pub mod soft;
