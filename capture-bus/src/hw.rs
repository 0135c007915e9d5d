//! Encoder discovery for the software platform.
//!
//! Hardware H.264 encoders (V4L2M2M/QSV/NVENC) are preferred when the local
//! FFmpeg build exposes one; `libx264` is the fallback. All of them accept
//! NV12 input, which is what the software frame source produces.

use crate::attr::PayloadType;

/// Software encoder name used when no hardware encoder can be opened.
pub fn software_encoder_name(payload: PayloadType) -> Option<&'static str> {
    match payload {
        PayloadType::H264 => Some("libx264"),
        // JPEG is produced with jpeg-encoder, not FFmpeg.
        PayloadType::Jpeg => None,
    }
}

fn hw_encoder_names(payload: PayloadType) -> &'static [&'static str] {
    match payload {
        PayloadType::H264 => &["h264_v4l2m2m", "h264_qsv", "h264_nvenc"],
        PayloadType::Jpeg => &[],
    }
}

/// Try to find a hardware-accelerated encoder for the payload type.
/// Returns the first available one, or None if none is found.
pub fn find_hw_encoder(payload: PayloadType) -> Option<ffmpeg_next::Codec> {
    for name in hw_encoder_names(payload) {
        if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
            log::info!("found hardware encoder: {}", name);
            return Some(codec);
        }
    }
    None
}
