use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// Capture group (frame source channel) identifier.
pub type GroupId = u32;

/// Encoder channel identifier, unique process-wide.
pub type ChannelId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Nv12,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Duration of one frame (`den / num` seconds). `None` for a zero rate.
    pub fn frame_interval(&self) -> Option<Duration> {
        if self.num == 0 || self.den == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(self.den as f64 / self.num as f64))
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

impl Display for FrameRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    Physical,
    Extended,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CropRect {
    pub enable: bool,
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScaleRect {
    pub enable: bool,
    pub width: u32,
    pub height: u32,
}

/// Frame source channel attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSourceAttr {
    pub pixel_format: PixelFormat,
    pub frame_rate: FrameRate,
    /// Number of video buffers the source cycles through.
    pub buffers: u32,
    pub kind: ChannelKind,
    pub crop: CropRect,
    pub scaler: ScaleRect,
    pub pic_width: u32,
    pub pic_height: u32,
}

impl FrameSourceAttr {
    /// Size of the pictures the source hands to encoders.
    pub fn output_size(&self) -> (u32, u32) {
        if self.scaler.enable && self.scaler.width > 0 && self.scaler.height > 0 {
            (self.scaler.width, self.scaler.height)
        } else {
            (self.pic_width, self.pic_height)
        }
    }
}

impl Display for FrameSourceAttr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pic {}x{}, rate {}, buffers {}, crop {:?}, scaler {:?}",
            self.pic_width, self.pic_height, self.frame_rate, self.buffers, self.crop, self.scaler
        )
    }
}

/// Compressed payload produced by an encoder channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadType {
    H264,
    Jpeg,
}

impl FromStr for PayloadType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PT_H264" => Ok(PayloadType::H264),
            "PT_JPEG" => Ok(PayloadType::Jpeg),
            other => Err(anyhow::anyhow!("unknown payload type: {}", other)),
        }
    }
}

impl Display for PayloadType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadType::H264 => write!(f, "PT_H264"),
            PayloadType::Jpeg => write!(f, "PT_JPEG"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RcMode {
    H264Vbr,
    Mjpeg,
}

impl FromStr for RcMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENC_RC_MODE_H264VBR" => Ok(RcMode::H264Vbr),
            "MJPEG" => Ok(RcMode::Mjpeg),
            other => Err(anyhow::anyhow!("unknown rate control mode: {}", other)),
        }
    }
}

impl Display for RcMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RcMode::H264Vbr => write!(f, "ENC_RC_MODE_H264VBR"),
            RcMode::Mjpeg => write!(f, "MJPEG"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderAttr {
    pub payload: PayloadType,
    pub buf_size: u32,
    pub profile: u32,
    pub pic_width: u32,
    pub pic_height: u32,
}

/// Rate control parameters. The VBR fields are ignored by MJPEG channels
/// except `max_qp`/`min_qp`, which bound picture quality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RcAttr {
    pub mode: RcMode,
    pub frame_rate: FrameRate,
    pub max_gop: u32,
    pub max_qp: u32,
    pub min_qp: u32,
    pub static_time: u32,
    /// kbps
    pub max_bitrate: u32,
    pub change_pos: u32,
    pub frame_qp_step: u32,
    pub gop_qp_step: u32,
    pub frame_used: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderChnAttr {
    pub enc: EncoderAttr,
    pub rc: RcAttr,
}
