use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use capture_bus::attr::{
    ChannelKind, CropRect, EncoderAttr, EncoderChnAttr, FrameRate, FrameSourceAttr, PayloadType,
    PixelFormat, RcAttr, RcMode, ScaleRect,
};
use serde::Deserialize;

use crate::error::ConfigError;

/// Frame buffers allocated per capture group.
const SOURCE_BUFFERS: u32 = 3;

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub stream_settings: Vec<StreamSettings>,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

/// One logical video stream: a capture group and the encoder channels drawing
/// from it.
#[derive(Clone, Debug, Deserialize)]
pub struct StreamSettings {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub pic_width: u32,
    pub pic_height: u32,
    pub frame_rate_numerator: u32,
    pub frame_rate_denominator: u32,
    #[serde(default)]
    pub crop_enable: bool,
    #[serde(default)]
    pub crop_top: u32,
    #[serde(default)]
    pub crop_left: u32,
    #[serde(default)]
    pub crop_width: u32,
    #[serde(default)]
    pub crop_height: u32,
    #[serde(default)]
    pub scaling_enable: bool,
    #[serde(default)]
    pub scaling_width: u32,
    #[serde(default)]
    pub scaling_height: u32,
    pub group: u32,
    /// Frames between FPS reports; `runtime.fps_window` when unset.
    #[serde(default)]
    pub statistics_interval: Option<u32>,
    /// kbps
    #[serde(default = "default_max_bitrate")]
    pub max_bitrate: u32,
    #[serde(default = "default_change_pos")]
    pub change_pos: u32,
    #[serde(default)]
    pub encoders: Vec<EncoderSetting>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EncoderSetting {
    pub channel: u32,
    pub payload_type: String,
    pub mode: String,
    #[serde(default)]
    pub buffer_size: u32,
    #[serde(default)]
    pub profile: u32,
    pub frame_rate_numerator: u32,
    pub frame_rate_denominator: u32,
    pub max_group_of_pictures: u32,
    pub max_qp: u32,
    pub min_qp: u32,
    #[serde(default)]
    pub frame_qp_step: u32,
    #[serde(default)]
    pub gop_qp_step: u32,
    #[serde(default)]
    pub v4l2_device_path: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub poll_timeout_ms: u64,
    pub warmup_ms: u64,
    pub fps_window: u32,
    pub pacing: bool,
    pub max_groups: u32,
    pub sensor_info_path: String,
    pub audio: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            warmup_ms: 2000,
            fps_window: 200,
            pacing: true,
            max_groups: 5,
            sensor_info_path: "/proc/jz/sinfo/info".to_string(),
            audio: true,
        }
    }
}

impl RuntimeSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_bitrate() -> u32 {
    500
}

fn default_change_pos() -> u32 {
    50
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Splits the enabled streams into those that may start and the errors
    /// that rejected the others. Channel and group ids are claimed in
    /// document order, so a later stream reusing one is the one rejected.
    pub fn validate(&self) -> (Vec<StreamSettings>, Vec<ConfigError>) {
        let mut accepted = Vec::new();
        let mut errors = Vec::new();
        let mut groups: HashMap<u32, String> = HashMap::new();
        let mut channels: HashMap<u32, String> = HashMap::new();

        for stream in self.stream_settings.iter().filter(|s| s.enabled) {
            match stream.check(&self.runtime, &groups, &channels) {
                Ok(()) => {
                    groups.insert(stream.group, stream.name.clone());
                    for enc in &stream.encoders {
                        channels.insert(enc.channel, stream.name.clone());
                    }
                    accepted.push(stream.clone());
                }
                Err(e) => errors.push(e),
            }
        }
        (accepted, errors)
    }
}

impl StreamSettings {
    fn check(
        &self,
        runtime: &RuntimeSettings,
        groups: &HashMap<u32, String>,
        channels: &HashMap<u32, String>,
    ) -> Result<(), ConfigError> {
        if self.group >= runtime.max_groups {
            return Err(ConfigError::GroupOutOfRange {
                stream: self.name.clone(),
                group: self.group,
                max: runtime.max_groups.saturating_sub(1),
            });
        }
        if let Some(owner) = groups.get(&self.group) {
            return Err(ConfigError::DuplicateGroup {
                stream: self.name.clone(),
                group: self.group,
                owner: owner.clone(),
            });
        }
        if self.frame_rate().frame_interval().is_none() {
            return Err(ConfigError::ZeroFrameRate {
                stream: self.name.clone(),
                num: self.frame_rate_numerator,
                den: self.frame_rate_denominator,
            });
        }
        if self.encoders.is_empty() {
            return Err(ConfigError::NoEncoders {
                stream: self.name.clone(),
            });
        }

        let mut seen: HashMap<u32, String> = HashMap::new();
        for enc in &self.encoders {
            if let Some(owner) = channels.get(&enc.channel).or_else(|| seen.get(&enc.channel)) {
                return Err(ConfigError::DuplicateChannel {
                    stream: self.name.clone(),
                    channel: enc.channel,
                    owner: owner.clone(),
                });
            }
            seen.insert(enc.channel, self.name.clone());

            self.encoder_attr(enc)?;
            if enc.v4l2_device_path.trim().is_empty() {
                return Err(ConfigError::MissingDevicePath {
                    stream: self.name.clone(),
                    channel: enc.channel,
                });
            }
        }
        Ok(())
    }

    pub fn frame_rate(&self) -> FrameRate {
        FrameRate::new(self.frame_rate_numerator, self.frame_rate_denominator)
    }

    pub fn fps_window(&self, runtime: &RuntimeSettings) -> u32 {
        self.statistics_interval
            .filter(|n| *n > 0)
            .unwrap_or(runtime.fps_window)
    }

    /// Capture-group attributes: NV12, the stream rate, three buffers on the
    /// physical channel.
    pub fn source_attr(&self) -> FrameSourceAttr {
        FrameSourceAttr {
            pixel_format: PixelFormat::Nv12,
            frame_rate: self.frame_rate(),
            buffers: SOURCE_BUFFERS,
            kind: ChannelKind::Physical,
            crop: CropRect {
                enable: self.crop_enable,
                top: self.crop_top,
                left: self.crop_left,
                width: self.crop_width,
                height: self.crop_height,
            },
            scaler: ScaleRect {
                enable: self.scaling_enable,
                width: self.scaling_width,
                height: self.scaling_height,
            },
            pic_width: self.pic_width,
            pic_height: self.pic_height,
        }
    }

    /// Encoder channel attributes. Fails on an unknown payload type or rate
    /// control mode, or a zero encoder frame rate.
    pub fn encoder_attr(&self, enc: &EncoderSetting) -> Result<EncoderChnAttr, ConfigError> {
        let payload: PayloadType =
            enc.payload_type
                .parse()
                .map_err(|_| ConfigError::UnknownPayloadType {
                    stream: self.name.clone(),
                    channel: enc.channel,
                    value: enc.payload_type.clone(),
                })?;
        let mode: RcMode = enc.mode.parse().map_err(|_| ConfigError::UnknownRcMode {
            stream: self.name.clone(),
            channel: enc.channel,
            value: enc.mode.clone(),
        })?;
        let frame_rate = enc.frame_rate();
        if frame_rate.frame_interval().is_none() {
            return Err(ConfigError::ZeroFrameRate {
                stream: self.name.clone(),
                num: enc.frame_rate_numerator,
                den: enc.frame_rate_denominator,
            });
        }

        let (pic_width, pic_height) = self.source_attr().output_size();
        Ok(EncoderChnAttr {
            enc: EncoderAttr {
                payload,
                buf_size: enc.buffer_size,
                profile: enc.profile,
                pic_width,
                pic_height,
            },
            rc: RcAttr {
                mode,
                frame_rate,
                max_gop: enc.max_group_of_pictures,
                max_qp: enc.max_qp,
                min_qp: enc.min_qp,
                static_time: 1,
                max_bitrate: self.max_bitrate,
                change_pos: self.change_pos,
                frame_qp_step: enc.frame_qp_step,
                gop_qp_step: enc.gop_qp_step,
                frame_used: true,
            },
        })
    }
}

impl EncoderSetting {
    pub fn frame_rate(&self) -> FrameRate {
        FrameRate::new(self.frame_rate_numerator, self.frame_rate_denominator)
    }
}
