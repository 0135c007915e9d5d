#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SoundMode {
    Mono,
    Stereo,
}

/// Public attributes of an audio input device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioIoAttr {
    pub sample_rate: u32,
    pub bit_width: u16,
    pub sound_mode: SoundMode,
    /// Audio frames cached by the device (platform maximum is 50).
    pub frame_num: u32,
    /// Sampling points per frame.
    pub samples_per_frame: u32,
    pub channel_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioChnParam {
    pub user_frame_depth: u32,
}

/// Audio input device.
pub trait AudioInput: Send + Sync {
    fn set_pub_attr(&self, device: u32, attr: &AudioIoAttr) -> anyhow::Result<()>;

    fn enable_device(&self, device: u32) -> anyhow::Result<()>;

    fn set_chn_param(&self, device: u32, channel: u32, param: &AudioChnParam)
    -> anyhow::Result<()>;

    fn enable_chn(&self, device: u32, channel: u32) -> anyhow::Result<()>;

    fn set_volume(&self, device: u32, channel: u32, volume: i32) -> anyhow::Result<()>;

    fn disable_chn(&self, device: u32, channel: u32) -> anyhow::Result<()>;

    fn disable_device(&self, device: u32) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcmAccess {
    RwInterleaved,
    RwNonInterleaved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcmFormat {
    S16Le,
    S32Le,
}

/// Hardware parameters negotiated on a PCM loopback device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PcmParams {
    pub access: Option<PcmAccess>,
    pub format: Option<PcmFormat>,
    pub channels: Option<u32>,
    pub rate: Option<u32>,
}

/// Playback side of a PCM loopback device. Every parameter call reports its
/// own status; callers must check each one.
pub trait PcmLoopback: Send + Sync {
    fn pcm_open(&self, name: &str) -> anyhow::Result<()>;

    fn pcm_set_access(&self, access: PcmAccess) -> anyhow::Result<()>;

    fn pcm_set_format(&self, format: PcmFormat) -> anyhow::Result<()>;

    fn pcm_set_channels(&self, channels: u32) -> anyhow::Result<()>;

    /// Returns the rate actually selected.
    fn pcm_set_rate_near(&self, rate: u32) -> anyhow::Result<u32>;

    /// Commit the parameters to the device.
    fn pcm_apply(&self) -> anyhow::Result<PcmParams>;

    fn pcm_close(&self) -> anyhow::Result<()>;
}
