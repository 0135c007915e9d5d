use anyhow::Context;
use capture_bus::audio::{
    AudioChnParam, AudioInput, AudioIoAttr, PcmAccess, PcmFormat, PcmLoopback, PcmParams,
    SoundMode,
};

pub const AUDIO_DEVICE: u32 = 1;
pub const AUDIO_CHANNEL: u32 = 0;
pub const AUDIO_VOLUME: i32 = 70;
pub const PCM_DEVICE: &str = "hw:0,0";

const SAMPLE_RATE: u32 = 48000;

pub fn input_attr() -> AudioIoAttr {
    AudioIoAttr {
        sample_rate: SAMPLE_RATE,
        bit_width: 16,
        sound_mode: SoundMode::Mono,
        frame_num: 50,
        samples_per_frame: 960,
        channel_count: 1,
    }
}

/// Sets up the audio input channel and the PCM loopback it plays into.
/// Returns the PCM parameters the device settled on. On failure whatever was
/// enabled is torn down again.
pub fn bring_up<P>(platform: &P) -> anyhow::Result<PcmParams>
where
    P: AudioInput + PcmLoopback + ?Sized,
{
    configure(platform).inspect_err(|_| tear_down(platform))
}

fn configure<P>(platform: &P) -> anyhow::Result<PcmParams>
where
    P: AudioInput + PcmLoopback + ?Sized,
{
    let attr = input_attr();
    platform
        .set_pub_attr(AUDIO_DEVICE, &attr)
        .with_context(|| format!("set audio device {} attributes", AUDIO_DEVICE))?;
    log::info!(
        "audio device {}: {} Hz, {} bit, {:?}, {} cached frames, {} samples per frame",
        AUDIO_DEVICE,
        attr.sample_rate,
        attr.bit_width,
        attr.sound_mode,
        attr.frame_num,
        attr.samples_per_frame
    );
    platform
        .enable_device(AUDIO_DEVICE)
        .with_context(|| format!("enable audio device {}", AUDIO_DEVICE))?;
    platform
        .set_chn_param(
            AUDIO_DEVICE,
            AUDIO_CHANNEL,
            &AudioChnParam {
                user_frame_depth: 20,
            },
        )
        .with_context(|| format!("set audio channel {} parameters", AUDIO_CHANNEL))?;
    platform
        .enable_chn(AUDIO_DEVICE, AUDIO_CHANNEL)
        .with_context(|| format!("enable audio channel {}", AUDIO_CHANNEL))?;
    platform
        .set_volume(AUDIO_DEVICE, AUDIO_CHANNEL, AUDIO_VOLUME)
        .context("set audio volume")?;

    platform
        .pcm_open(PCM_DEVICE)
        .with_context(|| format!("open PCM device {}", PCM_DEVICE))?;
    platform
        .pcm_set_access(PcmAccess::RwInterleaved)
        .context("set PCM access")?;
    platform
        .pcm_set_format(PcmFormat::S16Le)
        .context("set PCM format")?;
    platform
        .pcm_set_channels(attr.channel_count)
        .context("set PCM channels")?;
    let rate = platform
        .pcm_set_rate_near(SAMPLE_RATE)
        .context("set PCM rate")?;
    if rate != SAMPLE_RATE {
        log::warn!("PCM device {} runs at {} Hz instead of {}", PCM_DEVICE, rate, SAMPLE_RATE);
    }
    let params = platform
        .pcm_apply()
        .with_context(|| format!("apply PCM parameters on {}", PCM_DEVICE))?;
    log::info!("PCM device {}: {:?}", PCM_DEVICE, params);
    Ok(params)
}

pub fn tear_down<P>(platform: &P)
where
    P: AudioInput + PcmLoopback + ?Sized,
{
    let steps: [(&str, anyhow::Result<()>); 3] = [
        ("close PCM device", platform.pcm_close()),
        (
            "disable audio channel",
            platform.disable_chn(AUDIO_DEVICE, AUDIO_CHANNEL),
        ),
        ("disable audio device", platform.disable_device(AUDIO_DEVICE)),
    ];
    for (step, result) in steps {
        if let Err(e) = result {
            log::warn!("audio teardown: {}: {:#}", step, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::MockPlatform;

    #[test]
    fn test_bring_up_configures_everything() {
        let platform = MockPlatform::new();
        let params = bring_up(&platform).unwrap();
        assert_eq!(params.access, Some(PcmAccess::RwInterleaved));
        assert_eq!(params.format, Some(PcmFormat::S16Le));
        assert_eq!(params.channels, Some(1));
        assert_eq!(params.rate, Some(48000));
        assert_eq!(platform.count("ai_set_volume:1/0/70"), 1);
        assert_eq!(platform.pcm_params(), params);
    }

    #[test]
    fn test_every_pcm_call_is_checked() {
        for step in [
            "pcm_set_access:RwInterleaved",
            "pcm_set_format:S16Le",
            "pcm_set_channels:1",
            "pcm_set_rate_near:48000",
            "pcm_apply:0",
        ] {
            let platform = MockPlatform::new();
            platform.fail_on(step);
            assert!(bring_up(&platform).is_err(), "{} failure ignored", step);
        }
    }

    #[test]
    fn test_input_failure_stops_before_pcm() {
        let platform = MockPlatform::new();
        platform.fail_on("ai_enable_chn:1/0");
        assert!(bring_up(&platform).is_err());
        assert_eq!(platform.count("pcm_open:hw:0,0"), 0);
    }

    #[test]
    fn test_partial_bring_up_is_torn_down() {
        let platform = MockPlatform::new();
        platform.fail_on("pcm_set_format:S16Le");
        assert!(bring_up(&platform).is_err());
        assert_eq!(platform.count("pcm_close:0"), 1);
        assert_eq!(platform.count("ai_disable_chn:1/0"), 1);
        assert_eq!(platform.count("ai_disable:1"), 1);
    }

    #[test]
    fn test_success_leaves_audio_running() {
        let platform = MockPlatform::new();
        bring_up(&platform).unwrap();
        assert_eq!(platform.count("pcm_close:0"), 0);
        assert_eq!(platform.count("ai_disable:1"), 0);
    }

    #[test]
    fn test_tear_down_runs_all_steps() {
        let platform = MockPlatform::new();
        platform.fail_on("pcm_close:0");
        tear_down(&platform);
        assert_eq!(platform.count("ai_disable_chn:1/0"), 1);
        assert_eq!(platform.count("ai_disable:1"), 1);
    }
}
