//! Scripted in-memory platform and sinks for pipeline tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use capture_bus::{
    attr::{ChannelId, EncoderChnAttr, FrameSourceAttr, GroupId},
    audio::{AudioChnParam, AudioInput, AudioIoAttr, PcmAccess, PcmFormat, PcmLoopback, PcmParams},
    isp::{Isp, SensorInfo, WdrMode},
    packet::{EncodedStream, Pack, PollStatus},
    platform::{Cell, EncoderSystem, FrameSource},
};

use crate::config::{EncoderSetting, RuntimeSettings, Settings, StreamSettings};
use crate::media::sink::{FrameSink, SinkFactory, SinkSpec};

/// What the next poll on a channel does.
#[derive(Clone, Debug)]
pub enum Step {
    Ready(Vec<Vec<u8>>),
    Timeout,
    Fail,
}

#[derive(Default)]
struct MockState {
    calls: Vec<String>,
    enables: HashMap<GroupId, usize>,
    sources: HashMap<GroupId, FrameSourceAttr>,
    scripts: HashMap<ChannelId, VecDeque<Step>>,
    endless: HashMap<ChannelId, Vec<Vec<u8>>>,
    pending: HashMap<ChannelId, EncodedStream>,
    outstanding: HashMap<ChannelId, HashSet<u64>>,
    released: HashMap<ChannelId, usize>,
    next_seq: u64,
    fail_on: HashSet<String>,
    pcm: PcmParams,
}

/// Records every call as `"op:id"` and fails any call listed with
/// [`MockPlatform::fail_on`].
#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
    enable_delay: Duration,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable calls sleep this long, widening activation races.
    pub fn with_enable_delay(delay: Duration) -> Self {
        Self {
            enable_delay: delay,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn call(&self, op: &str, id: impl std::fmt::Display) -> anyhow::Result<()> {
        let key = format!("{}:{}", op, id);
        let mut state = self.lock();
        state.calls.push(key.clone());
        if state.fail_on.contains(&key) {
            anyhow::bail!("{} failed", key);
        }
        Ok(())
    }

    pub fn fail_on(&self, key: &str) {
        self.lock().fail_on.insert(key.to_string());
    }

    pub fn clear_failure(&self, key: &str) {
        self.lock().fail_on.remove(key);
    }

    pub fn script(&self, channel: ChannelId, steps: Vec<Step>) {
        self.lock().scripts.entry(channel).or_default().extend(steps);
    }

    /// Once the script runs out, every poll is ready with these packs.
    pub fn endless(&self, channel: ChannelId, packs: Vec<Vec<u8>>) {
        self.lock().endless.insert(channel, packs);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count(&self, key: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == key).count()
    }

    pub fn enables(&self, group: GroupId) -> usize {
        self.lock().enables.get(&group).copied().unwrap_or(0)
    }

    pub fn released(&self, channel: ChannelId) -> usize {
        self.lock().released.get(&channel).copied().unwrap_or(0)
    }

    pub fn pcm_params(&self) -> PcmParams {
        self.lock().pcm.clone()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.lock().calls.iter().position(|c| c == key)
    }
}

impl FrameSource for MockPlatform {
    fn create_source(&self, group: GroupId, attr: &FrameSourceAttr) -> anyhow::Result<()> {
        self.call("create_source", group)?;
        self.lock().sources.insert(group, attr.clone());
        Ok(())
    }

    fn set_source_attr(&self, group: GroupId, attr: &FrameSourceAttr) -> anyhow::Result<()> {
        self.call("set_source_attr", group)?;
        self.lock().sources.insert(group, attr.clone());
        Ok(())
    }

    fn source_attr(&self, group: GroupId) -> anyhow::Result<FrameSourceAttr> {
        self.call("source_attr", group)?;
        self.lock()
            .sources
            .get(&group)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("frame source {} not created", group))
    }

    fn enable_source(&self, group: GroupId) -> anyhow::Result<()> {
        if !self.enable_delay.is_zero() {
            std::thread::sleep(self.enable_delay);
        }
        self.call("enable_source", group)?;
        *self.lock().enables.entry(group).or_default() += 1;
        Ok(())
    }

    fn disable_source(&self, group: GroupId) -> anyhow::Result<()> {
        self.call("disable_source", group)
    }

    fn destroy_source(&self, group: GroupId) -> anyhow::Result<()> {
        self.call("destroy_source", group)
    }
}

impl EncoderSystem for MockPlatform {
    fn create_group(&self, group: GroupId) -> anyhow::Result<()> {
        self.call("create_group", group)
    }

    fn destroy_group(&self, group: GroupId) -> anyhow::Result<()> {
        self.call("destroy_group", group)
    }

    fn create_channel(&self, channel: ChannelId, _attr: &EncoderChnAttr) -> anyhow::Result<()> {
        self.call("create_channel", channel)
    }

    fn destroy_channel(&self, channel: ChannelId) -> anyhow::Result<()> {
        self.call("destroy_channel", channel)
    }

    fn register_channel(&self, group: GroupId, channel: ChannelId) -> anyhow::Result<()> {
        self.call("register_channel", format!("{}/{}", group, channel))
    }

    fn unregister_channel(&self, channel: ChannelId) -> anyhow::Result<()> {
        self.call("unregister_channel", channel)
    }

    fn bind(&self, _source: Cell, sink: Cell) -> anyhow::Result<()> {
        self.call("bind", sink.output)
    }

    fn unbind(&self, _source: Cell, sink: Cell) -> anyhow::Result<()> {
        self.call("unbind", sink.output)
    }

    fn start_recv_pic(&self, channel: ChannelId) -> anyhow::Result<()> {
        self.call("start_recv_pic", channel)
    }

    fn stop_recv_pic(&self, channel: ChannelId) -> anyhow::Result<()> {
        self.call("stop_recv_pic", channel)
    }

    fn poll_stream(&self, channel: ChannelId, timeout: Duration) -> anyhow::Result<PollStatus> {
        let step = {
            let mut state = self.lock();
            let scripted = state.scripts.get_mut(&channel).and_then(VecDeque::pop_front);
            scripted.or_else(|| state.endless.get(&channel).cloned().map(Step::Ready))
        };
        match step {
            Some(Step::Ready(packs)) => {
                let mut state = self.lock();
                let seq = state.next_seq;
                state.next_seq += 1;
                let packs = packs
                    .into_iter()
                    .map(|p| Pack::new(Bytes::from(p), seq as i64, false))
                    .collect();
                state.pending.insert(channel, EncodedStream::new(seq, packs));
                Ok(PollStatus::Ready)
            }
            Some(Step::Fail) => anyhow::bail!("channel {}: poll failed", channel),
            Some(Step::Timeout) | None => {
                std::thread::sleep(timeout);
                Ok(PollStatus::Timeout)
            }
        }
    }

    fn get_stream(&self, channel: ChannelId, _block: bool) -> anyhow::Result<EncodedStream> {
        self.call("get_stream", channel)?;
        let mut state = self.lock();
        let stream = state
            .pending
            .remove(&channel)
            .ok_or_else(|| anyhow::anyhow!("channel {}: no stream ready", channel))?;
        state.outstanding.entry(channel).or_default().insert(stream.seq());
        Ok(stream)
    }

    fn release_stream(&self, channel: ChannelId, stream: EncodedStream) -> anyhow::Result<()> {
        self.call("release_stream", channel)?;
        let mut state = self.lock();
        let handed_out = state
            .outstanding
            .get_mut(&channel)
            .map(|s| s.remove(&stream.seq()))
            .unwrap_or(false);
        if !handed_out {
            anyhow::bail!("channel {}: stream {} was not handed out", channel, stream.seq());
        }
        *state.released.entry(channel).or_default() += 1;
        Ok(())
    }
}

impl Isp for MockPlatform {
    fn open(&self) -> anyhow::Result<()> {
        self.call("isp_open", 0)
    }

    fn add_sensor(&self, info: &SensorInfo) -> anyhow::Result<()> {
        self.call("add_sensor", &info.name)
    }

    fn enable_sensor(&self) -> anyhow::Result<()> {
        self.call("enable_sensor", 0)
    }

    fn system_init(&self) -> anyhow::Result<()> {
        self.call("system_init", 0)
    }

    fn enable_tuning(&self) -> anyhow::Result<()> {
        self.call("enable_tuning", 0)
    }

    fn set_wdr_mode(&self, mode: WdrMode) -> anyhow::Result<()> {
        self.call("set_wdr_mode", format!("{:?}", mode))
    }

    fn system_exit(&self) -> anyhow::Result<()> {
        self.call("system_exit", 0)
    }

    fn disable_sensor(&self) -> anyhow::Result<()> {
        self.call("disable_sensor", 0)
    }

    fn del_sensor(&self, info: &SensorInfo) -> anyhow::Result<()> {
        self.call("del_sensor", &info.name)
    }

    fn disable_tuning(&self) -> anyhow::Result<()> {
        self.call("disable_tuning", 0)
    }

    fn close(&self) -> anyhow::Result<()> {
        self.call("isp_close", 0)
    }
}

impl AudioInput for MockPlatform {
    fn set_pub_attr(&self, device: u32, _attr: &AudioIoAttr) -> anyhow::Result<()> {
        self.call("ai_set_pub_attr", device)
    }

    fn enable_device(&self, device: u32) -> anyhow::Result<()> {
        self.call("ai_enable", device)
    }

    fn set_chn_param(&self, device: u32, channel: u32, _param: &AudioChnParam) -> anyhow::Result<()> {
        self.call("ai_set_chn_param", format!("{}/{}", device, channel))
    }

    fn enable_chn(&self, device: u32, channel: u32) -> anyhow::Result<()> {
        self.call("ai_enable_chn", format!("{}/{}", device, channel))
    }

    fn set_volume(&self, device: u32, channel: u32, volume: i32) -> anyhow::Result<()> {
        self.call("ai_set_volume", format!("{}/{}/{}", device, channel, volume))
    }

    fn disable_chn(&self, device: u32, channel: u32) -> anyhow::Result<()> {
        self.call("ai_disable_chn", format!("{}/{}", device, channel))
    }

    fn disable_device(&self, device: u32) -> anyhow::Result<()> {
        self.call("ai_disable", device)
    }
}

impl PcmLoopback for MockPlatform {
    fn pcm_open(&self, name: &str) -> anyhow::Result<()> {
        self.call("pcm_open", name)
    }

    fn pcm_set_access(&self, access: PcmAccess) -> anyhow::Result<()> {
        self.call("pcm_set_access", format!("{:?}", access))?;
        self.lock().pcm.access = Some(access);
        Ok(())
    }

    fn pcm_set_format(&self, format: PcmFormat) -> anyhow::Result<()> {
        self.call("pcm_set_format", format!("{:?}", format))?;
        self.lock().pcm.format = Some(format);
        Ok(())
    }

    fn pcm_set_channels(&self, channels: u32) -> anyhow::Result<()> {
        self.call("pcm_set_channels", channels)?;
        self.lock().pcm.channels = Some(channels);
        Ok(())
    }

    fn pcm_set_rate_near(&self, rate: u32) -> anyhow::Result<u32> {
        self.call("pcm_set_rate_near", rate)?;
        self.lock().pcm.rate = Some(rate);
        Ok(rate)
    }

    fn pcm_apply(&self) -> anyhow::Result<PcmParams> {
        self.call("pcm_apply", 0)?;
        Ok(self.lock().pcm.clone())
    }

    fn pcm_close(&self) -> anyhow::Result<()> {
        self.call("pcm_close", 0)
    }
}

/// Frames written per sink path.
pub type Written = Arc<Mutex<HashMap<String, Vec<Vec<u8>>>>>;

#[derive(Default)]
pub struct MemorySinks {
    written: Written,
    fail_open: Mutex<HashSet<String>>,
    /// Path -> number of writes that succeed before every later one fails.
    fail_after: Mutex<HashMap<String, usize>>,
}

impl MemorySinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, path: &str) {
        self.fail_open.lock().unwrap().insert(path.to_string());
    }

    pub fn fail_after(&self, path: &str, writes: usize) {
        self.fail_after.lock().unwrap().insert(path.to_string(), writes);
    }

    pub fn frames(&self, path: &str) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().get(path).cloned().unwrap_or_default()
    }
}

struct MemorySink {
    path: String,
    written: Written,
    budget: Option<usize>,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        if let Some(budget) = self.budget.as_mut() {
            if *budget == 0 {
                anyhow::bail!("{}: short write: 0 of {} bytes", self.path, frame.len());
            }
            *budget -= 1;
        }
        self.written
            .lock()
            .unwrap()
            .entry(self.path.clone())
            .or_default()
            .push(frame.to_vec());
        Ok(())
    }
}

impl SinkFactory for MemorySinks {
    fn open(&self, target: &SinkSpec) -> anyhow::Result<Box<dyn FrameSink>> {
        if self.fail_open.lock().unwrap().contains(&target.path) {
            anyhow::bail!("{}: no such device", target.path);
        }
        Ok(Box::new(MemorySink {
            path: target.path.clone(),
            written: Arc::clone(&self.written),
            budget: self.fail_after.lock().unwrap().get(&target.path).copied(),
        }))
    }
}

pub fn h264_encoder(channel: ChannelId, device: &str) -> EncoderSetting {
    EncoderSetting {
        channel,
        payload_type: "PT_H264".to_string(),
        mode: "ENC_RC_MODE_H264VBR".to_string(),
        buffer_size: 0,
        profile: 1,
        frame_rate_numerator: 25,
        frame_rate_denominator: 1,
        max_group_of_pictures: 50,
        max_qp: 45,
        min_qp: 15,
        frame_qp_step: 3,
        gop_qp_step: 15,
        v4l2_device_path: device.to_string(),
    }
}

pub fn jpeg_encoder(channel: ChannelId, device: &str) -> EncoderSetting {
    EncoderSetting {
        payload_type: "PT_JPEG".to_string(),
        mode: "MJPEG".to_string(),
        max_group_of_pictures: 1,
        max_qp: 38,
        ..h264_encoder(channel, device)
    }
}

pub fn stream(name: &str, group: GroupId, encoders: Vec<EncoderSetting>) -> StreamSettings {
    StreamSettings {
        name: name.to_string(),
        enabled: true,
        pic_width: 640,
        pic_height: 360,
        frame_rate_numerator: 25,
        frame_rate_denominator: 1,
        crop_enable: false,
        crop_top: 0,
        crop_left: 0,
        crop_width: 0,
        crop_height: 0,
        scaling_enable: false,
        scaling_width: 0,
        scaling_height: 0,
        group,
        statistics_interval: None,
        max_bitrate: 500,
        change_pos: 50,
        encoders,
    }
}

/// Short timeouts and no pacing, so tests run in milliseconds.
pub fn fast_runtime() -> RuntimeSettings {
    RuntimeSettings {
        poll_timeout_ms: 10,
        warmup_ms: 0,
        pacing: false,
        audio: false,
        ..RuntimeSettings::default()
    }
}

pub fn settings(streams: Vec<StreamSettings>) -> Settings {
    Settings {
        stream_settings: streams,
        runtime: fast_runtime(),
    }
}
