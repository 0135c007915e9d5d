//! Software implementation of the platform contract.
//!
//! Frame sources generate an NV12 test pattern at the configured rate,
//! sampled from the crop window and resized to the scaler size; H.264
//! channels encode through FFmpeg and split each access unit into its NAL
//! units, JPEG channels produce one baseline JPEG per picture. The call
//! sequencing rules (create before register, bind before receive, enable a
//! source once) are enforced the way a hardware SDK would enforce them: by
//! failing the call.

pub mod encoder;
pub mod source;

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc::sync_channel},
    time::Duration,
};

use crate::{
    attr::{ChannelId, EncoderChnAttr, FrameSourceAttr, GroupId},
    audio::{AudioChnParam, AudioInput, AudioIoAttr, PcmAccess, PcmFormat, PcmLoopback, PcmParams},
    isp::{Isp, SensorInfo, WdrMode},
    packet::{EncodedStream, PollStatus},
    platform::{Cell, DeviceId, EncoderSystem, FrameSource},
    soft::{
        encoder::{ChannelTask, SoftCodec, StreamQueue},
        source::{SourceTask, Subscribers},
    },
};

/// Completed streams kept per channel before the oldest is dropped.
const STREAM_SLOTS: usize = 4;

struct SourceEntry {
    attr: FrameSourceAttr,
    subscribers: Subscribers,
    task: Option<SourceTask>,
}

struct ChannelEntry {
    attr: EncoderChnAttr,
    group: Option<GroupId>,
    queue: Arc<StreamQueue>,
    task: Option<ChannelTask>,
}

#[derive(Default)]
struct VideoState {
    sources: HashMap<GroupId, SourceEntry>,
    groups: HashSet<GroupId>,
    channels: HashMap<ChannelId, ChannelEntry>,
    binds: HashSet<(Cell, Cell)>,
}

#[derive(Default)]
struct IspState {
    opened: bool,
    sensor: Option<SensorInfo>,
    sensor_enabled: bool,
    system_ready: bool,
    tuning: bool,
    wdr: Option<WdrMode>,
}

#[derive(Default)]
struct AudioState {
    attrs: HashMap<u32, AudioIoAttr>,
    enabled: HashSet<u32>,
    channels: HashMap<(u32, u32), (AudioChnParam, bool, i32)>,
}

#[derive(Default)]
struct PcmState {
    name: Option<String>,
    params: PcmParams,
    applied: bool,
}

#[derive(Default)]
pub struct SoftPlatform {
    video: Mutex<VideoState>,
    isp: Mutex<IspState>,
    audio: Mutex<AudioState>,
    pcm: Mutex<PcmState>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SoftPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, channel: ChannelId) -> anyhow::Result<Arc<StreamQueue>> {
        let video = lock(&self.video);
        video
            .channels
            .get(&channel)
            .map(|c| Arc::clone(&c.queue))
            .ok_or_else(|| anyhow::anyhow!("encoder channel {} not created", channel))
    }
}

impl FrameSource for SoftPlatform {
    fn create_source(&self, group: GroupId, attr: &FrameSourceAttr) -> anyhow::Result<()> {
        let mut video = lock(&self.video);
        if video.sources.contains_key(&group) {
            anyhow::bail!("frame source {} already exists", group);
        }
        video.sources.insert(
            group,
            SourceEntry {
                attr: attr.clone(),
                subscribers: Arc::new(Mutex::new(Vec::new())),
                task: None,
            },
        );
        log::debug!("frame source {} created: {}", group, attr);
        Ok(())
    }

    fn set_source_attr(&self, group: GroupId, attr: &FrameSourceAttr) -> anyhow::Result<()> {
        let mut video = lock(&self.video);
        let source = video
            .sources
            .get_mut(&group)
            .ok_or_else(|| anyhow::anyhow!("frame source {} not created", group))?;
        if source.task.is_some() {
            anyhow::bail!("frame source {} is enabled, attributes are locked", group);
        }
        source.attr = attr.clone();
        Ok(())
    }

    fn source_attr(&self, group: GroupId) -> anyhow::Result<FrameSourceAttr> {
        let video = lock(&self.video);
        video
            .sources
            .get(&group)
            .map(|s| s.attr.clone())
            .ok_or_else(|| anyhow::anyhow!("frame source {} not created", group))
    }

    fn enable_source(&self, group: GroupId) -> anyhow::Result<()> {
        let mut video = lock(&self.video);
        let source = video
            .sources
            .get_mut(&group)
            .ok_or_else(|| anyhow::anyhow!("frame source {} not created", group))?;
        if source.task.is_some() {
            anyhow::bail!("frame source {} already enabled", group);
        }
        let task = SourceTask::start(group, &source.attr, Arc::clone(&source.subscribers))?;
        source.task = Some(task);
        Ok(())
    }

    fn disable_source(&self, group: GroupId) -> anyhow::Result<()> {
        let task = {
            let mut video = lock(&self.video);
            let source = video
                .sources
                .get_mut(&group)
                .ok_or_else(|| anyhow::anyhow!("frame source {} not created", group))?;
            source
                .task
                .take()
                .ok_or_else(|| anyhow::anyhow!("frame source {} not enabled", group))?
        };
        drop(task);
        Ok(())
    }

    fn destroy_source(&self, group: GroupId) -> anyhow::Result<()> {
        let mut video = lock(&self.video);
        match video.sources.get(&group) {
            None => anyhow::bail!("frame source {} not created", group),
            Some(s) if s.task.is_some() => {
                anyhow::bail!("frame source {} still enabled", group)
            }
            Some(_) => {
                video.sources.remove(&group);
                Ok(())
            }
        }
    }
}

impl EncoderSystem for SoftPlatform {
    fn create_group(&self, group: GroupId) -> anyhow::Result<()> {
        let mut video = lock(&self.video);
        if !video.groups.insert(group) {
            anyhow::bail!("encoder group {} already exists", group);
        }
        Ok(())
    }

    fn destroy_group(&self, group: GroupId) -> anyhow::Result<()> {
        let mut video = lock(&self.video);
        if video.channels.values().any(|c| c.group == Some(group)) {
            anyhow::bail!("encoder group {} still has registered channels", group);
        }
        if !video.groups.remove(&group) {
            anyhow::bail!("encoder group {} not created", group);
        }
        Ok(())
    }

    fn create_channel(&self, channel: ChannelId, attr: &EncoderChnAttr) -> anyhow::Result<()> {
        let (w, h) = (attr.enc.pic_width, attr.enc.pic_height);
        if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
            anyhow::bail!("channel {}: invalid picture size {}x{}", channel, w, h);
        }
        if attr.rc.frame_rate.frame_interval().is_none() {
            anyhow::bail!("channel {}: invalid frame rate {}", channel, attr.rc.frame_rate);
        }
        if attr.rc.min_qp > attr.rc.max_qp {
            anyhow::bail!(
                "channel {}: min_qp {} above max_qp {}",
                channel,
                attr.rc.min_qp,
                attr.rc.max_qp
            );
        }

        let mut video = lock(&self.video);
        if video.channels.contains_key(&channel) {
            anyhow::bail!("encoder channel {} already exists", channel);
        }
        video.channels.insert(
            channel,
            ChannelEntry {
                attr: attr.clone(),
                group: None,
                queue: Arc::new(StreamQueue::new(channel, STREAM_SLOTS)),
                task: None,
            },
        );
        Ok(())
    }

    fn destroy_channel(&self, channel: ChannelId) -> anyhow::Result<()> {
        let mut video = lock(&self.video);
        match video.channels.get(&channel) {
            None => anyhow::bail!("encoder channel {} not created", channel),
            Some(c) if c.group.is_some() => {
                anyhow::bail!("encoder channel {} still registered", channel)
            }
            Some(_) => {
                video.channels.remove(&channel);
                Ok(())
            }
        }
    }

    fn register_channel(&self, group: GroupId, channel: ChannelId) -> anyhow::Result<()> {
        let mut video = lock(&self.video);
        if !video.groups.contains(&group) {
            anyhow::bail!("encoder group {} not created", group);
        }
        let entry = video
            .channels
            .get_mut(&channel)
            .ok_or_else(|| anyhow::anyhow!("encoder channel {} not created", channel))?;
        if let Some(existing) = entry.group {
            anyhow::bail!("encoder channel {} already registered to group {}", channel, existing);
        }
        entry.group = Some(group);
        Ok(())
    }

    fn unregister_channel(&self, channel: ChannelId) -> anyhow::Result<()> {
        let mut video = lock(&self.video);
        let entry = video
            .channels
            .get_mut(&channel)
            .ok_or_else(|| anyhow::anyhow!("encoder channel {} not created", channel))?;
        if entry.task.is_some() {
            anyhow::bail!("encoder channel {} still receiving", channel);
        }
        entry
            .group
            .take()
            .map(|_| ())
            .ok_or_else(|| anyhow::anyhow!("encoder channel {} not registered", channel))
    }

    fn bind(&self, source: Cell, sink: Cell) -> anyhow::Result<()> {
        if source.device != DeviceId::FrameSource || sink.device != DeviceId::Encoder {
            anyhow::bail!("unsupported binding {} -> {}", source, sink);
        }
        let mut video = lock(&self.video);
        if !video.sources.contains_key(&source.group) {
            anyhow::bail!("frame source {} not created", source.group);
        }
        if !video.groups.contains(&sink.group) {
            anyhow::bail!("encoder group {} not created", sink.group);
        }
        if !video.binds.insert((source, sink)) {
            anyhow::bail!("{} already bound to {}", source, sink);
        }
        log::debug!("bound {} -> {}", source, sink);
        Ok(())
    }

    fn unbind(&self, source: Cell, sink: Cell) -> anyhow::Result<()> {
        let mut video = lock(&self.video);
        if !video.binds.remove(&(source, sink)) {
            anyhow::bail!("{} not bound to {}", source, sink);
        }
        Ok(())
    }

    fn start_recv_pic(&self, channel: ChannelId) -> anyhow::Result<()> {
        let mut video = lock(&self.video);
        let (group, attr) = {
            let entry = video
                .channels
                .get(&channel)
                .ok_or_else(|| anyhow::anyhow!("encoder channel {} not created", channel))?;
            if entry.task.is_some() {
                anyhow::bail!("encoder channel {} already receiving", channel);
            }
            let group = entry
                .group
                .ok_or_else(|| anyhow::anyhow!("encoder channel {} not registered", channel))?;
            (group, entry.attr.clone())
        };

        if !video
            .binds
            .iter()
            .any(|(src, dst)| src.group == group && dst.group == group)
        {
            anyhow::bail!("encoder group {} is not bound to a frame source", group);
        }

        let source = video
            .sources
            .get(&group)
            .ok_or_else(|| anyhow::anyhow!("frame source {} not created", group))?;
        let (w, h) = source.attr.output_size();
        if (w, h) != (attr.enc.pic_width, attr.enc.pic_height) {
            anyhow::bail!(
                "encoder channel {} expects {}x{} but frame source {} outputs {}x{}",
                channel,
                attr.enc.pic_width,
                attr.enc.pic_height,
                group,
                w,
                h
            );
        }
        let (tx, rx) = sync_channel(source.attr.buffers.max(1) as usize);
        let subscribers = Arc::clone(&source.subscribers);

        let codec = SoftCodec::new(&attr)?;
        let entry = video
            .channels
            .get_mut(&channel)
            .ok_or_else(|| anyhow::anyhow!("encoder channel {} not created", channel))?;
        entry.queue.open();
        entry.task = Some(ChannelTask::start(
            channel,
            codec,
            rx,
            Arc::clone(&entry.queue),
        )?);
        lock(subscribers.as_ref()).push((channel, tx));
        Ok(())
    }

    fn stop_recv_pic(&self, channel: ChannelId) -> anyhow::Result<()> {
        let (task, queue, subscribers) = {
            let mut video = lock(&self.video);
            let entry = video
                .channels
                .get_mut(&channel)
                .ok_or_else(|| anyhow::anyhow!("encoder channel {} not created", channel))?;
            let task = entry
                .task
                .take()
                .ok_or_else(|| anyhow::anyhow!("encoder channel {} not receiving", channel))?;
            let queue = Arc::clone(&entry.queue);
            let subscribers = entry
                .group
                .and_then(|g| video.sources.get(&g))
                .map(|s| Arc::clone(&s.subscribers));
            (task, queue, subscribers)
        };
        if let Some(subscribers) = subscribers {
            lock(subscribers.as_ref()).retain(|(c, _)| *c != channel);
        }
        queue.close();
        drop(task);
        Ok(())
    }

    fn poll_stream(&self, channel: ChannelId, timeout: Duration) -> anyhow::Result<PollStatus> {
        Ok(self.queue(channel)?.poll(timeout))
    }

    fn get_stream(&self, channel: ChannelId, block: bool) -> anyhow::Result<EncodedStream> {
        self.queue(channel)?.take(block)
    }

    fn release_stream(&self, channel: ChannelId, stream: EncodedStream) -> anyhow::Result<()> {
        self.queue(channel)?.release(stream)
    }
}

impl Isp for SoftPlatform {
    fn open(&self) -> anyhow::Result<()> {
        let mut isp = lock(&self.isp);
        if isp.opened {
            anyhow::bail!("ISP already open");
        }
        isp.opened = true;
        Ok(())
    }

    fn add_sensor(&self, info: &SensorInfo) -> anyhow::Result<()> {
        let mut isp = lock(&self.isp);
        if !isp.opened {
            anyhow::bail!("ISP not open");
        }
        if let Some(existing) = &isp.sensor {
            anyhow::bail!("sensor {} already registered", existing.name);
        }
        isp.sensor = Some(info.clone());
        Ok(())
    }

    fn enable_sensor(&self) -> anyhow::Result<()> {
        let mut isp = lock(&self.isp);
        if isp.sensor.is_none() {
            anyhow::bail!("no sensor registered");
        }
        isp.sensor_enabled = true;
        Ok(())
    }

    fn system_init(&self) -> anyhow::Result<()> {
        let mut isp = lock(&self.isp);
        if !isp.sensor_enabled {
            anyhow::bail!("sensor not enabled");
        }
        isp.system_ready = true;
        Ok(())
    }

    fn enable_tuning(&self) -> anyhow::Result<()> {
        let mut isp = lock(&self.isp);
        if !isp.system_ready {
            anyhow::bail!("system not initialized");
        }
        isp.tuning = true;
        Ok(())
    }

    fn set_wdr_mode(&self, mode: WdrMode) -> anyhow::Result<()> {
        let mut isp = lock(&self.isp);
        if !isp.tuning {
            anyhow::bail!("tuning not enabled");
        }
        isp.wdr = Some(mode);
        Ok(())
    }

    fn system_exit(&self) -> anyhow::Result<()> {
        let mut isp = lock(&self.isp);
        isp.system_ready = false;
        Ok(())
    }

    fn disable_sensor(&self) -> anyhow::Result<()> {
        let mut isp = lock(&self.isp);
        if !isp.sensor_enabled {
            anyhow::bail!("sensor not enabled");
        }
        isp.sensor_enabled = false;
        Ok(())
    }

    fn del_sensor(&self, info: &SensorInfo) -> anyhow::Result<()> {
        let mut isp = lock(&self.isp);
        match &isp.sensor {
            Some(s) if s.name == info.name => {
                isp.sensor = None;
                Ok(())
            }
            _ => anyhow::bail!("sensor {} not registered", info.name),
        }
    }

    fn disable_tuning(&self) -> anyhow::Result<()> {
        let mut isp = lock(&self.isp);
        if !isp.tuning {
            anyhow::bail!("tuning not enabled");
        }
        isp.tuning = false;
        isp.wdr = None;
        Ok(())
    }

    fn close(&self) -> anyhow::Result<()> {
        let mut isp = lock(&self.isp);
        if !isp.opened {
            anyhow::bail!("ISP not open");
        }
        *isp = IspState::default();
        Ok(())
    }
}

impl AudioInput for SoftPlatform {
    fn set_pub_attr(&self, device: u32, attr: &AudioIoAttr) -> anyhow::Result<()> {
        if attr.frame_num > 50 {
            anyhow::bail!("audio device {}: at most 50 cached frames", device);
        }
        lock(&self.audio).attrs.insert(device, attr.clone());
        Ok(())
    }

    fn enable_device(&self, device: u32) -> anyhow::Result<()> {
        let mut audio = lock(&self.audio);
        if !audio.attrs.contains_key(&device) {
            anyhow::bail!("audio device {}: attributes not set", device);
        }
        audio.enabled.insert(device);
        Ok(())
    }

    fn set_chn_param(
        &self,
        device: u32,
        channel: u32,
        param: &AudioChnParam,
    ) -> anyhow::Result<()> {
        let mut audio = lock(&self.audio);
        if !audio.enabled.contains(&device) {
            anyhow::bail!("audio device {} not enabled", device);
        }
        audio
            .channels
            .insert((device, channel), (param.clone(), false, 0));
        Ok(())
    }

    fn enable_chn(&self, device: u32, channel: u32) -> anyhow::Result<()> {
        let mut audio = lock(&self.audio);
        let entry = audio
            .channels
            .get_mut(&(device, channel))
            .ok_or_else(|| anyhow::anyhow!("audio channel {}/{} not configured", device, channel))?;
        entry.1 = true;
        Ok(())
    }

    fn set_volume(&self, device: u32, channel: u32, volume: i32) -> anyhow::Result<()> {
        if !(-30..=120).contains(&volume) {
            anyhow::bail!("audio volume {} out of range", volume);
        }
        let mut audio = lock(&self.audio);
        let entry = audio
            .channels
            .get_mut(&(device, channel))
            .filter(|e| e.1)
            .ok_or_else(|| anyhow::anyhow!("audio channel {}/{} not enabled", device, channel))?;
        entry.2 = volume;
        Ok(())
    }

    fn disable_chn(&self, device: u32, channel: u32) -> anyhow::Result<()> {
        let mut audio = lock(&self.audio);
        audio
            .channels
            .remove(&(device, channel))
            .map(|_| ())
            .ok_or_else(|| anyhow::anyhow!("audio channel {}/{} not configured", device, channel))
    }

    fn disable_device(&self, device: u32) -> anyhow::Result<()> {
        let mut audio = lock(&self.audio);
        if !audio.enabled.remove(&device) {
            anyhow::bail!("audio device {} not enabled", device);
        }
        Ok(())
    }
}

impl PcmLoopback for SoftPlatform {
    fn pcm_open(&self, name: &str) -> anyhow::Result<()> {
        let mut pcm = lock(&self.pcm);
        if let Some(open) = &pcm.name {
            anyhow::bail!("PCM device {} already open", open);
        }
        *pcm = PcmState {
            name: Some(name.to_string()),
            ..Default::default()
        };
        Ok(())
    }

    fn pcm_set_access(&self, access: PcmAccess) -> anyhow::Result<()> {
        let mut pcm = lock(&self.pcm);
        if pcm.name.is_none() {
            anyhow::bail!("PCM device not open");
        }
        pcm.params.access = Some(access);
        Ok(())
    }

    fn pcm_set_format(&self, format: PcmFormat) -> anyhow::Result<()> {
        let mut pcm = lock(&self.pcm);
        if pcm.name.is_none() {
            anyhow::bail!("PCM device not open");
        }
        pcm.params.format = Some(format);
        Ok(())
    }

    fn pcm_set_channels(&self, channels: u32) -> anyhow::Result<()> {
        let mut pcm = lock(&self.pcm);
        if pcm.name.is_none() {
            anyhow::bail!("PCM device not open");
        }
        if channels == 0 || channels > 2 {
            anyhow::bail!("PCM device supports 1 or 2 channels, got {}", channels);
        }
        pcm.params.channels = Some(channels);
        Ok(())
    }

    fn pcm_set_rate_near(&self, rate: u32) -> anyhow::Result<u32> {
        let mut pcm = lock(&self.pcm);
        if pcm.name.is_none() {
            anyhow::bail!("PCM device not open");
        }
        let chosen = rate.clamp(8000, 192_000);
        pcm.params.rate = Some(chosen);
        Ok(chosen)
    }

    fn pcm_apply(&self) -> anyhow::Result<PcmParams> {
        let mut pcm = lock(&self.pcm);
        let p = &pcm.params;
        if p.access.is_none() || p.format.is_none() || p.channels.is_none() || p.rate.is_none() {
            anyhow::bail!("PCM hardware parameters incomplete: {:?}", p);
        }
        pcm.applied = true;
        Ok(pcm.params.clone())
    }

    fn pcm_close(&self) -> anyhow::Result<()> {
        let mut pcm = lock(&self.pcm);
        if pcm.name.take().is_none() {
            anyhow::bail!("PCM device not open");
        }
        *pcm = PcmState::default();
        Ok(())
    }
}
