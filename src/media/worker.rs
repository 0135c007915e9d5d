use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use capture_bus::{
    attr::{ChannelId, GroupId},
    packet::PollStatus,
    platform::{Cell, Platform},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{EncoderSetting, StreamSettings},
    error::WorkerFailure,
    media::{
        fps::{FpsMeter, Pacer},
        frame::reassemble,
        gate::ActivationGate,
        sink::{FrameSink, SinkFactory, SinkSpec},
        types::{WorkerReport, WorkerState},
    },
};

/// Timing knobs of a drain loop.
#[derive(Clone, Debug)]
pub struct WorkerTuning {
    pub poll_timeout: Duration,
    pub warmup: Duration,
    pub fps_window: u32,
    pub pacing: bool,
}

/// Everything a worker shares with its siblings.
#[derive(Clone)]
pub struct WorkerShared {
    pub platform: Arc<dyn Platform>,
    pub gate: Arc<ActivationGate>,
    pub sinks: Arc<dyn SinkFactory>,
    pub shutdown: CancellationToken,
}

/// Platform resources acquired during setup, released in reverse order.
#[derive(Default)]
struct Acquired {
    created: bool,
    registered: bool,
    bound: bool,
    receiving: bool,
}

/// One encoder channel: binds it to its capture group, activates the group,
/// then drains completed streams into the sink until shutdown.
pub struct Worker {
    stream: Arc<StreamSettings>,
    encoder: EncoderSetting,
    tuning: WorkerTuning,
    shared: WorkerShared,
    state: WorkerState,
    acquired: Acquired,
    frames: u64,
    bytes: u64,
    timeouts: u64,
    fps_samples: u64,
}

impl Worker {
    pub fn new(
        stream: Arc<StreamSettings>,
        encoder: EncoderSetting,
        tuning: WorkerTuning,
        shared: WorkerShared,
    ) -> Self {
        Self {
            stream,
            encoder,
            tuning,
            shared,
            state: WorkerState::Starting,
            acquired: Acquired::default(),
            frames: 0,
            bytes: 0,
            timeouts: 0,
            fps_samples: 0,
        }
    }

    fn group(&self) -> GroupId {
        self.stream.group
    }

    fn channel(&self) -> ChannelId {
        self.encoder.channel
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<WorkerReport>> {
        std::thread::Builder::new()
            .name(format!("enc-{}", self.channel()))
            .spawn(move || self.run())
    }

    pub fn run(mut self) -> WorkerReport {
        log::info!(
            "stream {} group {} channel {}: starting ({} -> {})",
            self.stream.name,
            self.group(),
            self.channel(),
            self.encoder.payload_type,
            self.encoder.v4l2_device_path
        );

        let result = match self.setup() {
            Ok(mut sink) => {
                self.state = WorkerState::Streaming;
                let result = self.drain(sink.as_mut()).map_err(WorkerFailure::Stream);
                if let Err(e) = &result {
                    log::error!(
                        "stream {} channel {}: {}",
                        self.stream.name,
                        self.channel(),
                        e
                    );
                }
                self.state = WorkerState::Draining;
                result
            }
            Err(e) => {
                let failure = WorkerFailure::Setup(e);
                log::error!(
                    "stream {} group {} channel {}: {}",
                    self.stream.name,
                    self.group(),
                    self.channel(),
                    failure
                );
                Err(failure)
            }
        };

        self.teardown();
        let reached = self.state;
        self.state = WorkerState::Stopped;
        log::info!(
            "stream {} channel {}: stopped after {} frames",
            self.stream.name,
            self.channel(),
            self.frames
        );

        WorkerReport {
            stream: self.stream.name.clone(),
            group: self.group(),
            channel: self.channel(),
            reached,
            frames: self.frames,
            bytes: self.bytes,
            timeouts: self.timeouts,
            fps_samples: self.fps_samples,
            result,
        }
    }

    fn setup(&mut self) -> anyhow::Result<Box<dyn FrameSink>> {
        let platform = Arc::clone(&self.shared.platform);
        let (group, channel) = (self.group(), self.channel());

        let attr = self.stream.encoder_attr(&self.encoder)?;

        let source = platform
            .source_attr(group)
            .with_context(|| format!("read frame source {} attributes", group))?;
        log::info!("group {} frame source: {}", group, source);

        let sink = self
            .shared
            .sinks
            .open(&SinkSpec {
                path: self.encoder.v4l2_device_path.clone(),
                payload: attr.enc.payload,
                width: attr.enc.pic_width,
                height: attr.enc.pic_height,
            })
            .with_context(|| format!("open sink {}", self.encoder.v4l2_device_path))?;

        platform
            .create_channel(channel, &attr)
            .with_context(|| format!("create encoder channel {}", channel))?;
        self.acquired.created = true;

        platform
            .register_channel(group, channel)
            .with_context(|| format!("register channel {} to group {}", channel, group))?;
        self.acquired.registered = true;

        let (src, dst) = (Cell::frame_source(group), Cell::encoder(group, channel));
        platform
            .bind(src, dst)
            .with_context(|| format!("bind {} -> {}", src, dst))?;
        self.acquired.bound = true;

        self.shared
            .gate
            .activate(group, || platform.enable_source(group))
            .with_context(|| format!("enable frame source {}", group))?;

        if !self.tuning.warmup.is_zero() {
            std::thread::sleep(self.tuning.warmup);
        }

        platform
            .start_recv_pic(channel)
            .with_context(|| format!("start receiving pictures on channel {}", channel))?;
        self.acquired.receiving = true;

        Ok(sink)
    }

    fn drain(&mut self, sink: &mut dyn FrameSink) -> anyhow::Result<()> {
        let platform = Arc::clone(&self.shared.platform);
        let channel = self.channel();
        let mut fps = FpsMeter::new(self.tuning.fps_window, Instant::now());
        // Paced at the capture rate.
        let mut pacer = Pacer::new(if self.tuning.pacing {
            self.stream.frame_rate().frame_interval()
        } else {
            None
        });

        while !self.shared.shutdown.is_cancelled() {
            let status = platform
                .poll_stream(channel, self.tuning.poll_timeout)
                .with_context(|| format!("poll channel {}", channel))?;
            if status == PollStatus::Timeout {
                self.timeouts += 1;
                log::debug!("channel {}: poll timed out, retrying", channel);
                continue;
            }

            let stream = platform
                .get_stream(channel, true)
                .with_context(|| format!("get stream from channel {}", channel))?;
            log::trace!(
                "channel {}: stream {} with {} packs",
                channel,
                stream.seq(),
                stream.pack_count()
            );
            let frame = reassemble(&stream);
            let written = sink.write_frame(&frame);
            let released = platform
                .release_stream(channel, stream)
                .with_context(|| format!("release stream on channel {}", channel));
            if let Err(e) = written {
                if let Err(release) = released {
                    log::error!("channel {}: {:#}", channel, release);
                }
                return Err(e);
            }
            released?;

            self.frames += 1;
            self.bytes += frame.len() as u64;
            if let Some(sample) = fps.record(Instant::now()) {
                self.fps_samples += 1;
                log::info!(
                    "stream {} channel {}: {:.2} fps ({} frames in {:.3}s)",
                    self.stream.name,
                    channel,
                    sample.fps,
                    sample.frames,
                    sample.elapsed.as_secs_f64()
                );
            }
            pacer.pause();
        }
        Ok(())
    }

    fn teardown(&mut self) {
        let platform = Arc::clone(&self.shared.platform);
        let (group, channel) = (self.group(), self.channel());

        if std::mem::take(&mut self.acquired.receiving) {
            if let Err(e) = platform.stop_recv_pic(channel) {
                log::warn!("channel {}: stop receiving pictures: {:#}", channel, e);
            }
        }
        if std::mem::take(&mut self.acquired.bound) {
            if let Err(e) = platform.unbind(Cell::frame_source(group), Cell::encoder(group, channel)) {
                log::warn!("channel {}: unbind from group {}: {:#}", channel, group, e);
            }
        }
        if std::mem::take(&mut self.acquired.registered) {
            if let Err(e) = platform.unregister_channel(channel) {
                log::warn!("channel {}: unregister: {:#}", channel, e);
            }
        }
        if std::mem::take(&mut self.acquired.created) {
            if let Err(e) = platform.destroy_channel(channel) {
                log::warn!("channel {}: destroy: {:#}", channel, e);
            }
        }
    }
}

#[cfg(test)]
#[path = "worker_test.rs"]
mod worker_test;
