use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use anyhow::Context;
use capture_bus::{attr::GroupId, platform::Platform};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{RuntimeSettings, Settings, StreamSettings},
    error::WorkerFailure,
    media::{
        gate::ActivationGate,
        sink::SinkFactory,
        types::{WorkerReport, WorkerState},
        worker::{Worker, WorkerShared, WorkerTuning},
    },
};

struct Spawned {
    stream: String,
    group: GroupId,
    channel: u32,
    handle: JoinHandle<WorkerReport>,
}

/// Pipeline: one worker thread per enabled encoder channel.
pub struct Pipe {
    platform: Arc<dyn Platform>,
    sinks: Arc<dyn SinkFactory>,
    gate: Arc<ActivationGate>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Pipe {
    pub fn new(
        platform: Arc<dyn Platform>,
        sinks: Arc<dyn SinkFactory>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            platform,
            sinks,
            gate: Arc::new(ActivationGate::new()),
            cancel,
            started: AtomicBool::new(false),
        }
    }

    /// Starts every valid enabled stream and blocks until all workers have
    /// stopped, then tears the capture groups down. Invalid streams and
    /// streams whose capture group cannot be created are skipped.
    pub fn run(&self, settings: &Settings) -> Vec<WorkerReport> {
        if self.started.swap(true, Ordering::Relaxed) {
            log::warn!("Pipe already started");
            return Vec::new();
        }

        let (streams, errors) = settings.validate();
        for e in &errors {
            log::error!("Pipe: stream rejected: {}", e);
        }

        let shared = WorkerShared {
            platform: Arc::clone(&self.platform),
            gate: Arc::clone(&self.gate),
            sinks: Arc::clone(&self.sinks),
            shutdown: self.cancel.clone(),
        };

        let mut reports = Vec::new();
        let mut spawned = Vec::new();
        let mut prepared = Vec::new();
        for stream in streams {
            if let Err(e) = self.prepare(&stream) {
                log::error!(
                    "Pipe: stream {} group {}: {:#}, skipping its encoders",
                    stream.name,
                    stream.group,
                    e
                );
                continue;
            }
            prepared.push(stream.group);

            let tuning = tuning(&settings.runtime, &stream);
            let stream = Arc::new(stream);
            for encoder in &stream.encoders {
                let channel = encoder.channel;
                let worker = Worker::new(
                    Arc::clone(&stream),
                    encoder.clone(),
                    tuning.clone(),
                    shared.clone(),
                );
                match worker.spawn() {
                    Ok(handle) => spawned.push(Spawned {
                        stream: stream.name.clone(),
                        group: stream.group,
                        channel,
                        handle,
                    }),
                    Err(e) => {
                        log::error!(
                            "Pipe: stream {} channel {}: spawn worker: {}",
                            stream.name,
                            channel,
                            e
                        );
                        reports.push(WorkerReport {
                            stream: stream.name.clone(),
                            group: stream.group,
                            channel,
                            reached: WorkerState::Starting,
                            frames: 0,
                            bytes: 0,
                            timeouts: 0,
                            fps_samples: 0,
                            result: Err(WorkerFailure::Setup(e.into())),
                        });
                    }
                }
            }
        }

        log::info!("Pipe: {} workers running", spawned.len());
        for worker in spawned {
            match worker.handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => {
                    log::error!(
                        "Pipe: stream {} channel {}: worker panicked",
                        worker.stream,
                        worker.channel
                    );
                    reports.push(WorkerReport {
                        stream: worker.stream,
                        group: worker.group,
                        channel: worker.channel,
                        reached: WorkerState::Stopped,
                        frames: 0,
                        bytes: 0,
                        timeouts: 0,
                        fps_samples: 0,
                        result: Err(WorkerFailure::Stream(anyhow::anyhow!("worker panicked"))),
                    });
                }
            }
        }

        for group in prepared {
            self.release(group);
        }

        for report in &reports {
            if report.is_ok() {
                log::info!("Pipe: {}", report);
            } else {
                log::warn!("Pipe: {}", report);
            }
        }
        let setup_failures = reports
            .iter()
            .filter(|r| matches!(&r.result, Err(e) if e.is_setup()))
            .count();
        log::info!(
            "Pipe: {} workers stopped, {} failed during setup",
            reports.len(),
            setup_failures
        );

        self.started.store(false, Ordering::Relaxed);
        reports
    }

    /// Creates the capture group and its encoder group, once per stream.
    fn prepare(&self, stream: &StreamSettings) -> anyhow::Result<()> {
        let group = stream.group;
        let attr = stream.source_attr();
        self.platform
            .create_source(group, &attr)
            .with_context(|| format!("create frame source {}", group))?;

        let configured = self
            .platform
            .set_source_attr(group, &attr)
            .with_context(|| format!("set frame source {} attributes", group))
            .and_then(|()| {
                self.platform
                    .create_group(group)
                    .with_context(|| format!("create encoder group {}", group))
            });
        if let Err(e) = configured {
            if let Err(e) = self.platform.destroy_source(group) {
                log::warn!("Pipe: destroy frame source {}: {:#}", group, e);
            }
            return Err(e);
        }
        Ok(())
    }

    fn release(&self, group: GroupId) {
        if self.gate.is_active(group) {
            if let Err(e) = self.platform.disable_source(group) {
                log::warn!("Pipe: disable frame source {}: {:#}", group, e);
            }
        }
        if let Err(e) = self.platform.destroy_group(group) {
            log::warn!("Pipe: destroy encoder group {}: {:#}", group, e);
        }
        if let Err(e) = self.platform.destroy_source(group) {
            log::warn!("Pipe: destroy frame source {}: {:#}", group, e);
        }
    }
}

fn tuning(runtime: &RuntimeSettings, stream: &StreamSettings) -> WorkerTuning {
    WorkerTuning {
        poll_timeout: runtime.poll_timeout(),
        warmup: runtime.warmup(),
        fps_window: stream.fps_window(runtime),
        pacing: runtime.pacing,
    }
}

#[cfg(test)]
#[path = "pipe_test.rs"]
mod pipe_test;
