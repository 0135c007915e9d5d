use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use capture_bus::{isp::SensorInfo, platform::Platform, soft::SoftPlatform};
use clap::Parser;
use log::LevelFilter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod audio;
mod config;
mod error;
mod media;
mod sensor;

use media::{pipe::Pipe, sink::V4l2SinkFactory};

/// Streams encoded camera channels into V4L2 output devices.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Stream configuration (JSON)
    config: PathBuf,

    /// Log level, overridden per module by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Skip audio input and PCM loopback setup
    #[arg(long)]
    no_audio: bool,

    /// Sensor name; skips reading the sensor info file
    #[arg(long)]
    sensor: Option<String>,
}

fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .filter_module("capture_bus", level)
        .filter_module("ffmpeg_next", LevelFilter::Warn)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ! {
    let args = Args::parse();
    init_logging(args.log_level);

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<()> {
    let settings = config::Settings::load(&args.config)
        .with_context(|| format!("load {}", args.config.display()))?;
    capture_bus::init()?;

    let platform: Arc<dyn Platform> = Arc::new(SoftPlatform::new());

    let sensor_info = match &args.sensor {
        Some(name) => SensorInfo::i2c(name, sensor::SENSOR_I2C_ADDR),
        None => sensor::read_sensor_info(&settings.runtime.sensor_info_path)?,
    };
    sensor::bring_up(platform.as_ref(), &sensor_info)?;

    let cancel = CancellationToken::new();

    let audio = if settings.runtime.audio && !args.no_audio {
        let platform = Arc::clone(&platform);
        Some(tokio::task::spawn_blocking(move || {
            match audio::bring_up(platform.as_ref()) {
                Ok(_) => true,
                Err(e) => {
                    log::error!("audio setup failed, continuing without audio: {:#}", e);
                    false
                }
            }
        }))
    } else {
        None
    };

    let pipe = Pipe::new(
        Arc::clone(&platform),
        Arc::new(V4l2SinkFactory),
        cancel.clone(),
    );
    let pipeline = tokio::task::spawn_blocking(move || pipe.run(&settings));

    let reports = supervise(pipeline, &cancel, tokio::signal::ctrl_c).await;

    if let Some(audio) = audio {
        if audio.await.unwrap_or(false) {
            audio::tear_down(platform.as_ref());
        }
    }
    sensor::tear_down(platform.as_ref(), &sensor_info);

    let reports = reports?;
    if reports.is_empty() {
        anyhow::bail!("no encoder channel was started");
    }
    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    log::info!(
        "{} of {} encoder channels stopped cleanly",
        reports.len() - failed,
        reports.len()
    );
    Ok(())
}

/// Waits for the pipeline, cancelling it on every interrupt signal. A failing
/// signal listener is dropped instead of retried.
async fn supervise<T, F, Fut>(
    mut pipeline: JoinHandle<T>,
    cancel: &CancellationToken,
    mut signal: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    loop {
        tokio::select! {
            result = &mut pipeline => {
                return result.context("pipeline task");
            },
            received = signal() => {
                if let Err(e) = received {
                    log::error!("listen for ctrl-c, shutdown by signal disabled: {}", e);
                    return (&mut pipeline).await.context("pipeline task");
                }
                if !cancel.is_cancelled() {
                    log::info!("shutdown requested");
                }
                cancel.cancel();
            },
        }
    }
}
