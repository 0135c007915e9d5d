//! Output sinks for reassembled access units.
//!
//! The production sink is a V4L2 output device (typically a v4l2loopback
//! node): the format is set once with `VIDIOC_S_FMT`, streaming is switched
//! on, and each access unit is handed over with a single `write`.

use std::io::Write;

use capture_bus::attr::PayloadType;

/// Where and what a worker writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkSpec {
    pub path: String,
    pub payload: PayloadType,
    pub width: u32,
    pub height: u32,
}

pub trait FrameSink: Send {
    /// Writes one access unit in a single call. Anything short of the full
    /// buffer is an error.
    fn write_frame(&mut self, frame: &[u8]) -> anyhow::Result<()>;
}

/// Opens the sink of each worker.
pub trait SinkFactory: Send + Sync {
    fn open(&self, target: &SinkSpec) -> anyhow::Result<Box<dyn FrameSink>>;
}

/// Single `write` call; a short count is an error, not a retry.
pub fn write_once<W: Write + ?Sized>(writer: &mut W, frame: &[u8]) -> anyhow::Result<()> {
    let written = writer.write(frame)?;
    if written != frame.len() {
        anyhow::bail!("short write: {} of {} bytes", written, frame.len());
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Default)]
pub struct V4l2SinkFactory;

#[cfg(target_os = "linux")]
mod v4l2 {
    use std::fs::{File, OpenOptions};

    use anyhow::Context;
    use capture_bus::attr::PayloadType;
    use v4l::format::{Colorspace, FieldOrder};
    use v4l::video::Output;
    use v4l::{Device, FourCC, Format};

    use super::{write_once, FrameSink, SinkFactory, SinkSpec, V4l2SinkFactory};

    pub struct V4l2Sink {
        path: String,
        // Keeps the streaming state of the device alive.
        _device: Device,
        file: File,
    }

    fn fourcc(payload: PayloadType) -> FourCC {
        match payload {
            PayloadType::H264 => FourCC::new(b"H264"),
            PayloadType::Jpeg => FourCC::new(b"JPEG"),
        }
    }

    fn stream_on(device: &Device) -> std::io::Result<()> {
        let mut buf_type = v4l::buffer::Type::VideoOutput as u32;
        unsafe {
            v4l::v4l2::ioctl(
                device.handle().fd(),
                v4l::v4l2::vidioc::VIDIOC_STREAMON,
                &mut buf_type as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }

    impl V4l2Sink {
        pub fn open(target: &SinkSpec) -> anyhow::Result<Self> {
            let device = Device::with_path(&target.path)
                .with_context(|| format!("open v4l2 device {}", target.path))?;

            let mut fmt = Format::new(target.width, target.height, fourcc(target.payload));
            fmt.field_order = FieldOrder::Progressive;
            fmt.stride = 0;
            fmt.size = 0;
            if target.payload == PayloadType::Jpeg {
                fmt.colorspace = Colorspace::JPEG;
            }
            let applied = Output::set_format(&device, &fmt)
                .with_context(|| format!("VIDIOC_S_FMT on {}", target.path))?;
            log::debug!("{}: format set to {}", target.path, applied);

            stream_on(&device).with_context(|| format!("VIDIOC_STREAMON on {}", target.path))?;

            let file = OpenOptions::new()
                .write(true)
                .open(&target.path)
                .with_context(|| format!("open {} for writing", target.path))?;

            log::info!(
                "v4l2 sink {} streaming {} {}x{}",
                target.path,
                target.payload,
                target.width,
                target.height
            );
            Ok(Self {
                path: target.path.clone(),
                _device: device,
                file,
            })
        }
    }

    impl FrameSink for V4l2Sink {
        fn write_frame(&mut self, frame: &[u8]) -> anyhow::Result<()> {
            write_once(&mut self.file, frame).with_context(|| format!("write to {}", self.path))
        }
    }

    impl SinkFactory for V4l2SinkFactory {
        fn open(&self, target: &SinkSpec) -> anyhow::Result<Box<dyn FrameSink>> {
            Ok(Box::new(V4l2Sink::open(target)?))
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl SinkFactory for V4l2SinkFactory {
    fn open(&self, target: &SinkSpec) -> anyhow::Result<Box<dyn FrameSink>> {
        anyhow::bail!("{}: V4L2 output devices are only available on Linux", target.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `limit` bytes per call.
    struct Trickle {
        limit: usize,
        data: Vec<u8>,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_once_full() {
        let mut w = Trickle {
            limit: 64,
            data: Vec::new(),
        };
        write_once(&mut w, &[1, 2, 3]).unwrap();
        assert_eq!(w.data, [1, 2, 3]);
    }

    #[test]
    fn test_write_once_short_is_error() {
        let mut w = Trickle {
            limit: 2,
            data: Vec::new(),
        };
        let err = write_once(&mut w, &[1, 2, 3]).unwrap_err();
        assert!(err.to_string().contains("short write: 2 of 3"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_missing_device_fails() {
        let target = SinkSpec {
            path: "/nonexistent/video99".to_string(),
            payload: PayloadType::H264,
            width: 640,
            height: 360,
        };
        assert!(V4l2SinkFactory.open(&target).is_err());
    }
}
