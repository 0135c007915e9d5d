use std::{
    sync::{
        Arc, Mutex, PoisonError,
        mpsc::{SyncSender, TrySendError},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::attr::{ChannelId, FrameSourceAttr, GroupId};

/// Region of the full sensor picture a source samples from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Window {
    /// Crop region when cropping is enabled, the whole picture otherwise.
    pub fn of(attr: &FrameSourceAttr) -> anyhow::Result<Self> {
        let crop = attr.crop;
        if !crop.enable {
            return Ok(Self {
                left: 0,
                top: 0,
                width: attr.pic_width,
                height: attr.pic_height,
            });
        }
        if crop.width == 0
            || crop.height == 0
            || crop.left.saturating_add(crop.width) > attr.pic_width
            || crop.top.saturating_add(crop.height) > attr.pic_height
        {
            anyhow::bail!(
                "crop {}x{}+{}+{} outside picture {}x{}",
                crop.width,
                crop.height,
                crop.left,
                crop.top,
                attr.pic_width,
                attr.pic_height
            );
        }
        Ok(Self {
            left: crop.left,
            top: crop.top,
            width: crop.width,
            height: crop.height,
        })
    }
}

/// One NV12 picture produced by a software frame source.
#[derive(Debug)]
pub struct Picture {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub index: u64,
}

impl Picture {
    pub fn luma(&self) -> &[u8] {
        &self.data[..(self.width * self.height) as usize]
    }

    /// Interleaved CbCr plane, half height.
    pub fn chroma(&self) -> &[u8] {
        &self.data[(self.width * self.height) as usize..]
    }
}

pub(crate) type Subscribers = Arc<Mutex<Vec<(ChannelId, SyncSender<Arc<Picture>>)>>>;

/// Moving diagonal gradient over a slowly cycling chroma tint.
pub fn test_pattern(width: u32, height: u32, index: u64) -> Bytes {
    let full = Window {
        left: 0,
        top: 0,
        width,
        height,
    };
    sample_pattern(full, width, height, index)
}

/// Samples the gradient of the full sensor picture inside `window`, resized
/// to `width`x`height`.
pub fn sample_pattern(window: Window, width: u32, height: u32, index: u64) -> Bytes {
    let (w, h) = (width as usize, height as usize);
    let mut data = Vec::with_capacity(w * h * 3 / 2);
    let shift = (index as usize).wrapping_mul(4);
    let (left, top) = (window.left as usize, window.top as usize);
    let (win_w, win_h) = (window.width as usize, window.height as usize);
    for y in 0..h {
        let sy = top + y * win_h / h;
        for x in 0..w {
            let sx = left + x * win_w / w;
            data.push((sx + sy + shift) as u8);
        }
    }
    let tint = (index / 8) as u8;
    for _ in 0..h / 2 {
        for x in 0..w / 2 {
            data.push(128u8.wrapping_add(tint).wrapping_add(x as u8 / 4));
            data.push(128u8.wrapping_sub(tint));
        }
    }
    Bytes::from(data)
}

/// Frame generator thread for one capture group.
pub(crate) struct SourceTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SourceTask {
    pub fn start(
        group: GroupId,
        attr: &FrameSourceAttr,
        subscribers: Subscribers,
    ) -> anyhow::Result<Self> {
        let (width, height) = attr.output_size();
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            anyhow::bail!("invalid NV12 picture size {}x{}", width, height);
        }
        let window = Window::of(attr)?;
        let interval = attr
            .frame_rate
            .frame_interval()
            .ok_or_else(|| anyhow::anyhow!("invalid frame rate {}", attr.frame_rate))?;

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let handle = std::thread::Builder::new()
            .name(format!("fs-{}", group))
            .spawn(move || {
                Self::source_loop(group, window, (width, height), interval, loop_cancel, subscribers)
            })?;

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn source_loop(
        group: GroupId,
        window: Window,
        (width, height): (u32, u32),
        interval: Duration,
        cancel: CancellationToken,
        subscribers: Subscribers,
    ) {
        log::info!(
            "frame source {} started: {:?} -> {}x{} every {:?}",
            group,
            window,
            width,
            height,
            interval
        );
        let mut index = 0u64;
        let mut dropped = 0u64;
        let mut next = Instant::now();
        while !cancel.is_cancelled() {
            let picture = Arc::new(Picture {
                data: sample_pattern(window, width, height, index),
                width,
                height,
                index,
            });

            {
                let mut subs = subscribers.lock().unwrap_or_else(PoisonError::into_inner);
                subs.retain(|(channel, tx)| match tx.try_send(Arc::clone(&picture)) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        log::trace!(
                            "frame source {}: channel {} busy, picture {} dropped",
                            group,
                            channel,
                            index
                        );
                        true
                    }
                    Err(TrySendError::Disconnected(_)) => false,
                });
            }

            index += 1;
            next += interval;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                next = now;
            }
        }
        log::info!(
            "frame source {} stopped after {} pictures ({} dropped)",
            group,
            index,
            dropped
        );
    }
}

impl Drop for SourceTask {
    fn drop(&mut self) {
        self.stop();
    }
}
