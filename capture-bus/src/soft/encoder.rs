use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, mpsc::Receiver, mpsc::RecvTimeoutError},
    thread::JoinHandle,
    time::Duration,
};

use bytes::Bytes;
use ffmpeg_next::{Dictionary, Rational, format::Pixel, picture};
use tokio_util::sync::CancellationToken;

use crate::{
    attr::{ChannelId, EncoderChnAttr, PayloadType},
    hw::{find_hw_encoder, software_encoder_name},
    nal::split_annexb,
    packet::{EncodedStream, Pack, PollStatus},
    soft::source::Picture,
};

/// H.264 encoder backed by FFmpeg.
pub(crate) struct H264Encoder {
    inner: ffmpeg_next::codec::encoder::Video,
    width: u32,
    height: u32,
    gop: i64,
    frame_index: i64,
}

impl H264Encoder {
    pub fn new(attr: &EncoderChnAttr) -> anyhow::Result<Self> {
        let sw_name = software_encoder_name(PayloadType::H264)
            .ok_or_else(|| anyhow::anyhow!("no software H.264 encoder"))?;

        // Try hardware encoder first, then fall back to software encoder.
        let inner = match find_hw_encoder(PayloadType::H264) {
            Some(hw_codec) => {
                let hw_name = hw_codec.name().to_string();
                match Self::open(hw_codec, attr) {
                    Ok(enc) => {
                        log::info!("encoder opened successfully: {}", hw_name);
                        enc
                    }
                    Err(e) => {
                        log::warn!(
                            "hardware encoder {} failed: {}, falling back to {}",
                            hw_name,
                            e,
                            sw_name
                        );
                        Self::open_by_name(sw_name, attr)?
                    }
                }
            }
            None => {
                log::info!("no hardware encoder found, using software encoder: {}", sw_name);
                Self::open_by_name(sw_name, attr)?
            }
        };

        Ok(Self {
            inner,
            width: attr.enc.pic_width,
            height: attr.enc.pic_height,
            gop: attr.rc.max_gop.max(1) as i64,
            frame_index: 0,
        })
    }

    fn open_by_name(
        name: &str,
        attr: &EncoderChnAttr,
    ) -> anyhow::Result<ffmpeg_next::codec::encoder::Video> {
        let codec = ffmpeg_next::encoder::find_by_name(name)
            .ok_or_else(|| anyhow::anyhow!("codec not found: {}", name))?;
        let enc = Self::open(codec, attr)?;
        log::info!("encoder opened successfully: {}", name);
        Ok(enc)
    }

    fn open(
        codec: ffmpeg_next::Codec,
        attr: &EncoderChnAttr,
    ) -> anyhow::Result<ffmpeg_next::codec::encoder::Video> {
        let rate = attr.rc.frame_rate;
        let ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        let mut encoder = ctx.encoder().video()?;
        encoder.set_width(attr.enc.pic_width);
        encoder.set_height(attr.enc.pic_height);
        encoder.set_format(Pixel::NV12);
        encoder.set_frame_rate(Some(Rational::new(rate.num as i32, rate.den as i32)));
        encoder.set_time_base(Rational::new(rate.den as i32, rate.num as i32));
        encoder.set_gop(attr.rc.max_gop.max(1));
        encoder.set_max_b_frames(0);
        encoder.set_qmin(attr.rc.min_qp as i32);
        encoder.set_qmax(attr.rc.max_qp as i32);
        encoder.set_max_bit_rate(attr.rc.max_bitrate as usize * 1000);

        let mut opts = Dictionary::new();
        opts.set("preset", "ultrafast");
        opts.set("tune", "zerolatency");
        // two slices per picture: an access unit arrives as several packs
        opts.set("slices", "2");
        Ok(encoder.open_with(opts)?)
    }

    fn fill_frame(&self, pic: &Picture) -> anyhow::Result<ffmpeg_next::frame::Video> {
        if pic.width != self.width || pic.height != self.height {
            anyhow::bail!(
                "picture {}x{} does not match encoder {}x{}",
                pic.width,
                pic.height,
                self.width,
                self.height
            );
        }
        let w = self.width as usize;
        let h = self.height as usize;
        let mut frame = ffmpeg_next::frame::Video::new(Pixel::NV12, self.width, self.height);

        let y_stride = frame.stride(0);
        let y_dst = frame.data_mut(0);
        for (row, src) in pic.luma().chunks_exact(w).take(h).enumerate() {
            y_dst[row * y_stride..row * y_stride + w].copy_from_slice(src);
        }

        let uv_stride = frame.stride(1);
        let uv_dst = frame.data_mut(1);
        for (row, src) in pic.chroma().chunks_exact(w).take(h / 2).enumerate() {
            uv_dst[row * uv_stride..row * uv_stride + w].copy_from_slice(src);
        }
        Ok(frame)
    }

    /// Encodes one picture and returns the packs of every access unit the
    /// encoder completed, in bitstream order.
    pub fn encode(&mut self, pic: &Picture) -> anyhow::Result<Vec<Pack>> {
        let mut frame = self.fill_frame(pic)?;
        frame.set_pts(Some(self.frame_index));
        if self.frame_index % self.gop == 0 {
            frame.set_kind(picture::Type::I);
        }
        self.inner.send_frame(&frame)?;
        self.frame_index += 1;

        let mut packs = Vec::new();
        loop {
            let mut packet = ffmpeg_next::codec::packet::Packet::empty();
            match self.inner.receive_packet(&mut packet) {
                Ok(()) => {
                    let pts = packet.pts().unwrap_or_default();
                    let is_key = packet.is_key();
                    let data = packet
                        .data()
                        .map(Bytes::copy_from_slice)
                        .unwrap_or_default();
                    for range in split_annexb(&data) {
                        packs.push(Pack::new(data.slice(range), pts, is_key));
                    }
                }
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break;
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(packs)
    }
}

/// Baseline JPEG encoder backed by jpeg-encoder.
pub(crate) struct JpegEncoder {
    width: u32,
    height: u32,
    quality: u8,
}

impl JpegEncoder {
    pub fn new(attr: &EncoderChnAttr) -> anyhow::Result<Self> {
        if attr.enc.pic_width > u16::MAX as u32 || attr.enc.pic_height > u16::MAX as u32 {
            anyhow::bail!(
                "JPEG picture {}x{} too large",
                attr.enc.pic_width,
                attr.enc.pic_height
            );
        }
        Ok(Self {
            width: attr.enc.pic_width,
            height: attr.enc.pic_height,
            quality: jpeg_quality(attr.rc.min_qp, attr.rc.max_qp),
        })
    }

    pub fn encode(&mut self, pic: &Picture) -> anyhow::Result<Vec<Pack>> {
        if pic.width != self.width || pic.height != self.height {
            anyhow::bail!(
                "picture {}x{} does not match encoder {}x{}",
                pic.width,
                pic.height,
                self.width,
                self.height
            );
        }
        let ycbcr = nv12_to_ycbcr(pic);
        let mut out = Vec::new();
        let encoder = jpeg_encoder::Encoder::new(&mut out, self.quality);
        encoder.encode(
            &ycbcr,
            self.width as u16,
            self.height as u16,
            jpeg_encoder::ColorType::Ycbcr,
        )?;
        Ok(vec![Pack::new(Bytes::from(out), pic.index as i64, true)])
    }
}

/// Maps the QP window onto a JPEG quality factor.
pub(crate) fn jpeg_quality(min_qp: u32, max_qp: u32) -> u8 {
    let mid = (min_qp + max_qp) / 2;
    100u32.saturating_sub(mid).clamp(10, 95) as u8
}

/// Expands NV12 into interleaved 4:4:4 YCbCr.
pub(crate) fn nv12_to_ycbcr(pic: &Picture) -> Vec<u8> {
    let w = pic.width as usize;
    let h = pic.height as usize;
    let luma = pic.luma();
    let chroma = pic.chroma();
    let mut out = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            let c = (y / 2) * w + (x / 2) * 2;
            out.push(luma[y * w + x]);
            out.push(chroma[c]);
            out.push(chroma[c + 1]);
        }
    }
    out
}

pub(crate) enum SoftCodec {
    H264(H264Encoder),
    Jpeg(JpegEncoder),
}

impl SoftCodec {
    pub fn new(attr: &EncoderChnAttr) -> anyhow::Result<Self> {
        match attr.enc.payload {
            PayloadType::H264 => Ok(SoftCodec::H264(H264Encoder::new(attr)?)),
            PayloadType::Jpeg => Ok(SoftCodec::Jpeg(JpegEncoder::new(attr)?)),
        }
    }

    pub fn encode(&mut self, pic: &Picture) -> anyhow::Result<Vec<Pack>> {
        match self {
            SoftCodec::H264(enc) => enc.encode(pic),
            SoftCodec::Jpeg(enc) => enc.encode(pic),
        }
    }
}

struct QueueState {
    streams: VecDeque<EncodedStream>,
    outstanding: HashSet<u64>,
    next_seq: u64,
    dropped: u64,
    closed: bool,
}

/// Completed streams of one encoder channel, waiting to be fetched.
pub(crate) struct StreamQueue {
    channel: ChannelId,
    capacity: usize,
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl StreamQueue {
    pub fn new(channel: ChannelId, capacity: usize) -> Self {
        Self {
            channel,
            capacity: capacity.max(1),
            state: Mutex::new(QueueState {
                streams: VecDeque::new(),
                outstanding: HashSet::new(),
                next_seq: 0,
                dropped: 0,
                closed: true,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open(&self) {
        let mut state = self.lock();
        state.closed = false;
    }

    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.streams.clear();
        self.ready.notify_all();
    }

    pub fn push(&self, packs: Vec<Pack>) {
        if packs.is_empty() {
            return;
        }
        let mut state = self.lock();
        if state.closed {
            return;
        }
        if state.streams.len() >= self.capacity {
            state.streams.pop_front();
            state.dropped += 1;
            log::debug!(
                "channel {}: stream queue full, dropped {} streams",
                self.channel,
                state.dropped
            );
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.streams.push_back(EncodedStream::new(seq, packs));
        self.ready.notify_all();
    }

    pub fn poll(&self, timeout: Duration) -> PollStatus {
        let state = self.lock();
        let (state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.streams.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if state.streams.is_empty() {
            PollStatus::Timeout
        } else {
            PollStatus::Ready
        }
    }

    pub fn take(&self, block: bool) -> anyhow::Result<EncodedStream> {
        let mut state = self.lock();
        if block {
            state = self
                .ready
                .wait_while(state, |s| s.streams.is_empty() && !s.closed)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let stream = state.streams.pop_front().ok_or_else(|| {
            anyhow::anyhow!("channel {}: no stream available", self.channel)
        })?;
        state.outstanding.insert(stream.seq());
        Ok(stream)
    }

    pub fn release(&self, stream: EncodedStream) -> anyhow::Result<()> {
        let mut state = self.lock();
        if !state.outstanding.remove(&stream.seq()) {
            anyhow::bail!(
                "channel {}: stream {} was not handed out",
                self.channel,
                stream.seq()
            );
        }
        Ok(())
    }
}

/// Encoding thread of one receiving channel.
pub(crate) struct ChannelTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ChannelTask {
    pub fn start(
        channel: ChannelId,
        codec: SoftCodec,
        pictures: Receiver<Arc<Picture>>,
        queue: Arc<StreamQueue>,
    ) -> anyhow::Result<Self> {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let handle = std::thread::Builder::new()
            .name(format!("soft-enc-{}", channel))
            .spawn(move || Self::encoder_loop(channel, codec, loop_cancel, pictures, queue))?;
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

    fn encoder_loop(
        channel: ChannelId,
        mut codec: SoftCodec,
        cancel: CancellationToken,
        pictures: Receiver<Arc<Picture>>,
        queue: Arc<StreamQueue>,
    ) {
        log::debug!("soft encoder {} loop started", channel);
        let mut encoded = 0u64;
        while !cancel.is_cancelled() {
            match pictures.recv_timeout(Duration::from_millis(100)) {
                Ok(pic) => match codec.encode(&pic) {
                    Ok(packs) => {
                        encoded += 1;
                        queue.push(packs);
                    }
                    Err(e) => log::warn!("soft encoder {}: picture {}: {:#}", channel, pic.index, e),
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::debug!(
            "soft encoder {} loop finished after {} pictures",
            channel,
            encoded
        );
    }
}

impl Drop for ChannelTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::source::test_pattern;

    fn pack(bytes: &'static [u8]) -> Pack {
        Pack::new(Bytes::from_static(bytes), 0, false)
    }

    #[test]
    fn test_queue_poll_timeout_when_empty() {
        let queue = StreamQueue::new(0, 2);
        queue.open();
        assert_eq!(queue.poll(Duration::from_millis(10)), PollStatus::Timeout);
    }

    #[test]
    fn test_queue_take_release() {
        let queue = StreamQueue::new(1, 2);
        queue.open();
        queue.push(vec![pack(b"ab"), pack(b"c")]);
        assert_eq!(queue.poll(Duration::from_millis(10)), PollStatus::Ready);

        let stream = queue.take(false).unwrap();
        assert_eq!(stream.pack_count(), 2);
        assert_eq!(stream.total_len(), 3);
        let copy = EncodedStream::new(stream.seq(), Vec::new());
        queue.release(stream).unwrap();
        assert!(queue.release(copy).is_err());
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let queue = StreamQueue::new(2, 2);
        queue.open();
        queue.push(vec![pack(b"1")]);
        queue.push(vec![pack(b"2")]);
        queue.push(vec![pack(b"3")]);
        assert_eq!(queue.take(false).unwrap().packs()[0].data(), b"2");
        assert_eq!(queue.take(false).unwrap().packs()[0].data(), b"3");
        assert!(queue.take(false).is_err());
    }

    #[test]
    fn test_queue_ignores_pushes_when_closed() {
        let queue = StreamQueue::new(3, 2);
        queue.push(vec![pack(b"x")]);
        assert!(queue.take(false).is_err());
    }

    #[test]
    fn test_jpeg_quality_window() {
        assert_eq!(jpeg_quality(15, 38), 74);
        assert_eq!(jpeg_quality(0, 0), 95);
        assert_eq!(jpeg_quality(90, 100), 10);
    }

    #[test]
    fn test_nv12_to_ycbcr() {
        let pic = Picture {
            data: test_pattern(4, 2, 0),
            width: 4,
            height: 2,
            index: 0,
        };
        let out = nv12_to_ycbcr(&pic);
        assert_eq!(out.len(), 4 * 2 * 3);
        assert_eq!(out[0], pic.luma()[0]);
        // pixels 0 and 1 share the first chroma pair
        assert_eq!(out[1], out[4]);
        assert_eq!(out[2], out[5]);
    }

    #[test]
    fn test_jpeg_encode_single_pack() {
        let attr = EncoderChnAttr {
            enc: crate::attr::EncoderAttr {
                payload: PayloadType::Jpeg,
                buf_size: 0,
                profile: 0,
                pic_width: 32,
                pic_height: 16,
            },
            rc: crate::attr::RcAttr {
                mode: crate::attr::RcMode::Mjpeg,
                frame_rate: crate::attr::FrameRate::new(25, 1),
                max_gop: 1,
                max_qp: 38,
                min_qp: 15,
                static_time: 1,
                max_bitrate: 500,
                change_pos: 50,
                frame_qp_step: 3,
                gop_qp_step: 15,
                frame_used: true,
            },
        };
        let mut enc = JpegEncoder::new(&attr).unwrap();
        let pic = Picture {
            data: test_pattern(32, 16, 5),
            width: 32,
            height: 16,
            index: 5,
        };
        let packs = enc.encode(&pic).unwrap();
        assert_eq!(packs.len(), 1);
        assert!(packs[0].data().starts_with(&[0xff, 0xd8]));
        assert!(packs[0].data().ends_with(&[0xff, 0xd9]));
    }
}
