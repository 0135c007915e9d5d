use std::time::{Duration, Instant};

/// One FPS measurement over a full window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FpsSample {
    pub frames: u32,
    pub elapsed: Duration,
    pub fps: f64,
}

/// Counts written frames and reports the rate every `window` frames.
/// Observability only: it never blocks the caller.
pub struct FpsMeter {
    window: u32,
    count: u32,
    checkpoint: Instant,
}

impl FpsMeter {
    pub fn new(window: u32, start: Instant) -> Self {
        Self {
            window: window.max(1),
            count: 0,
            checkpoint: start,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Records one frame written at `now`. Once the window is full, returns
    /// the rate since the previous checkpoint and starts a new window at
    /// `now`.
    pub fn record(&mut self, now: Instant) -> Option<FpsSample> {
        self.count += 1;
        if self.count < self.window {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.checkpoint);
        let secs = elapsed.as_secs_f64();
        let fps = if secs > 0.0 {
            self.count as f64 / secs
        } else {
            f64::INFINITY
        };
        let sample = FpsSample {
            frames: self.count,
            elapsed,
            fps,
        };
        self.count = 0;
        self.checkpoint = now;
        Some(sample)
    }
}

/// Best-effort pacing between written frames: waits out whatever is left of
/// one frame interval since the previous frame.
pub struct Pacer {
    interval: Option<Duration>,
    last: Option<Instant>,
}

impl Pacer {
    /// `interval` of `None` disables pacing.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        match (self.interval, self.last) {
            (Some(interval), Some(last)) => {
                interval.saturating_sub(now.saturating_duration_since(last))
            }
            (Some(interval), None) => interval,
            (None, _) => Duration::ZERO,
        }
    }

    pub fn pause(&mut self) {
        let wait = self.remaining(Instant::now());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        self.last = Some(Instant::now());
    }
}
