//! Frame clock: per-frame time values and a rolling frame rate window.

use std::time::{Duration, Instant};

/// Time values handed to one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameTime {
    /// Seconds since the clock started
    pub time: f32,
    /// Seconds since the previous frame began
    pub delta: f32,
}

/// Frame counts of one finished reporting window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameRate {
    /// Presented frames per second over the window
    pub fps: f32,
    pub presented: u32,
    pub skipped: u32,
}

#[derive(Debug, Default)]
struct Window {
    elapsed: Duration,
    presented: u32,
    skipped: u32,
}

/// Drives the frame loop's time values and reports the frame rate once per
/// [`FrameClock::REPORT_INTERVAL`].
///
/// Call [`begin_frame`](Self::begin_frame) before recording a frame and
/// [`end_frame`](Self::end_frame) once its outcome is known.
#[derive(Debug)]
pub struct FrameClock {
    start: Instant,
    last_frame: Instant,
    window: Window,
}

impl FrameClock {
    /// Length of a frame rate reporting window.
    pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

    /// Creates a clock starting now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            window: Window::default(),
        }
    }

    /// Starts a frame.
    pub fn begin_frame(&mut self) -> FrameTime {
        self.advance(Instant::now())
    }

    fn advance(&mut self, now: Instant) -> FrameTime {
        let delta = now.saturating_duration_since(self.last_frame);
        self.last_frame = now;
        self.window.elapsed += delta;
        FrameTime {
            time: now.saturating_duration_since(self.start).as_secs_f32(),
            delta: delta.as_secs_f32(),
        }
    }

    /// Records whether the current frame was presented. Returns the frame
    /// rate once the window covers a full reporting interval, then starts a
    /// new window.
    pub fn end_frame(&mut self, presented: bool) -> Option<FrameRate> {
        if presented {
            self.window.presented += 1;
        } else {
            self.window.skipped += 1;
        }
        if self.window.elapsed < Self::REPORT_INTERVAL {
            return None;
        }
        let window = std::mem::take(&mut self.window);
        Some(FrameRate {
            fps: window.presented as f32 / window.elapsed.as_secs_f32(),
            presented: window.presented,
            skipped: window.skipped,
        })
    }

    /// Total time since the clock started or was reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Restarts the clock and drops the current window.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
