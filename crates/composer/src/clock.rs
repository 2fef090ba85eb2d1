use std::time::{Duration, Instant};

/// Timing snapshot handed to a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameTime {
    /// Seconds since the clock started.
    pub elapsed: f32,
    /// Seconds since the previous frame.
    pub delta: f32,
    pub frame: u64,
}

/// Source of frame timing.
///
/// Wall-clock mode follows `Instant`; fixed-step mode advances by a constant
/// delta per tick so headless runs produce identical frames.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Instant,
    last: Instant,
    fixed_step: Option<Duration>,
    ticks: u64,
    current: FrameTime,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            fixed_step: None,
            ticks: 0,
            current: FrameTime::default(),
        }
    }

    pub fn fixed(step: Duration) -> Self {
        Self {
            fixed_step: Some(step),
            ..Self::new()
        }
    }

    /// Advances to the next frame and returns its timing.
    pub fn tick(&mut self) -> FrameTime {
        let (elapsed, delta) = match self.fixed_step {
            Some(step) => {
                let delta = step.as_secs_f32();
                (self.current.elapsed + delta, delta)
            }
            None => {
                let now = Instant::now();
                let delta = now.duration_since(self.last).as_secs_f32();
                self.last = now;
                (now.duration_since(self.start).as_secs_f32(), delta)
            }
        };
        self.current = FrameTime {
            elapsed,
            delta,
            frame: self.ticks,
        };
        self.ticks += 1;
        self.current
    }

    pub fn current(&self) -> FrameTime {
        self.current
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-pending "next frame" request.
///
/// Requesting while a request is already pending is a no-op; the host takes
/// the request once per display refresh. Stopping the loop is simply not
/// requesting again.
#[derive(Debug, Default)]
pub struct FrameRequest {
    pending: bool,
    scheduled: u64,
}

impl FrameRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this call actually scheduled a frame.
    pub fn request(&mut self) -> bool {
        if self.pending {
            return false;
        }
        self.pending = true;
        self.scheduled += 1;
        true
    }

    /// Consumes the pending request, if any.
    pub fn take(&mut self) -> bool {
        std::mem::replace(&mut self.pending, false)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Total number of frames ever scheduled.
    pub fn scheduled(&self) -> u64 {
        self.scheduled
    }
}
