//! Per-frame clock abstraction and a fixed-interval clock for headless use

use std::time::Duration;

/// Identifies one requested frame so it can be cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameHandle(u64);

/// A due frame: the handle it was requested under and the clock time in ms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame {
    pub handle: FrameHandle,
    pub timestamp_ms: f64,
}

/// Something that calls back once per display refresh.
pub trait Scheduler {
    /// Ask for one callback on the next frame.
    fn request_frame(&mut self) -> FrameHandle;
    /// Drop a request; unknown or already fired handles are ignored.
    fn cancel_frame(&mut self, handle: FrameHandle);
}

/// Clock that advances by a fixed interval each time it is polled.
///
/// Every request pending at the time of `advance` fires on that frame, the
/// same way display-refresh callbacks batch.
#[derive(Clone, Debug)]
pub struct FixedIntervalScheduler {
    interval_ms: f64,
    now_ms: f64,
    next_id: u64,
    pending: Vec<FrameHandle>,
}

impl FixedIntervalScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_secs_f64() * 1000.0,
            now_ms: 0.0,
            next_id: 1,
            pending: Vec::new(),
        }
    }

    pub fn from_fps(fps: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / f64::from(fps.max(1))))
    }

    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    /// Current clock time in milliseconds.
    pub fn now_ms(&self) -> f64 {
        self.now_ms
    }

    /// Requests that have not fired or been cancelled.
    pub fn pending(&self) -> &[FrameHandle] {
        &self.pending
    }

    /// Move the clock one interval forward and fire everything pending.
    pub fn advance(&mut self) -> Vec<Frame> {
        self.now_ms += self.interval_ms;
        let timestamp_ms = self.now_ms;
        self.pending
            .drain(..)
            .map(|handle| Frame {
                handle,
                timestamp_ms,
            })
            .collect()
    }
}

impl Scheduler for FixedIntervalScheduler {
    fn request_frame(&mut self) -> FrameHandle {
        let handle = FrameHandle(self.next_id);
        self.next_id += 1;
        self.pending.push(handle);
        handle
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        self.pending.retain(|&h| h != handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_fires_pending_requests_once() {
        let mut s = FixedIntervalScheduler::from_fps(50);
        let a = s.request_frame();
        let frames = s.advance();
        assert_eq!(frames, vec![Frame { handle: a, timestamp_ms: 20.0 }]);
        assert!(s.advance().is_empty());
        assert_eq!(s.now_ms(), 40.0);
    }

    #[test]
    fn cancelled_request_never_fires() {
        let mut s = FixedIntervalScheduler::new(Duration::from_millis(10));
        let a = s.request_frame();
        let b = s.request_frame();
        assert_ne!(a, b);
        s.cancel_frame(a);
        s.cancel_frame(a);
        let frames = s.advance();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].handle, b);
    }
}
