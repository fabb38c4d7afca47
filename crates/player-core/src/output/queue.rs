//! Thread-safe bounded queue for interleaved `f32` samples.
//!
//! Used between the output stages:
//! - worker thread → source queue
//! - resampler thread → device queue
//! - CPAL callback drains the device queue (non-blocking)
//!
//! Besides `close()` the queue supports `clear()`, which drops buffered audio
//! and wakes blocked producers so a seek or stop takes effect immediately.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Bounded MPMC queue of interleaved samples with a fixed channel count.
///
/// A single [`Condvar`] signals every state change. The `done` flag lives under
/// the same mutex as the samples.
pub struct SharedAudio {
    channels: usize,
    inner: Mutex<SharedInner>,
    cv: Condvar,
    max_buffered_samples: usize,
}

struct SharedInner {
    queue: VecDeque<f32>,
    done: bool,
    /// Bumped by `clear()` so a blocked producer drops the rest of its slice.
    generation: u64,
}

/// Strategy for popping interleaved frames from the queue.
pub enum PopStrategy {
    /// Block until exactly `frames` are available, or return `None` if closed before enough data.
    BlockingExact { frames: usize },
    /// Block until at least one frame is available, then return up to `max_frames`.
    BlockingUpTo { max_frames: usize },
    /// Return immediately with up to `max_frames`, or `None` if currently empty.
    NonBlocking { max_frames: usize },
}

/// Queue capacity in samples for `buffer_seconds` of audio.
///
/// Non-finite or non-positive durations fall back to two seconds.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

impl SharedAudio {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(SharedInner {
                queue: VecDeque::new(),
                done: false,
                generation: 0,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, g: MutexGuard<'a, SharedInner>) -> MutexGuard<'a, SharedInner> {
        self.cv.wait(g).unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Current buffered frames (snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().queue.len() / self.channels
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Mark the queue finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        self.lock().done = true;
        self.cv.notify_all();
    }

    /// Drop all buffered samples, including the rest of any blocked push.
    pub fn clear(&self) {
        let mut g = self.lock();
        g.queue.clear();
        g.generation = g.generation.wrapping_add(1);
        drop(g);
        self.cv.notify_all();
    }

    /// Push interleaved samples, blocking while the queue is full.
    ///
    /// Returns early, dropping the remainder, if the queue is closed or
    /// cleared while waiting.
    pub fn push_interleaved_blocking(&self, samples: &[f32]) {
        let mut offset = 0;
        let generation = self.lock().generation;

        while offset < samples.len() {
            let mut g = self.lock();

            while g.queue.len() >= self.max_buffered_samples && !g.done && g.generation == generation {
                g = self.wait(g);
            }
            if g.done || g.generation != generation {
                return;
            }

            let room = self.max_buffered_samples - g.queue.len();
            let end = (offset + room).min(samples.len());
            g.queue.extend(&samples[offset..end]);
            offset = end;

            drop(g);
            self.cv.notify_all();
        }
    }

    /// Pop interleaved frames using the requested strategy.
    ///
    /// Returns `None` when the queue is closed and no data can satisfy the request.
    pub fn pop(&self, strategy: PopStrategy) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let take_samples = match strategy {
            PopStrategy::BlockingExact { frames } => {
                let want = frames * self.channels;
                while g.queue.len() < want && !g.done {
                    g = self.wait(g);
                }
                if g.queue.len() < want {
                    return None;
                }
                want
            }
            PopStrategy::BlockingUpTo { max_frames } => {
                while g.queue.len() < self.channels && !g.done {
                    g = self.wait(g);
                }
                let frames = (g.queue.len() / self.channels).min(max_frames);
                if frames == 0 {
                    return None;
                }
                frames * self.channels
            }
            PopStrategy::NonBlocking { max_frames } => {
                let frames = (g.queue.len() / self.channels).min(max_frames);
                if frames == 0 {
                    return None;
                }
                frames * self.channels
            }
        };

        let out: Vec<f32> = g.queue.drain(..take_samples).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Wait until fewer than `residual_frames` frames remain buffered.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub fn wait_until_below(&self, residual_frames: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let limit = residual_frames.max(1) * self.channels;
        let mut g = self.lock();
        while g.queue.len() >= limit {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (ng, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn calc_max_buffered_samples_fallbacks() {
        assert_eq!(calc_max_buffered_samples(48_000, 2, 2.0), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, -1.0), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, f32::NAN), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, f32::INFINITY), 192_000);
    }

    #[test]
    fn pop_nonblocking_empty() {
        let q = SharedAudio::new(2, 16);
        assert!(q.pop(PopStrategy::NonBlocking { max_frames: 4 }).is_none());
    }

    #[test]
    fn pop_blocking_exact_waits_for_full_frames() {
        let q = Arc::new(SharedAudio::new(2, 64));
        let q_pop = q.clone();

        let handle = thread::spawn(move || {
            let out = q_pop.pop(PopStrategy::BlockingExact { frames: 3 }).unwrap();
            assert_eq!(out.len(), 6);
        });

        q.push_interleaved_blocking(&[0.1, 0.2, 0.3, 0.4]);
        q.push_interleaved_blocking(&[0.5, 0.6]);
        handle.join().unwrap();
    }

    #[test]
    fn pop_blocking_up_to_drains_tail_and_respects_close() {
        let q = SharedAudio::new(2, 64);
        q.push_interleaved_blocking(&[1.0, 2.0, 3.0, 4.0]);
        q.close();

        let out = q.pop(PopStrategy::BlockingUpTo { max_frames: 8 }).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(q.pop(PopStrategy::BlockingUpTo { max_frames: 8 }).is_none());
    }

    #[test]
    fn pop_nonblocking_returns_available_frames() {
        let q = SharedAudio::new(2, 64);
        q.push_interleaved_blocking(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let out = q.pop(PopStrategy::NonBlocking { max_frames: 2 }).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(q.len_frames(), 1);
    }

    #[test]
    fn clear_releases_blocked_producer() {
        let q = Arc::new(SharedAudio::new(1, 4));
        let q_push = q.clone();

        let handle = thread::spawn(move || {
            q_push.push_interleaved_blocking(&[0.0; 64]);
        });

        thread::sleep(Duration::from_millis(10));
        q.clear();
        handle.join().unwrap();
        assert!(q.len_frames() <= 4);
    }

    #[test]
    fn close_releases_blocked_producer() {
        let q = Arc::new(SharedAudio::new(1, 4));
        let q_push = q.clone();
        let handle = thread::spawn(move || q_push.push_interleaved_blocking(&[0.0; 64]));
        thread::sleep(Duration::from_millis(10));
        q.close();
        handle.join().unwrap();
        assert!(q.is_done());
    }

    #[test]
    fn wait_until_below_returns_once_drained() {
        let q = Arc::new(SharedAudio::new(2, 64));
        q.push_interleaved_blocking(&[0.0; 16]);
        let q_pop = q.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            q_pop.pop(PopStrategy::NonBlocking { max_frames: 8 });
        });
        assert!(q.wait_until_below(1, Duration::from_secs(2)));
        handle.join().unwrap();
    }
}
