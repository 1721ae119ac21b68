use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Live counters for one copy, shared between the scheduler and observers.
pub struct TransferProgress {
    total_bytes: u64,
    bytes_done: AtomicU64,
    chunks_done: AtomicUsize,
    started_at: Instant,
    speed: SpeedCalculator,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            bytes_done: AtomicU64::new(0),
            chunks_done: AtomicUsize::new(0),
            started_at: Instant::now(),
            speed: SpeedCalculator::new(None, None),
        }
    }

    /// Records one finished chunk of `bytes`.
    pub fn record_chunk(&self, bytes: u64) {
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
        self.chunks_done.fetch_add(1, Ordering::Relaxed);
        self.speed.add_sample(bytes);
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }

    pub fn chunks_done(&self) -> usize {
        self.chunks_done.load(Ordering::Relaxed)
    }

    /// Completion in percent; an empty file counts as complete.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.bytes_done() as f64 * 100.0 / self.total_bytes as f64
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Recent throughput in bytes/second.
    pub fn bytes_per_second(&self) -> f64 {
        self.speed.bytes_per_second()
    }

    /// Estimated time to finish at the recent throughput.
    pub fn eta(&self) -> Option<Duration> {
        self.speed
            .eta(self.total_bytes.saturating_sub(self.bytes_done()))
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    at: Instant,
}

/// Transfer speed over a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: VecDeque<SpeedSample>,
    max_samples: usize,
    window: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: VecDeque::new(),
                max_samples: max_samples.unwrap_or(100),
                window: window.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` transferred now.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        s.samples.push_back(SpeedSample { bytes, at: now });

        while s
            .samples
            .front()
            .is_some_and(|first| now.duration_since(first.at) > s.window)
        {
            s.samples.pop_front();
        }
        while s.samples.len() > s.max_samples {
            s.samples.pop_front();
        }
    }

    /// Average speed in bytes/second within the window; 0.0 with fewer
    /// than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(first), Some(last)) = (s.samples.front(), s.samples.back()) else {
            return 0.0;
        };
        if s.samples.len() < 2 {
            return 0.0;
        }
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining` bytes; `None` while speed is zero.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn progress_counts_chunks() {
        let p = TransferProgress::new(10);
        p.record_chunk(3);
        p.record_chunk(3);
        assert_eq!(p.bytes_done(), 6);
        assert_eq!(p.chunks_done(), 2);
        assert!((p.percentage() - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_file_is_complete() {
        let p = TransferProgress::new(0);
        assert_eq!(p.percentage(), 100.0);
    }

    #[test]
    fn speed_needs_two_samples() {
        let calc = SpeedCalculator::new(None, None);
        assert_eq!(calc.bytes_per_second(), 0.0);
        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn speed_and_eta_positive() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.add_sample(500);
        std::thread::sleep(Duration::from_millis(20));
        calc.add_sample(500);

        assert!(calc.bytes_per_second() > 0.0);
        assert!(calc.eta(10_000).is_some());
    }

    #[test]
    fn sample_count_is_bounded() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.add_sample(i);
        }
        assert!(calc.inner.lock().unwrap().samples.len() <= 5);
    }

    #[test]
    fn concurrent_recording() {
        let p = Arc::new(TransferProgress::new(4000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = Arc::clone(&p);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        p.record_chunk(10);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(p.bytes_done(), 4000);
        assert_eq!(p.chunks_done(), 400);
    }
}
