use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use rivulet_protocol::DownloadProgress;

use crate::DownloadCtrl;

/// Default progress notification interval.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Callback invoked with download progress.
pub type ProgressCallback = Box<dyn Fn(DownloadProgress) + Send + Sync>;

/// Tracks multiple downloads and notifies callbacks periodically.
///
/// A download that has reached a terminal status is reported one last time
/// and then untracked.
pub struct ProgressTracker {
    inner: Arc<RwLock<TrackerInner>>,
    stop: Arc<Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
}

struct TrackerInner {
    callbacks: Vec<ProgressCallback>,
    downloads: HashMap<String, Tracked>,
    interval: Duration,
}

struct Tracked {
    ctrl: DownloadCtrl,
    speed: SpeedCalculator,
}

impl Tracked {
    fn sample(&self) -> DownloadProgress {
        let mut progress = self.ctrl.progress();
        self.speed.observe(progress.transferred_bytes);
        progress.bytes_per_second = self.speed.bytes_per_second();
        progress
    }
}

impl TrackerInner {
    /// Notifies every callback about every download, dropping finished ones.
    fn tick(&mut self) {
        let mut finished = Vec::new();
        for (id, tracked) in &self.downloads {
            let progress = tracked.sample();
            if progress.status.is_terminal() {
                finished.push(id.clone());
            }
            for cb in &self.callbacks {
                cb(progress.clone());
            }
        }
        for id in finished {
            self.downloads.remove(&id);
        }
    }
}

impl ProgressTracker {
    /// Creates a new tracker with the given notification interval.
    ///
    /// If `interval` is `None`, defaults to 500 ms.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TrackerInner {
                callbacks: Vec::new(),
                downloads: HashMap::new(),
                interval: interval.unwrap_or(DEFAULT_INTERVAL),
            })),
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Registers a progress callback.
    pub fn on_progress(&self, callback: ProgressCallback) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.callbacks.push(callback);
    }

    /// Begins tracking a download.
    pub fn track(&self, ctrl: DownloadCtrl) {
        let id = ctrl.id().to_string();
        let speed = SpeedCalculator::new(None, None);
        speed.observe(ctrl.done_bytes());
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.downloads.insert(id, Tracked { ctrl, speed });
    }

    /// Stops tracking a download.
    pub fn untrack(&self, download_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.downloads.remove(download_id);
    }

    /// Returns a tracked download by ID.
    pub fn get(&self, download_id: &str) -> Option<DownloadCtrl> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.downloads.get(download_id).map(|t| t.ctrl.clone())
    }

    /// Number of downloads currently tracked.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.downloads.len()
    }

    /// Returns `true` when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends a one-time progress notification for a download.
    pub fn notify_progress(&self, download_id: &str) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(tracked) = inner.downloads.get(download_id) {
            let progress = tracked.sample();
            for cb in &inner.callbacks {
                cb(progress.clone());
            }
        }
    }

    /// Starts periodic progress notifications in a background tokio task.
    ///
    /// Must be called from within a tokio runtime. Call
    /// [`stop`](Self::stop) to cancel.
    pub fn start(&self) {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        {
            let mut stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
            // Stop any existing task.
            drop(stop.take());
            *stop = Some(tx);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let interval = {
                let i = inner.read().unwrap_or_else(PoisonError::into_inner);
                i.interval
            };
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut i = inner.write().unwrap_or_else(PoisonError::into_inner);
                        i.tick();
                    }
                    _ = &mut rx => {
                        break;
                    }
                }
            }
        });
    }

    /// Stops the periodic notification task.
    pub fn stop(&self) {
        let mut stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
        // Dropping the sender signals the task to exit.
        drop(stop.take());
    }
}

/// Byte rate of a download over the last few seconds.
///
/// Fed with the download's running byte counter rather than per-tick deltas,
/// so a resumed download (whose counter starts at the resume offset) does not
/// report the skipped prefix as throughput.
pub struct SpeedCalculator {
    inner: Mutex<Window>,
}

struct Window {
    /// `(when, counter)` pairs, oldest first.
    points: VecDeque<(Instant, u64)>,
    span: Duration,
    capacity: usize,
}

impl Window {
    fn push(&mut self, at: Instant, counter: u64) {
        self.points.push_back((at, counter));
        while self.points.len() > self.capacity.max(2) {
            self.points.pop_front();
        }
        // Keep one point older than the span as the rate's baseline.
        while self.points.len() > 2
            && self
                .points
                .get(1)
                .is_some_and(|&(t, _)| at.saturating_duration_since(t) >= self.span)
        {
            self.points.pop_front();
        }
    }

    fn rate(&self) -> f64 {
        let (Some(&(t0, c0)), Some(&(t1, c1))) = (self.points.front(), self.points.back()) else {
            return 0.0;
        };
        let elapsed = t1.saturating_duration_since(t0);
        if elapsed.is_zero() {
            return 0.0;
        }
        c1.saturating_sub(c0) as f64 / elapsed.as_secs_f64()
    }
}

impl SpeedCalculator {
    /// Creates a calculator averaging over `window_size` (default 5 s) and
    /// keeping at most `max_samples` observations (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Window {
                points: VecDeque::new(),
                span: window_size.unwrap_or(Duration::from_secs(5)),
                capacity: max_samples.unwrap_or(100),
            }),
        }
    }

    /// Records the current value of the download's byte counter.
    pub fn observe(&self, done_bytes: u64) {
        self.observe_at(Instant::now(), done_bytes);
    }

    fn observe_at(&self, at: Instant, done_bytes: u64) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(at, done_bytes);
    }

    /// Bytes per second between the oldest and newest observation, or 0.0
    /// with fewer than two observations.
    pub fn bytes_per_second(&self) -> f64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rate()
    }

    /// Time left for `remaining_bytes` at the current rate.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining_bytes as f64 / rate))
    }

    pub fn reset(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .points
            .clear();
    }
}
