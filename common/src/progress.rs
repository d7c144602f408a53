use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

/// Shared handle for watching and cancelling a long running job from another
/// thread.
#[derive(Clone)]
pub struct Progress(Arc<ProgressInner>);

struct ProgressInner {
    complete: AtomicU64,
    total: AtomicU64,
    cancelled: AtomicBool,
}

impl Progress {
    pub fn new() -> Self {
        Self(Arc::new(ProgressInner {
            complete: AtomicU64::new(0),
            total: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        }))
    }

    pub fn progress(&self) -> f32 {
        let total = self.0.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }

        self.0.complete.load(Ordering::Relaxed) as f32 / total as f32
    }

    pub fn complete(&self) -> bool {
        let total = self.0.total.load(Ordering::Relaxed);
        if total == 0 {
            return false;
        }

        self.0.complete.load(Ordering::Relaxed) >= total
    }

    pub fn completed(&self) -> u64 {
        self.0.complete.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.0.total.load(Ordering::Relaxed)
    }

    pub fn set_total(&self, total: u64) {
        self.0.total.store(total, Ordering::Relaxed);
    }

    pub fn set_complete(&self, complete: u64) {
        self.0.complete.store(complete, Ordering::Relaxed);
    }

    /// Marks one more unit of work as done, returning the new count.
    pub fn add_complete(&self, count: u64) -> u64 {
        self.0.complete.fetch_add(count, Ordering::Relaxed) + count
    }

    pub fn set_finished(&self) {
        let total = self.0.total.load(Ordering::Relaxed);
        self.0.complete.store(total, Ordering::Relaxed);
    }

    /// Asks the job to stop at the next layer boundary.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Relaxed)
    }
}

/// Status of a layer loop, handed to a [`ProgressSink`] after every layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerProgress {
    /// Index of the layer that was just finished.
    pub layer: usize,
    pub total: usize,
    pub z: f32,
    pub percent: f32,
}

/// Receives progress from a running slice. Returning `true` from
/// [`ProgressSink::report`] asks the loop to stop before the next layer.
pub trait ProgressSink {
    fn report(&mut self, progress: LayerProgress) -> bool;
}

impl<F: FnMut(LayerProgress) -> bool> ProgressSink for F {
    fn report(&mut self, progress: LayerProgress) -> bool {
        self(progress)
    }
}

impl ProgressSink for Progress {
    fn report(&mut self, progress: LayerProgress) -> bool {
        self.set_total(progress.total as u64);
        self.set_complete(progress.layer as u64 + 1);
        self.cancelled()
    }
}

impl LayerProgress {
    pub fn new(layer: usize, total: usize, z: f32) -> Self {
        Self {
            layer,
            total,
            z,
            percent: (layer + 1) as f32 / total.max(1) as f32 * 100.0,
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{LayerProgress, Progress, ProgressSink};

    #[test]
    fn counts_and_cancels() {
        let progress = Progress::new();
        assert_eq!(progress.progress(), 0.0);
        assert!(!progress.complete());

        progress.set_total(4);
        let other = progress.clone();
        assert_eq!(other.add_complete(1), 1);
        assert_eq!(progress.add_complete(1), 2);
        assert_eq!(progress.progress(), 0.5);

        other.cancel();
        assert!(progress.cancelled());

        progress.set_finished();
        assert!(progress.complete());
    }

    #[test]
    fn sinks() {
        let mut progress = Progress::new();
        assert!(!progress.report(LayerProgress::new(1, 4, 0.6)));
        assert_eq!(progress.completed(), 2);
        assert_eq!(progress.progress(), 0.5);

        progress.cancel();
        assert!(progress.report(LayerProgress::new(2, 4, 0.9)));

        let mut seen = Vec::new();
        let mut sink = |x: LayerProgress| {
            seen.push(x.percent);
            x.layer >= 1
        };
        assert!(!sink.report(LayerProgress::new(0, 4, 0.3)));
        assert!(sink.report(LayerProgress::new(1, 4, 0.6)));
        assert_eq!(seen, [25.0, 50.0]);
    }
}
