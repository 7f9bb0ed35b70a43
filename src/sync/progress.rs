use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

type Observer = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Progress side channel of a running job.
///
/// Clones share counters and the cancellation flag, so the caller keeps one
/// handle while the job advances another.
#[derive(Clone, Default)]
pub struct SyncProgress {
    processed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
    cancelled: Arc<AtomicBool>,
    bar: Option<ProgressBar>,
    observer: Option<Observer>,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a terminal progress bar (hidden when quiet)
    pub fn with_bar(mut self, quiet: bool) -> Self {
        let pb = if quiet {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(0);
            if let Ok(style) =
                ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        };
        self.bar = Some(pb);
        self
    }

    /// Call `observer(processed, total)` after every entity
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn start(&self, total: usize) {
        self.processed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        if let Some(pb) = &self.bar {
            pb.set_length(total as u64);
            pb.set_position(0);
        }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        if let Some(pb) = &self.bar {
            pb.set_message(message.into());
        }
    }

    /// Record one processed entity
    pub fn advance(&self) {
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);
        if let Some(pb) = &self.bar {
            pb.inc(1);
        }
        if let Some(observer) = &self.observer {
            observer(processed, total);
        }
    }

    pub fn finish(&self, message: &'static str) {
        if let Some(pb) = &self.bar {
            pb.finish_with_message(message);
        }
    }

    /// Request cooperative cancellation; honoured at the next entity boundary
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Fraction complete in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            total => self.processed() as f64 / total as f64,
        }
    }
}

impl std::fmt::Debug for SyncProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncProgress")
            .field("processed", &self.processed())
            .field("total", &self.total())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
