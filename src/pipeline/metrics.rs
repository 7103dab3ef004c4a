//! Query progress and timing metrics.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for one query run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Work units that produced a chunk mosaic
    pub work_units_completed: AtomicU64,

    /// Work units that finished without any usable data
    pub work_units_empty: AtomicU64,

    /// Sub-ranges fetched from the catalog
    pub subranges_fetched: AtomicU64,

    /// Sub-ranges skipped for lacking the quality band or compositor inputs
    pub subranges_skipped: AtomicU64,

    /// Acquisition slices loaded
    pub slices_read: AtomicU64,

    /// Pixels loaded, summed over bands and slices
    pub pixels_read: AtomicU64,

    /// Queries that ended in an unexpected error
    pub failures: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-phase timing (in microseconds for precision)
    /// Time spent fetching from the catalog (microseconds)
    pub fetch_us: AtomicU64,

    /// Time spent deriving clean masks (microseconds)
    pub mask_us: AtomicU64,

    /// Time spent in per-chunk kernels (microseconds)
    pub fold_us: AtomicU64,

    /// Time spent reading and writing scratch (microseconds)
    pub scratch_us: AtomicU64,

    /// Time spent assembling and combining groups (microseconds)
    pub combine_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn add_work_unit_completed(&self) {
        self.work_units_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_work_unit_empty(&self) {
        self.work_units_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_subrange_fetched(&self) {
        self.subranges_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_subrange_skipped(&self) {
        self.subranges_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_slices_read(&self, count: u64) {
        self.slices_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_pixels_read(&self, count: u64) {
        self.pixels_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_fetch_time(&self, duration: Duration) {
        self.fetch_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_mask_time(&self, duration: Duration) {
        self.mask_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_fold_time(&self, duration: Duration) {
        self.fold_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_scratch_time(&self, duration: Duration) {
        self.scratch_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_combine_time(&self, duration: Duration) {
        self.combine_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Finished work units (completed or empty) per second.
    pub fn work_units_per_second(&self) -> f64 {
        let done = self.work_units_completed.load(Ordering::Relaxed)
            + self.work_units_empty.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            done as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let secs = |us: &AtomicU64| us.load(Ordering::Relaxed) as f64 / 1_000_000.0;

        MetricsSnapshot {
            work_units_completed: self.work_units_completed.load(Ordering::Relaxed),
            work_units_empty: self.work_units_empty.load(Ordering::Relaxed),
            subranges_fetched: self.subranges_fetched.load(Ordering::Relaxed),
            subranges_skipped: self.subranges_skipped.load(Ordering::Relaxed),
            slices_read: self.slices_read.load(Ordering::Relaxed),
            pixels_read: self.pixels_read.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            work_units_per_second: self.work_units_per_second(),
            fetch_secs: secs(&self.fetch_us),
            mask_secs: secs(&self.mask_us),
            fold_secs: secs(&self.fold_us),
            scratch_secs: secs(&self.scratch_us),
            combine_secs: secs(&self.combine_us),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub work_units_completed: u64,
    pub work_units_empty: u64,
    pub subranges_fetched: u64,
    pub subranges_skipped: u64,
    pub slices_read: u64,
    pub pixels_read: u64,
    pub failures: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub work_units_per_second: f64,
    /// Catalog fetch time (seconds, summed across tasks)
    pub fetch_secs: f64,
    pub mask_secs: f64,
    pub fold_secs: f64,
    pub scratch_secs: f64,
    pub combine_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }

    fn phase_total(&self) -> f64 {
        self.fetch_secs + self.mask_secs + self.fold_secs + self.scratch_secs + self.combine_secs
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.phase_total();
        let pct = |secs: f64| if total > 0.0 { secs / total * 100.0 } else { 0.0 };

        write!(
            f,
            "Work units: {} done, {} empty | Sub-ranges: {} fetched, {} skipped | \
             Slices: {} | Rate: {:.1} units/s | Failures: {} | Elapsed: {:.1}s | \
             Time: fetch {:.0}% | mask {:.0}% | fold {:.0}% | scratch {:.0}% | combine {:.0}%",
            self.work_units_completed,
            self.work_units_empty,
            self.subranges_fetched,
            self.subranges_skipped,
            self.slices_read,
            self.work_units_per_second,
            self.failures,
            self.elapsed.as_secs_f64(),
            pct(self.fetch_secs),
            pct(self.mask_secs),
            pct(self.fold_secs),
            pct(self.scratch_secs),
            pct(self.combine_secs),
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_work_units: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_work_units: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_work_units,
        }
    }

    /// Log progress every interval until `shutdown` fires.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if self.total_work_units > 0 {
                        (snapshot.work_units_completed + snapshot.work_units_empty) as f64
                            / self.total_work_units as f64
                            * 100.0
                    } else {
                        0.0
                    };

                    tracing::info!("[{:.1}%] {}", progress, snapshot);
                }
                _ = shutdown.recv() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("Final: {}", snapshot);
                    break;
                }
            }
        }
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        println!("\n=== Query Summary ===");
        println!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        println!(
            "Work units: {} completed, {} empty of {}",
            snapshot.work_units_completed, snapshot.work_units_empty, self.total_work_units
        );
        println!(
            "Sub-ranges: {} fetched, {} skipped",
            snapshot.subranges_fetched, snapshot.subranges_skipped
        );
        println!("Slices read: {}", snapshot.slices_read);
        println!("Pixels read: {}", snapshot.pixels_read);
        println!("Failures: {}", snapshot.failures);

        let total = snapshot.phase_total();
        if total > 0.0 {
            println!("\n--- Phase Time Breakdown ---");
            for (name, secs) in [
                ("Fetch", snapshot.fetch_secs),
                ("Mask", snapshot.mask_secs),
                ("Fold", snapshot.fold_secs),
                ("Scratch", snapshot.scratch_secs),
                ("Combine", snapshot.combine_secs),
            ] {
                println!("{:<9} {:>7.2}s ({:>5.1}%)", name, secs, secs / total * 100.0);
            }
        }
        println!("=====================\n");
    }
}
