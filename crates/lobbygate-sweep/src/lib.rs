//! Fixed-interval cleanup scheduler for lobbygate.
//!
//! Expired sessions and idle rate-limit windows are purged by an explicit
//! periodic task, not as a side effect of unrelated writes. Each store that
//! needs purging implements [`SweepTarget`]; the [`CleanupScheduler`] calls
//! every registered target once per interval.
//!
//! # Failure model
//!
//! A sweep never fails the host process. A target that returns an error or
//! exceeds its time budget is logged, counted in [`SweepMetrics`], and the
//! remaining targets still run. The next interval tries again.
//!
//! # Integration
//!
//! ```ignore
//! let scheduler = CleanupScheduler::new(SweepConfig::default())
//!     .with_target(broker.clone())
//!     .with_target(limiter.clone());
//! let handle = scheduler.spawn();
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, info, trace, warn};

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Why a single target's sweep failed.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// The target's store could not be reached (lock deadline, storage).
    #[error("{0} unavailable")]
    Unavailable(String),

    /// The target did not finish within `SweepConfig::target_timeout`.
    #[error("sweep exceeded {0:?}")]
    TimedOut(Duration),
}

/// A store with entries that expire and must be purged periodically.
///
/// The future is boxed so targets can live behind `Arc<dyn SweepTarget>`
/// in one scheduler. Implementations must take the same lock their
/// request path takes, so an entry is never removed halfway through a
/// request that is using it.
pub trait SweepTarget: Send + Sync + 'static {
    /// Short name used in logs (`"sessions"`, `"rate-windows"`).
    fn name(&self) -> &'static str;

    /// Removes every expired entry and returns how many were removed.
    fn sweep(&self) -> BoxFuture<'_, Result<usize, SweepError>>;
}

impl<T: SweepTarget> SweepTarget for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn sweep(&self) -> BoxFuture<'_, Result<usize, SweepError>> {
        (**self).sweep()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the cleanup scheduler.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between sweeps. Default: 60 seconds.
    pub interval: Duration,
    /// Upper bound on random delay added to the first sweep, so several
    /// gateway processes started together don't sweep in lockstep.
    pub initial_jitter: Duration,
    /// Time budget for a single target. Default: 5 seconds.
    pub target_timeout: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_jitter: Duration::from_secs(5),
            target_timeout: Duration::from_secs(5),
        }
    }
}

impl SweepConfig {
    /// Shortest interval the scheduler will run at.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

    /// Config with the given interval and no jitter.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            initial_jitter: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values. Called by [`CleanupScheduler::new`].
    ///
    /// - `interval` raised to [`Self::MIN_INTERVAL`].
    /// - `target_timeout` capped to `interval`.
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                "sweep interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        if self.target_timeout > self.interval {
            self.target_timeout = self.interval;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counters updated after every sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepMetrics {
    /// Sweeps completed (one sweep = every target once).
    pub total_sweeps: u64,
    /// Entries purged across all sweeps.
    pub total_purged: u64,
    /// Target failures (errors and timeouts).
    pub total_failures: u64,
    /// Entries purged by the most recent sweep.
    pub last_purged: usize,
    /// Wall time of the most recent sweep.
    pub last_duration: Duration,
    /// Longest sweep observed.
    pub max_duration: Duration,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Runs every registered [`SweepTarget`] on a fixed interval.
pub struct CleanupScheduler {
    config: SweepConfig,
    targets: Vec<Arc<dyn SweepTarget>>,
    next_sweep: TokioInstant,
    metrics: SweepMetrics,
}

impl CleanupScheduler {
    /// Creates a scheduler with no targets. The first sweep is due one
    /// interval from now, plus jitter.
    pub fn new(config: SweepConfig) -> Self {
        let config = config.validated();

        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max = config.initial_jitter.as_millis() as u64;
            Duration::from_millis(rand::rng().random_range(0..=max))
        };

        debug!(
            interval_ms = config.interval.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            "cleanup scheduler created"
        );

        Self {
            next_sweep: TokioInstant::now() + config.interval + jitter,
            config,
            targets: Vec::new(),
            metrics: SweepMetrics::default(),
        }
    }

    /// Registers a target (builder style).
    pub fn with_target(mut self, target: impl SweepTarget) -> Self {
        self.add_target(target);
        self
    }

    /// Registers a target.
    pub fn add_target(&mut self, target: impl SweepTarget) {
        self.targets.push(Arc::new(target));
    }

    /// Runs every target once and returns the total number of purged
    /// entries.
    ///
    /// Never fails: a failing or slow target is logged and skipped.
    pub async fn sweep(&mut self) -> usize {
        let started = Instant::now();
        let mut purged = 0usize;

        for target in &self.targets {
            let outcome = match time::timeout(self.config.target_timeout, target.sweep()).await {
                Ok(result) => result,
                Err(_) => Err(SweepError::TimedOut(self.config.target_timeout)),
            };

            match outcome {
                Ok(n) => {
                    trace!(sweep_target = target.name(), purged = n, "target swept");
                    purged += n;
                }
                Err(e) => {
                    self.metrics.total_failures += 1;
                    warn!(sweep_target = target.name(), error = %e, "sweep failed, continuing");
                }
            }
        }

        let elapsed = started.elapsed();
        self.metrics.total_sweeps += 1;
        self.metrics.total_purged += purged as u64;
        self.metrics.last_purged = purged;
        self.metrics.last_duration = elapsed;
        if elapsed > self.metrics.max_duration {
            self.metrics.max_duration = elapsed;
        }

        if purged > 0 {
            info!(purged, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "cleanup sweep finished");
        } else {
            debug!("cleanup sweep found nothing to purge");
        }

        purged
    }

    /// Waits until the next sweep is due.
    ///
    /// A sweep that runs late does not cause a burst of catch-up sweeps:
    /// the following deadline is always scheduled from now.
    pub async fn wait_for_sweep(&mut self) {
        time::sleep_until(self.next_sweep).await;
        self.schedule_next();
    }

    fn schedule_next(&mut self) {
        self.next_sweep = TokioInstant::now() + self.config.interval;
    }

    /// Sweeps forever on the configured interval.
    pub async fn run(mut self) {
        info!(targets = self.targets.len(), "cleanup scheduler running");
        loop {
            self.wait_for_sweep().await;
            self.sweep().await;
        }
    }

    /// Sweeps on the configured interval until `shutdown` resolves.
    pub async fn run_until(mut self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            let due = self.next_sweep;
            tokio::select! {
                _ = &mut shutdown => {
                    info!("cleanup scheduler stopped");
                    return;
                }
                _ = time::sleep_until(due) => {}
            }
            self.schedule_next();
            self.sweep().await;
        }
    }

    /// Spawns [`run`](Self::run) onto the Tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Number of registered targets.
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// The validated interval.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Snapshot of current metrics.
    pub fn metrics(&self) -> &SweepMetrics {
        &self.metrics
    }
}
