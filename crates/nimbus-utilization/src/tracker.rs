//! The utilization tracker and its collection cycle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use nimbus_core::NodeId;

use crate::error::{SourceError, TrackerError};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One timestamped utilization reading for a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    /// When the sample was taken.
    pub at: DateTime<Utc>,
    /// CPU utilization percent (0-100).
    pub cpu_percent: f64,
    /// Memory utilization percent (0-100).
    pub memory_percent: f64,
}

impl UtilizationSample {
    /// Creates a sample taken now.
    #[must_use]
    pub fn now(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            at: Utc::now(),
            cpu_percent,
            memory_percent,
        }
    }

    /// Creates a sample with an explicit timestamp.
    #[must_use]
    pub const fn at(at: DateTime<Utc>, cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            at,
            cpu_percent,
            memory_percent,
        }
    }
}

/// Configuration for the utilization tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Maximum samples retained per node window.
    pub window_capacity: usize,
    /// Maximum age of a retained sample.
    pub max_sample_age: Duration,
    /// Minimum samples required before an underutilization verdict.
    pub min_samples: usize,
    /// Upper bound on one collection cycle (source poll + GC).
    pub cycle_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_capacity: 60,
            max_sample_age: Duration::from_secs(3600),
            min_samples: 5,
            cycle_timeout: Duration::from_secs(10),
        }
    }
}

impl TrackerConfig {
    /// Validates this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the window is degenerate.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.window_capacity == 0 {
            return Err(TrackerError::InvalidConfig {
                reason: "window_capacity must be at least 1".into(),
            });
        }
        if self.min_samples == 0 {
            return Err(TrackerError::InvalidConfig {
                reason: "min_samples must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Source of utilization samples for the whole fleet.
///
/// The real implementation scrapes a metrics agent per node; tests use a
/// closure-backed fake. A hanging source is cut off by the tracker's
/// cycle timeout, never by the caller's own deadline.
pub trait SampleSource: Send + Sync {
    /// Fetches one sample per live node.
    fn sample<'a>(&'a self)
    -> BoxFuture<'a, Result<Vec<(NodeId, UtilizationSample)>, SourceError>>;
}

/// Outcome of one collection cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CycleOutcome {
    /// Samples recorded this cycle.
    pub recorded: usize,
    /// Node windows removed by garbage collection.
    pub gc_removed: usize,
    /// Whether the source poll hit the cycle timeout.
    pub timed_out: bool,
    /// Source error, if the poll failed.
    pub source_error: Option<String>,
}

/// Thread-safe per-node rolling utilization history.
///
/// Reads copy data out; callers never receive references into the
/// internal windows.
#[derive(Debug)]
pub struct UtilizationTracker {
    config: TrackerConfig,
    windows: RwLock<HashMap<NodeId, VecDeque<UtilizationSample>>>,
}

impl Default for UtilizationTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl UtilizationTracker {
    /// Creates a tracker with the given configuration.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the tracker configuration.
    #[must_use]
    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Appends a sample to the node's window, trimming by capacity and age.
    pub fn record(&self, node: &NodeId, sample: UtilizationSample) {
        let cutoff = sample.at
            - chrono::Duration::from_std(self.config.max_sample_age)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));

        let mut windows = self.windows.write();
        let window = windows.entry(node.clone()).or_default();
        window.push_back(sample);
        while window.len() > self.config.window_capacity {
            window.pop_front();
        }
        while window.front().is_some_and(|s| s.at < cutoff) {
            window.pop_front();
        }
    }

    /// Whether the node's average utilization sits below both thresholds.
    ///
    /// Returns `false` when fewer than `min_samples` samples exist, so new
    /// nodes are never flagged on thin evidence.
    #[must_use]
    pub fn underutilized(&self, node: &NodeId, cpu_threshold: f64, memory_threshold: f64) -> bool {
        let windows = self.windows.read();
        let Some(window) = windows.get(node) else {
            return false;
        };
        if window.len() < self.config.min_samples {
            return false;
        }
        let len = window.len() as f64;
        let cpu_avg = window.iter().map(|s| s.cpu_percent).sum::<f64>() / len;
        let mem_avg = window.iter().map(|s| s.memory_percent).sum::<f64>() / len;
        cpu_avg < cpu_threshold && mem_avg < memory_threshold
    }

    /// Average (cpu%, memory%) over the node's window, if any samples exist.
    #[must_use]
    pub fn average(&self, node: &NodeId) -> Option<(f64, f64)> {
        let windows = self.windows.read();
        let window = windows.get(node)?;
        if window.is_empty() {
            return None;
        }
        let len = window.len() as f64;
        let cpu = window.iter().map(|s| s.cpu_percent).sum::<f64>() / len;
        let mem = window.iter().map(|s| s.memory_percent).sum::<f64>() / len;
        Some((cpu, mem))
    }

    /// Deep copy of the node's current window.
    #[must_use]
    pub fn snapshot(&self, node: &NodeId) -> Vec<UtilizationSample> {
        self.windows
            .read()
            .get(node)
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of samples currently held for the node.
    #[must_use]
    pub fn sample_count(&self, node: &NodeId) -> usize {
        self.windows.read().get(node).map_or(0, VecDeque::len)
    }

    /// Node IDs with at least one retained sample.
    #[must_use]
    pub fn tracked_nodes(&self) -> Vec<NodeId> {
        self.windows.read().keys().cloned().collect()
    }

    /// Drops windows for nodes absent from `live`, returning how many
    /// were removed.
    ///
    /// This is the tracker's only garbage-collection entry point; it is
    /// invoked once per collection cycle.
    pub fn garbage_collect(&self, live: &HashSet<NodeId>) -> usize {
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|node, _| live.contains(node));
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, tracked = windows.len(), "garbage-collected windows");
        }
        removed
    }

    /// Runs one collection cycle: poll the source under the cycle
    /// timeout, record whatever arrived, then garbage-collect against
    /// `live`.
    ///
    /// Source failures and timeouts are logged and absorbed; they never
    /// abort the caller's reconcile.
    pub async fn collect_cycle(
        &self,
        source: &dyn SampleSource,
        live: &HashSet<NodeId>,
    ) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();

        match tokio::time::timeout(self.config.cycle_timeout, source.sample()).await {
            Ok(Ok(samples)) => {
                for (node, sample) in samples {
                    // Samples for nodes already gone are not worth keeping.
                    if live.contains(&node) {
                        self.record(&node, sample);
                        outcome.recorded += 1;
                    }
                }
            }
            Ok(Err(err)) => {
                warn!(error = %err, "sample source failed; skipping cycle");
                outcome.source_error = Some(err.to_string());
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.cycle_timeout.as_secs(),
                    "sample source timed out; skipping cycle"
                );
                outcome.timed_out = true;
            }
        }

        outcome.gc_removed = self.garbage_collect(live);
        outcome
    }
}
