//! Batch-size feedback controller with hysteresis.

use crate::memory::sampler::{sample_memory, MemorySample};
use crate::storage::sqlite::acquire_lock;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Maximum number of retained adjustment events.
pub const MAX_HISTORY_ENTRIES: usize = 100;

/// Tuning knobs for [`MemoryOptimizer`].
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Smallest batch size ever returned.
    pub min_batch_size: usize,
    /// Largest batch size ever returned.
    pub max_batch_size: usize,
    /// Starting batch size.
    pub initial_batch_size: usize,
    /// Memory percentage above which adjustment is considered at all.
    pub memory_threshold_pct: f64,
    /// Memory percentage above which the batch size is shrunk.
    ///
    /// Strictly above `memory_threshold_pct`; the gap between the two is the
    /// hysteresis band that prevents oscillation.
    pub gc_threshold_pct: f64,
    /// Multiplier applied when shrinking; its inverse is applied when growing.
    pub adjustment_factor: f64,
    /// Minimum time between fresh memory measurements.
    pub sample_interval: Duration,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_batch_size: 10,
            max_batch_size: 1000,
            initial_batch_size: 100,
            memory_threshold_pct: 75.0,
            gc_threshold_pct: 85.0,
            adjustment_factor: 0.5,
            sample_interval: Duration::from_secs(5),
        }
    }
}

impl OptimizerConfig {
    /// Creates a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch size bounds.
    #[must_use]
    pub const fn with_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_batch_size = min;
        self.max_batch_size = max;
        self
    }

    /// Sets the initial batch size.
    #[must_use]
    pub const fn with_initial_batch_size(mut self, size: usize) -> Self {
        self.initial_batch_size = size;
        self
    }

    /// Sets the adjustment and shrink thresholds.
    #[must_use]
    pub const fn with_thresholds(mut self, memory_pct: f64, gc_pct: f64) -> Self {
        self.memory_threshold_pct = memory_pct;
        self.gc_threshold_pct = gc_pct;
        self
    }

    /// Sets the shrink multiplier.
    #[must_use]
    pub const fn with_adjustment_factor(mut self, factor: f64) -> Self {
        self.adjustment_factor = factor;
        self
    }

    /// Sets the sampling throttle interval.
    #[must_use]
    pub const fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }
}

/// Why a batch-size change happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentReason {
    /// Usage crossed the shrink threshold.
    MemoryPressure,
    /// Usage fell comfortably below the adjustment threshold.
    MemoryRecovered,
}

impl AdjustmentReason {
    /// Returns the reason as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MemoryPressure => "memory_pressure",
            Self::MemoryRecovered => "memory_recovered",
        }
    }
}

impl std::fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded batch-size change.
#[derive(Debug, Clone)]
pub struct AdjustmentEvent {
    /// Batch size before the change.
    pub old_size: usize,
    /// Batch size after the change.
    pub new_size: usize,
    /// What triggered the change.
    pub reason: AdjustmentReason,
    /// Process memory percentage at the time.
    pub process_memory_pct: f64,
    /// System memory percentage at the time.
    pub system_memory_pct: f64,
}

struct OptimizerState {
    current: usize,
    last_sample: MemorySample,
    last_sampled_at: Option<Instant>,
    history: VecDeque<AdjustmentEvent>,
}

/// Memory-aware batch size controller.
///
/// Samples process/system memory (throttled to `sample_interval`), shrinks
/// the batch size under pressure and grows it back once usage is comfortably
/// low. Separate grow/shrink thresholds give the controller hysteresis so it
/// does not oscillate around a single boundary.
///
/// The optimizer holds no storage references; construct one per store (or
/// share via `Arc`) and inject it.
pub struct MemoryOptimizer {
    config: OptimizerConfig,
    state: Mutex<OptimizerState>,
    sampler: Box<dyn Fn() -> MemorySample + Send + Sync>,
}

impl std::fmt::Debug for MemoryOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryOptimizer")
            .field("config", &self.config)
            .field("current", &self.batch_size())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

impl MemoryOptimizer {
    /// Creates an optimizer that samples real process/system memory.
    #[must_use]
    pub fn new(config: OptimizerConfig) -> Self {
        Self::with_sampler(config, sample_memory)
    }

    /// Creates an optimizer with a custom measurement source.
    #[must_use]
    pub fn with_sampler(
        config: OptimizerConfig,
        sampler: impl Fn() -> MemorySample + Send + Sync + 'static,
    ) -> Self {
        let initial = config
            .initial_batch_size
            .clamp(config.min_batch_size, config.max_batch_size);
        Self {
            state: Mutex::new(OptimizerState {
                current: initial,
                last_sample: MemorySample::default(),
                last_sampled_at: None,
                history: VecDeque::new(),
            }),
            config,
            sampler: Box::new(sampler),
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Current batch size without triggering any adjustment.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        acquire_lock(&self.state).current
    }

    /// Copy of the adjustment history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<AdjustmentEvent> {
        acquire_lock(&self.state).history.iter().cloned().collect()
    }

    /// Returns the current memory sample, re-measuring at most once per
    /// `sample_interval`.
    pub fn sample(&self) -> MemorySample {
        let mut state = acquire_lock(&self.state);
        let now = Instant::now();
        let due = state
            .last_sampled_at
            .is_none_or(|at| now.duration_since(at) >= self.config.sample_interval);
        if due {
            state.last_sample = (self.sampler)();
            state.last_sampled_at = Some(now);
        }
        state.last_sample
    }

    /// Whether an adjustment pass is due.
    ///
    /// True only when the sampling interval has elapsed AND the fresh sample
    /// exceeds `memory_threshold_pct`.
    pub fn should_adjust(&self) -> bool {
        {
            let state = acquire_lock(&self.state);
            let due = state
                .last_sampled_at
                .is_none_or(|at| Instant::now().duration_since(at) >= self.config.sample_interval);
            if !due {
                return false;
            }
        }
        self.sample().peak_pct() > self.config.memory_threshold_pct
    }

    /// Applies one adjustment pass and returns the (possibly unchanged)
    /// batch size.
    ///
    /// Above `gc_threshold_pct` the size shrinks by `adjustment_factor`;
    /// comfortably below the adjustment band (60% of `memory_threshold_pct`)
    /// it grows by the inverse factor; in between it stays put.
    pub fn adjust(&self) -> usize {
        let sample = self.sample();
        self.apply_sample(&sample)
    }

    /// Batch size recommendation for the next accumulation window.
    ///
    /// Runs an adjustment pass when one is due, then caps the result so that
    /// `record_size_hint × size` stays within 30% of available memory.
    /// Always within `[min_batch_size, max_batch_size]`.
    pub fn optimal_batch_size(&self, record_size_hint: Option<usize>) -> usize {
        if self.should_adjust() {
            let _ = self.adjust();
        }

        let state = acquire_lock(&self.state);
        let mut size = state.current;

        if let Some(hint) = record_size_hint {
            if hint > 0 && state.last_sample.available_mb > 0.0 {
                let budget_bytes = state.last_sample.available_mb * 1024.0 * 1024.0 * 0.30;
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let cap = (budget_bytes / hint as f64).floor() as usize;
                size = size.min(cap);
            }
        }

        size.clamp(self.config.min_batch_size, self.config.max_batch_size)
    }

    /// Core controller step against one sample.
    fn apply_sample(&self, sample: &MemorySample) -> usize {
        let mut state = acquire_lock(&self.state);
        let peak = sample.peak_pct();
        let current = state.current;

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (target, reason) = if peak >= self.config.gc_threshold_pct {
            (
                (current as f64 * self.config.adjustment_factor).floor() as usize,
                Some(AdjustmentReason::MemoryPressure),
            )
        } else if peak < self.config.memory_threshold_pct * 0.6 {
            (
                (current as f64 / self.config.adjustment_factor).ceil() as usize,
                Some(AdjustmentReason::MemoryRecovered),
            )
        } else {
            (current, None)
        };

        let target = target.clamp(self.config.min_batch_size, self.config.max_batch_size);

        if let Some(reason) = reason {
            if target != current {
                tracing::debug!(
                    old_size = current,
                    new_size = target,
                    reason = %reason,
                    process_pct = sample.process_memory_pct,
                    system_pct = sample.system_memory_pct,
                    "batch size adjusted"
                );
                metrics::counter!(
                    "statehouse_batch_adjustments_total",
                    "reason" => reason.as_str()
                )
                .increment(1);

                if state.history.len() == MAX_HISTORY_ENTRIES {
                    state.history.pop_front();
                }
                state.history.push_back(AdjustmentEvent {
                    old_size: current,
                    new_size: target,
                    reason,
                    process_memory_pct: sample.process_memory_pct,
                    system_memory_pct: sample.system_memory_pct,
                });
                state.current = target;
            }
        }

        state.current
    }
}
