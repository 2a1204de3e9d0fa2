//! Progress tracking and callbacks for registration runs.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Progress of one registration iteration.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Current iteration number.
    pub iteration: usize,
    /// Maximum number of iterations.
    pub total_iterations: Option<usize>,
    /// Total energy of the current iterate.
    pub energy: f64,
    /// Time elapsed since start.
    pub elapsed: Duration,
    /// Estimated remaining time.
    pub estimated_remaining: Option<Duration>,
    /// Current learning rate.
    pub learning_rate: f64,
    /// Additional metrics (energy terms, gradient norm).
    pub metrics: Vec<(String, f64)>,
}

impl ProgressInfo {
    pub fn new(
        iteration: usize,
        total_iterations: Option<usize>,
        energy: f64,
        elapsed: Duration,
        learning_rate: f64,
    ) -> Self {
        Self {
            iteration,
            total_iterations,
            energy,
            elapsed,
            estimated_remaining: None,
            learning_rate,
            metrics: Vec::new(),
        }
    }

    /// Progress percentage.
    pub fn progress_percent(&self) -> Option<f64> {
        self.total_iterations
            .filter(|total| *total > 0)
            .map(|total| (self.iteration as f64 / total as f64) * 100.0)
    }

    /// Extrapolate the remaining time from the average time per iteration.
    pub fn calculate_remaining(&mut self) {
        if let Some(total) = self.total_iterations {
            if self.iteration > 0 {
                let per_iteration = self.elapsed.as_secs_f64() / self.iteration as f64;
                let remaining = total.saturating_sub(self.iteration);
                self.estimated_remaining =
                    Some(Duration::from_secs_f64(per_iteration * remaining as f64));
            }
        }
    }

    pub fn add_metric(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.push((name.into(), value));
    }
}

/// Observer of registration progress.
pub trait ProgressCallback: Send + Sync {
    /// Called after every iteration.
    fn on_progress(&self, info: &ProgressInfo);

    fn on_start(&self) {}

    fn on_complete(&self, _info: &ProgressInfo) {}

    fn on_error(&self, _error: &str) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Logs progress through `tracing` every `log_interval` iterations.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    pub log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 50 }
    }
}

impl ConsoleProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.iteration % self.log_interval == 0 || info.total_iterations == Some(info.iteration) {
            let remaining = info
                .estimated_remaining
                .map(|d| format!("{:.2}s", d.as_secs_f64()))
                .unwrap_or_else(|| "N/A".to_string());

            tracing::debug!(
                "Iter {}/{} ({:.1}%) | Energy: {:.6} | LR: {:.2e} | Elapsed: {:.2}s | ETA: {}",
                info.iteration,
                info.total_iterations
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "?".to_string()),
                info.progress_percent().unwrap_or(0.0),
                info.energy,
                info.learning_rate,
                info.elapsed.as_secs_f64(),
                remaining
            );
            for (name, value) in &info.metrics {
                tracing::trace!("  {}: {:.6}", name, value);
            }
        }
    }

    fn on_complete(&self, info: &ProgressInfo) {
        tracing::debug!(
            "Registration finished after {} iterations in {:.2}s with energy {:.6}",
            info.iteration,
            info.elapsed.as_secs_f64(),
            info.energy
        );
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Registration failed: {}", error);
    }
}

/// Records every progress report.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_history(&self) -> Vec<ProgressInfo> {
        lock(&self.history).clone()
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        lock(&self.history).push(info.clone());
    }
}

#[derive(Debug)]
struct EarlyStoppingState {
    counter: usize,
    best_energy: f64,
    should_stop: bool,
}

impl Default for EarlyStoppingState {
    fn default() -> Self {
        Self {
            counter: 0,
            best_energy: f64::INFINITY,
            should_stop: false,
        }
    }
}

/// Signals a stop once the energy stalls for `patience` iterations.
#[derive(Debug, Clone)]
pub struct EarlyStoppingCallback {
    /// Minimum decrease of the energy counted as improvement.
    pub min_improvement: f64,
    /// Iterations without improvement before stopping.
    pub patience: usize,
    /// Stop as soon as the energy falls below this value.
    pub min_energy: Option<f64>,
    state: Arc<Mutex<EarlyStoppingState>>,
}

impl EarlyStoppingCallback {
    pub fn new(min_improvement: f64, patience: usize) -> Self {
        Self {
            min_improvement,
            patience,
            min_energy: None,
            state: Arc::default(),
        }
    }

    pub fn with_min_energy(mut self, min_energy: f64) -> Self {
        self.min_energy = Some(min_energy);
        self
    }

    pub fn should_stop(&self) -> bool {
        lock(&self.state).should_stop
    }

    pub fn reset(&self) {
        *lock(&self.state) = EarlyStoppingState::default();
    }
}

impl ProgressCallback for EarlyStoppingCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        let mut state = lock(&self.state);

        if let Some(min_energy) = self.min_energy {
            if info.energy <= min_energy {
                state.should_stop = true;
                tracing::debug!(
                    "Early stopping: energy {} reached threshold {}",
                    info.energy,
                    min_energy
                );
                return;
            }
        }

        if state.best_energy - info.energy > self.min_improvement {
            state.best_energy = info.energy;
            state.counter = 0;
        } else {
            state.counter += 1;
        }

        if state.counter >= self.patience && !state.should_stop {
            state.should_stop = true;
            tracing::debug!(
                "Early stopping: no improvement for {} iterations (best energy: {:.6}, current: {:.6})",
                self.patience,
                state.best_energy,
                info.energy
            );
        }
    }
}

/// Dispatches progress reports to a set of callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    start_time: Option<Instant>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    pub fn with_callbacks(mut self, callbacks: impl IntoIterator<Item = Arc<dyn ProgressCallback>>) -> Self {
        self.callbacks.extend(callbacks);
        self
    }

    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
        for callback in &self.callbacks {
            callback.on_start();
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    /// Report an iteration; extra metrics are attached to the report.
    pub fn update(
        &self,
        iteration: usize,
        total_iterations: Option<usize>,
        energy: f64,
        learning_rate: f64,
        metrics: &[(&str, f64)],
    ) {
        let mut info =
            ProgressInfo::new(iteration, total_iterations, energy, self.elapsed(), learning_rate);
        for (name, value) in metrics {
            info.add_metric(*name, *value);
        }
        info.calculate_remaining();

        for callback in &self.callbacks {
            callback.on_progress(&info);
        }
    }

    pub fn complete(&self, iterations: usize, energy: f64, learning_rate: f64) {
        let info = ProgressInfo::new(iterations, Some(iterations), energy, self.elapsed(), learning_rate);
        for callback in &self.callbacks {
            callback.on_complete(&info);
        }
    }

    pub fn error(&self, error: &str) {
        for callback in &self.callbacks {
            callback.on_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_info() {
        let info = ProgressInfo::new(10, Some(100), 0.5, Duration::from_secs(10), 0.01);
        assert_eq!(info.iteration, 10);
        assert_eq!(info.energy, 0.5);
        assert_eq!(info.progress_percent(), Some(10.0));
    }

    #[test]
    fn test_progress_info_remaining() {
        let mut info = ProgressInfo::new(10, Some(100), 0.5, Duration::from_secs(10), 0.01);
        info.calculate_remaining();
        assert_eq!(info.estimated_remaining, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_early_stopping() {
        let callback = EarlyStoppingCallback::new(0.01, 3);

        callback.on_progress(&ProgressInfo::new(1, Some(10), 1.0, Duration::ZERO, 0.01));
        callback.on_progress(&ProgressInfo::new(2, Some(10), 0.9, Duration::ZERO, 0.01));
        callback.on_progress(&ProgressInfo::new(3, Some(10), 0.8, Duration::ZERO, 0.01));
        assert!(!callback.should_stop());

        callback.on_progress(&ProgressInfo::new(4, Some(10), 0.8, Duration::ZERO, 0.01));
        callback.on_progress(&ProgressInfo::new(5, Some(10), 0.8, Duration::ZERO, 0.01));
        callback.on_progress(&ProgressInfo::new(6, Some(10), 0.8, Duration::ZERO, 0.01));
        assert!(callback.should_stop());

        callback.reset();
        assert!(!callback.should_stop());
    }

    #[test]
    fn test_early_stopping_threshold() {
        let callback = EarlyStoppingCallback::new(0.0, 100).with_min_energy(1e-3);
        callback.on_progress(&ProgressInfo::new(1, None, 1e-4, Duration::ZERO, 0.01));
        assert!(callback.should_stop());
    }

    #[test]
    fn test_tracker_dispatches_metrics() {
        let history = Arc::new(HistoryCallback::new());
        let mut tracker = ProgressTracker::new();
        tracker.add_callback(history.clone());
        tracker.start();
        tracker.update(1, Some(10), 0.5, 0.01, &[("norm_gradient", 2.0)]);
        tracker.update(2, Some(10), 0.4, 0.01, &[]);
        tracker.complete(2, 0.4, 0.01);

        let recorded = history.get_history();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].metrics, vec![("norm_gradient".to_string(), 2.0)]);
        assert_eq!(recorded[1].iteration, 2);
    }
}
