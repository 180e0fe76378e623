use std::collections::HashMap;
use std::time::Instant;

/// Cross-cutting logger for classification run events.
///
/// Decouples the engine from specific output mechanisms (stdout, log crate,
/// test capture) so each caller can observe a run without changing the
/// orchestration code.
pub trait PipelineLogger: Send {
    /// Report per-image progress within a stage.
    fn progress(&mut self, stage: &str, current: usize, total: usize);

    /// Record how long a named stage took.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. identity count, cache hits).
    fn metric(&mut self, name: &str, value: f64);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Log a non-fatal problem (skipped image, excluded identity).
    fn warn(&mut self, message: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent logger that discards all events.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _stage: &str, _current: usize, _total: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
    fn warn(&mut self, _message: &str) {}
}

/// CLI-oriented logger that tracks per-stage timing and metrics and
/// provides a summary report at the end of a run.
///
/// Progress output is throttled to every `throttle_images` images.
pub struct StdoutPipelineLogger {
    throttle_images: usize,
    timings: HashMap<String, Vec<f64>>,
    metrics: HashMap<String, f64>,
    start_time: Instant,
    images_seen: usize,
    warnings: usize,
}

impl StdoutPipelineLogger {
    pub fn new(throttle_images: usize) -> Self {
        Self {
            throttle_images: throttle_images.max(1),
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
            images_seen: 0,
            warnings: 0,
        }
    }

    /// Returns the formatted summary string, or `None` if no data recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let mut lines = vec![format!(
            "Run summary ({} images, {} warnings, {:.1}s total):",
            self.images_seen,
            self.warnings,
            elapsed_ms / 1000.0
        )];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let total_ms: f64 = self.timings[stage].iter().sum();
            let pct = if elapsed_ms > 0.0 {
                total_ms / elapsed_ms * 100.0
            } else {
                0.0
            };
            lines.push(format!("  {stage:18}: {total_ms:8.0}ms  ({pct:4.1}%)"));
        }

        let mut names: Vec<_> = self.metrics.keys().collect();
        names.sort();
        for name in names {
            lines.push(format!("  {name}: {}", self.metrics[name]));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn metric_value(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(25)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, stage: &str, current: usize, total: usize) {
        if current == total {
            self.images_seen += total;
        }
        if total > 0 && (current % self.throttle_images == 0 || current == total) {
            let pct = current as f64 / total as f64 * 100.0;
            log::info!("{stage}: {current}/{total} images ({pct:.1}%)");
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.insert(name.to_string(), value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn warn(&mut self, message: &str) {
        self.warnings += 1;
        log::warn!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_logger_all_methods_are_noop() {
        let mut logger = NullPipelineLogger;
        logger.progress("dataset", 1, 10);
        logger.timing("matching", 5.0);
        logger.metric("identities", 3.0);
        logger.info("hello");
        logger.warn("careful");
        logger.summary();
    }

    #[test]
    fn test_timing_records_values() {
        let mut logger = StdoutPipelineLogger::new(10);
        logger.timing("registry", 20.0);
        logger.timing("registry", 30.0);
        logger.timing("matching", 5.0);

        assert_eq!(logger.timings_for("registry").unwrap(), &[20.0, 30.0]);
        assert_eq!(logger.timings_for("matching").unwrap(), &[5.0]);
        assert!(logger.timings_for("output").is_none());
    }

    #[test]
    fn test_metric_keeps_latest_value() {
        let mut logger = StdoutPipelineLogger::new(10);
        logger.metric("cache_hits", 3.0);
        logger.metric("cache_hits", 4.0);
        assert_eq!(logger.metric_value("cache_hits"), Some(4.0));
    }

    #[test]
    fn test_summary_includes_stages_and_metrics() {
        let mut logger = StdoutPipelineLogger::new(10);
        logger.progress("dataset", 4, 4);
        logger.timing("dataset", 20.0);
        logger.metric("identities", 2.0);
        logger.warn("skipped corrupt.jpg");

        let summary = logger.summary_string().unwrap();
        assert!(summary.contains("Run summary (4 images, 1 warnings"));
        assert!(summary.contains("dataset"));
        assert!(summary.contains("identities: 2"));
    }

    #[test]
    fn test_empty_summary_returns_none() {
        assert!(StdoutPipelineLogger::new(10).summary_string().is_none());
    }

    #[test]
    fn test_default_throttle() {
        assert_eq!(StdoutPipelineLogger::default().throttle_images, 25);
    }
}
