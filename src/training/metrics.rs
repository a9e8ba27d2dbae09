use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::{Result, SsdError};
use crate::training::config::TrainingConfig;

/// Weighted running mean.
#[derive(Debug, Clone, Default)]
pub struct Average {
    sum: f64,
    weight: f64,
}

impl Average {
    pub fn update(&mut self, value: f64, weighting: f64) {
        self.sum += value * weighting;
        self.weight += weighting;
    }

    pub fn value(&self) -> f64 {
        if self.weight > 0.0 {
            self.sum / self.weight
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Holds the last value it was given.
#[derive(Debug, Clone, Default)]
pub struct Simple {
    value: f64,
}

impl Simple {
    pub fn update(&mut self, value: f64) {
        self.value = value;
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Timer {
    started: Option<Instant>,
    last: Duration,
}

impl Timer {
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Stops the running measurement and returns it in seconds.
    pub fn stop(&mut self) -> f64 {
        if let Some(started) = self.started.take() {
            self.last = started.elapsed();
        }
        self.last.as_secs_f64()
    }
}

/// Presentation hints for a plot window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowOptions {
    pub log_y: bool,
}

/// Sink for recorded metric points. Points may be buffered until `flush`.
pub trait Plotter {
    fn add_point(&mut self, window: &str, legend: &str, x: f64, y: f64);
    fn set_window_options(&mut self, window: &str, options: WindowOptions);
    fn show_config(&mut self, config: &TrainingConfig) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub time: usize,
    pub value: f64,
}

/// Run configuration plus every recorded metric point, keyed by
/// `<window>/<legend>`. Points are forwarded to the plotter when one is
/// attached.
#[derive(Serialize)]
pub struct Experiment {
    pub name: String,
    pub config: TrainingConfig,
    pub history: BTreeMap<String, Vec<MetricPoint>>,
    #[serde(skip)]
    plotter: Option<Box<dyn Plotter + Send>>,
}

impl Experiment {
    pub fn new(name: impl Into<String>, config: TrainingConfig) -> Self {
        Self {
            name: name.into(),
            config,
            history: BTreeMap::new(),
            plotter: None,
        }
    }

    /// Attaches a plotter and sends it the configuration. A failed send is
    /// logged and the plotter is kept.
    pub fn plot_on(&mut self, mut plotter: Box<dyn Plotter + Send>) {
        if let Err(e) = plotter.show_config(&self.config) {
            log::warn!("could not publish configuration: {e}");
        }
        self.plotter = Some(plotter);
    }

    pub fn is_plotting(&self) -> bool {
        self.plotter.is_some()
    }

    pub fn set_window_options(&mut self, window: &str, options: WindowOptions) {
        if let Some(plotter) = self.plotter.as_mut() {
            plotter.set_window_options(window, options);
        }
    }

    pub fn record(&mut self, window: &str, legend: &str, time: usize, value: f64) {
        self.history
            .entry(format!("{window}/{legend}"))
            .or_default()
            .push(MetricPoint { time, value });
        if let Some(plotter) = self.plotter.as_mut() {
            plotter.add_point(window, legend, time as f64, value);
        }
    }

    pub fn series(&self, window: &str, legend: &str) -> &[MetricPoint] {
        self.history
            .get(&format!("{window}/{legend}"))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Pushes buffered points. Failures are logged, never fatal.
    pub fn flush_plots(&mut self) {
        if let Some(plotter) = self.plotter.as_mut() {
            if let Err(e) = plotter.flush() {
                log::warn!("plot update failed: {e}");
            }
        }
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|source| SsdError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|e| SsdError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Captured {
        points: Vec<(String, String, f64, f64)>,
        flushes: usize,
        configs: usize,
    }

    struct CapturePlotter(Arc<Mutex<Captured>>);

    impl Plotter for CapturePlotter {
        fn add_point(&mut self, window: &str, legend: &str, x: f64, y: f64) {
            self.0
                .lock()
                .unwrap()
                .points
                .push((window.into(), legend.into(), x, y));
        }

        fn set_window_options(&mut self, _window: &str, _options: WindowOptions) {}

        fn show_config(&mut self, _config: &TrainingConfig) -> Result<()> {
            self.0.lock().unwrap().configs += 1;
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.0.lock().unwrap().flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn average_is_weighted_and_resets() {
        let mut avg = Average::default();
        avg.update(1.0, 1.0);
        avg.update(4.0, 3.0);
        assert!((avg.value() - 3.25).abs() < 1e-12);
        avg.reset();
        assert_eq!(avg.value(), 0.0);
    }

    #[test]
    fn simple_keeps_last() {
        let mut simple = Simple::default();
        simple.update(2.0);
        simple.update(5.0);
        assert_eq!(simple.value(), 5.0);
    }

    #[test]
    fn timer_measures() {
        let mut timer = Timer::default();
        timer.start();
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.stop() >= 0.005);
    }

    #[test]
    fn experiment_records_history_and_forwards() {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let mut xp = Experiment::new("ssd-sgd--eta-0.001", TrainingConfig::default());
        xp.record("Loss", "loc", 10, 1.5);
        xp.plot_on(Box::new(CapturePlotter(captured.clone())));
        xp.record("Loss", "loc", 20, 1.0);
        xp.record("Step-Size", "lr", 20, 1e-3);
        xp.flush_plots();

        assert_eq!(xp.series("Loss", "loc").len(), 2);
        assert_eq!(xp.series("Loss", "loc")[1].time, 20);
        let captured = captured.lock().unwrap();
        assert_eq!(captured.points.len(), 2);
        assert_eq!(captured.configs, 1);
        assert_eq!(captured.flushes, 1);
    }

    #[test]
    fn experiment_saves_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xp.json");
        let mut xp = Experiment::new("xp", TrainingConfig::default());
        xp.record("Loss", "total", 10, 2.0);
        xp.save_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["name"], "xp");
        assert_eq!(value["history"]["Loss/total"][0]["time"], 10);
        assert_eq!(value["config"]["optimizer"], "sgd");
    }
}
