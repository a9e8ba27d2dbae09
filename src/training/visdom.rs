//! Minimal visdom client: line windows with appendable traces and a text
//! window for the run configuration.

use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use crate::error::{Result, SsdError};
use crate::training::config::TrainingConfig;
use crate::training::metrics::{Plotter, WindowOptions};

type Trace = Vec<(f64, f64)>;

pub struct VisdomPlotter {
    client: Client,
    base_url: String,
    env: String,
    pending: BTreeMap<String, BTreeMap<String, Trace>>,
    created: HashSet<String>,
    options: HashMap<String, WindowOptions>,
}

impl VisdomPlotter {
    pub fn new(server: &str, port: u16, env: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: format!("{}:{}", server.trim_end_matches('/'), port),
            env: env.into(),
            pending: BTreeMap::new(),
            created: HashSet::new(),
            options: HashMap::new(),
        })
    }

    pub fn has_pending(&self) -> bool {
        self.pending.values().any(|traces| !traces.is_empty())
    }

    fn post(&self, endpoint: &str, body: &Value) -> Result<()> {
        self.client
            .post(format!("{}/{endpoint}", self.base_url))
            .json(body)
            .send()?
            .error_for_status()?;
        Ok(())
    }

    /// Creates the window on first use, appends to it afterwards. Returns
    /// the traces that could not be delivered.
    fn send_window(
        &mut self,
        window: &str,
        traces: BTreeMap<String, Trace>,
    ) -> (BTreeMap<String, Trace>, Option<SsdError>) {
        if !self.created.contains(window) {
            let data: Vec<Value> = traces
                .iter()
                .map(|(legend, points)| trace(legend, points))
                .collect();
            let body = json!({
                "data": data,
                "layout": self.layout(window),
                "win": window,
                "eid": self.env,
            });
            return match self.post("events", &body) {
                Ok(()) => {
                    self.created.insert(window.to_string());
                    (BTreeMap::new(), None)
                }
                Err(e) => (traces, Some(e)),
            };
        }

        let mut unsent = BTreeMap::new();
        let mut first_error = None;
        for (legend, points) in traces {
            let body = json!({
                "data": [trace(&legend, &points)],
                "win": window,
                "eid": self.env,
                "name": legend,
                "append": true,
            });
            if let Err(e) = self.post("update", &body) {
                first_error.get_or_insert(e);
                unsent.insert(legend, points);
            }
        }
        (unsent, first_error)
    }

    fn layout(&self, window: &str) -> Value {
        let mut layout = json!({ "title": window, "showlegend": true });
        if self.options.get(window).is_some_and(|o| o.log_y) {
            layout["yaxis"] = json!({ "type": "log" });
        }
        layout
    }
}

fn trace(legend: &str, points: &[(f64, f64)]) -> Value {
    let (x, y): (Vec<f64>, Vec<f64>) = points.iter().copied().unzip();
    json!({
        "x": x,
        "y": y,
        "name": legend,
        "type": "scatter",
        "mode": "lines",
    })
}

impl Plotter for VisdomPlotter {
    fn add_point(&mut self, window: &str, legend: &str, x: f64, y: f64) {
        self.pending
            .entry(window.to_string())
            .or_default()
            .entry(legend.to_string())
            .or_default()
            .push((x, y));
    }

    fn set_window_options(&mut self, window: &str, options: WindowOptions) {
        self.options.insert(window.to_string(), options);
    }

    fn show_config(&mut self, config: &TrainingConfig) -> Result<()> {
        let text = serde_yaml::to_string(config)
            .unwrap_or_else(|_| format!("{config:?}"))
            .replace('\n', "<br>");
        self.post(
            "events",
            &json!({
                "data": [{ "content": text, "type": "text" }],
                "win": "Config",
                "eid": self.env,
                "opts": { "title": "Config" },
            }),
        )
    }

    /// Sends every buffered window. Traces whose request fails stay
    /// buffered for the next flush; the first error is returned once every
    /// window has been tried.
    fn flush(&mut self) -> Result<()> {
        if !self.has_pending() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let mut first_error = None;
        for (window, traces) in pending {
            if traces.is_empty() {
                continue;
            }
            let (unsent, error) = self.send_window(&window, traces);
            if let Some(e) = error {
                first_error.get_or_insert(e);
            }
            if !unsent.is_empty() {
                self.pending.insert(window, unsent);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
