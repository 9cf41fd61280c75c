use std::sync::{Arc, Mutex, PoisonError};

use crate::prelude::Telemetry;

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedPoint {
    pub group: String,
    pub name: String,
    pub x: f64,
    pub values: Vec<f64>,
}

#[derive(Default)]
struct Recording {
    series: Vec<(String, String, usize)>,
    points: Vec<RecordedPoint>,
}

/// [Telemetry] keeping everything in memory. Clones share the same recording.
#[derive(Clone, Default)]
pub struct RecordingTelemetry {
    recording: Arc<Mutex<Recording>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self { Self::default() }

    /// Registered series as `(group, name, line_count)`
    pub fn series(&self) -> Vec<(String, String, usize)> {
        self.recording.lock().unwrap_or_else(PoisonError::into_inner).series.clone()
    }

    pub fn points(&self) -> Vec<RecordedPoint> {
        self.recording.lock().unwrap_or_else(PoisonError::into_inner).points.clone()
    }

    pub fn points_of(
        &self,
        group: &str,
        name: &str,
    ) -> Vec<RecordedPoint> {
        self.points().into_iter().filter(|p| p.group == group && p.name == name).collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn register_series(
        &self,
        group: &str,
        name: &str,
        line_count: usize,
    ) {
        self.recording
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .series
            .push((group.to_string(), name.to_string(), line_count));
    }

    fn append_point(
        &self,
        group: &str,
        name: &str,
        x: f64,
        values: &[f64],
    ) {
        self.recording.lock().unwrap_or_else(PoisonError::into_inner).points.push(RecordedPoint {
            group: group.to_string(),
            name: name.to_string(),
            x,
            values: values.to_vec(),
        });
    }
}
