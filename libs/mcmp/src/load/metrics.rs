//! Load metrics
//!
//! Each metric reports a load in `0.0..=1.0` for an engine, or `None` when it
//! has nothing to say yet.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

use crate::container::EngineSnapshot;

pub trait LoadMetric: Send + Sync {
    fn name(&self) -> &'static str;

    /// Relative weight in the combined load; zero disables the metric
    fn weight(&self) -> f64 {
        1.0
    }

    fn load(&self, engine: &EngineSnapshot) -> Option<f64>;
}

/// Busy connector threads over the thread pool size
#[derive(Debug, Clone)]
pub struct BusyConnectorsLoadMetric {
    weight: f64,
}

impl BusyConnectorsLoadMetric {
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl Default for BusyConnectorsLoadMetric {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl LoadMetric for BusyConnectorsLoadMetric {
    fn name(&self) -> &'static str {
        "busy-connectors"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn load(&self, engine: &EngineSnapshot) -> Option<f64> {
        let connector = &engine.connector;
        if connector.max_threads == 0 {
            return None;
        }
        Some((connector.busy_threads as f64 / connector.max_threads as f64).min(1.0))
    }
}

/// Request rate over a capacity, from the connector's request counter
#[derive(Debug)]
pub struct RequestCountLoadMetric {
    weight: f64,
    /// Requests per second considered full load
    capacity: f64,
    previous: Mutex<HashMap<String, (u64, Instant)>>,
}

impl RequestCountLoadMetric {
    pub fn new(weight: f64, capacity: f64) -> Self {
        Self {
            weight,
            capacity,
            previous: Mutex::new(HashMap::new()),
        }
    }

    fn load_at(&self, engine: &EngineSnapshot, now: Instant) -> Option<f64> {
        let count = engine.connector.request_count;
        let previous = self
            .previous
            .lock()
            .insert(engine.name.clone(), (count, now));

        let (last_count, last_at) = previous?;
        let elapsed = now.duration_since(last_at).as_secs_f64();
        if elapsed <= 0.0 || self.capacity <= 0.0 {
            return None;
        }
        // A counter that went backwards was reset by the container
        let requests = count.saturating_sub(last_count) as f64;
        Some((requests / elapsed / self.capacity).min(1.0))
    }
}

impl LoadMetric for RequestCountLoadMetric {
    fn name(&self) -> &'static str {
        "request-count"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn load(&self, engine: &EngineSnapshot) -> Option<f64> {
        self.load_at(engine, Instant::now())
    }
}
