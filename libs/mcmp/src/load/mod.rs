//! Load balance factor
//!
//! STATUS carries a factor in `1..=100` where 100 means idle. The dynamic
//! provider averages each metric over a decaying history
//! (`weight_i = decay^-i`, newest sample first), combines metrics by weight
//! and reports `100 - round(load * 100)`. With no weighted metric available
//! it reports -1, which the proxy reads as "no value".

pub mod metrics;

pub use metrics::{BusyConnectorsLoadMetric, LoadMetric, RequestCountLoadMetric};

use modcluster_config::{service, LoadConfig};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::trace;

use crate::container::EngineSnapshot;

pub trait LoadBalanceFactorProvider: Send + Sync {
    fn load_balance_factor(&self, engine: &EngineSnapshot) -> i32;
}

/// Build the provider the configuration asks for
pub fn provider_from_config(config: &LoadConfig) -> Arc<dyn LoadBalanceFactorProvider> {
    match config.fixed_factor {
        Some(factor) => Arc::new(SimpleLoadBalanceFactorProvider::new(factor)),
        None => Arc::new(DynamicLoadBalanceFactorProvider::new(
            vec![
                Box::new(BusyConnectorsLoadMetric::default()),
                Box::new(RequestCountLoadMetric::new(
                    1.0,
                    service::load::REQUEST_CAPACITY,
                )),
            ],
            config.decay_factor,
            config.history,
        )),
    }
}

/// Constant factor
#[derive(Debug, Clone, Copy)]
pub struct SimpleLoadBalanceFactorProvider {
    factor: i32,
}

impl SimpleLoadBalanceFactorProvider {
    pub fn new(factor: i32) -> Self {
        Self { factor }
    }
}

impl LoadBalanceFactorProvider for SimpleLoadBalanceFactorProvider {
    fn load_balance_factor(&self, _engine: &EngineSnapshot) -> i32 {
        self.factor
    }
}

type History = HashMap<&'static str, VecDeque<f64>>;

pub struct DynamicLoadBalanceFactorProvider {
    metrics: Vec<Box<dyn LoadMetric>>,
    decay_factor: f64,
    history: usize,
    /// Per engine, per metric, newest first
    samples: Mutex<HashMap<String, History>>,
}

impl DynamicLoadBalanceFactorProvider {
    pub fn new(metrics: Vec<Box<dyn LoadMetric>>, decay_factor: f64, history: usize) -> Self {
        Self {
            metrics,
            decay_factor: decay_factor.max(1.0),
            history: history.max(1),
            samples: Mutex::new(HashMap::new()),
        }
    }

    fn decayed_average(&self, samples: &VecDeque<f64>) -> f64 {
        let mut total = 0.0;
        let mut weights = 0.0;
        for (age, load) in samples.iter().enumerate() {
            let weight = self.decay_factor.powi(-(age as i32));
            total += load * weight;
            weights += weight;
        }
        if weights > 0.0 {
            total / weights
        } else {
            0.0
        }
    }
}

impl LoadBalanceFactorProvider for DynamicLoadBalanceFactorProvider {
    fn load_balance_factor(&self, engine: &EngineSnapshot) -> i32 {
        let mut samples = self.samples.lock();
        let history = samples.entry(engine.name.clone()).or_default();

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for metric in &self.metrics {
            let weight = metric.weight();
            if weight <= 0.0 {
                continue;
            }
            let Some(load) = metric.load(engine) else {
                continue;
            };

            let series = history.entry(metric.name()).or_default();
            series.push_front(load.clamp(0.0, 1.0));
            series.truncate(self.history);

            weighted += weight * self.decayed_average(series);
            total_weight += weight;
        }

        if total_weight <= 0.0 {
            return -1;
        }
        let load = weighted / total_weight;
        let factor = (100 - (load * 100.0).round() as i32).clamp(1, 100);
        trace!(engine = %engine.name, load, factor, "Computed load balance factor");
        factor
    }
}
