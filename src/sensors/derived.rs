use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::warn;
use serde::{Deserialize, Serialize};

use super::accumulation::{AccumulationSensor, DailyAccumulationSensor};
use super::core::{History, SensorCore};

/// Fan-out target of a source sensor. Pushes are synchronous and run in the
/// source's task context; a failed recomputation is logged and never
/// propagates back into the source's accept path.
#[derive(Clone)]
pub enum DerivedRef {
    Computed(Arc<DerivedSensor>),
    Accumulation(Arc<AccumulationSensor>),
    Daily(Arc<DailyAccumulationSensor>),
}

impl DerivedRef {
    pub fn push(&self, source_key: &str, history: &History) {
        match self {
            DerivedRef::Computed(s) => s.push(source_key, history),
            DerivedRef::Accumulation(s) => s.push(source_key, history),
            DerivedRef::Daily(s) => s.push(source_key, history),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            DerivedRef::Computed(s) => s.core().key(),
            DerivedRef::Accumulation(s) => s.core().key(),
            DerivedRef::Daily(s) => s.core().key(),
        }
    }

    /// Walks the fan-out chain looking for a daily accumulation sensor.
    pub fn leads_to_daily(&self) -> bool {
        match self {
            DerivedRef::Daily(_) => true,
            DerivedRef::Computed(s) => s.core().feeds_daily(),
            DerivedRef::Accumulation(s) => s.core().feeds_daily(),
        }
    }
}

/// Recomputation function of a derived sensor. Always synchronous and free
/// of side effects beyond the sensor's own state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub enum Transform {
    /// Unit conversion: `value = raw * factor + offset`.
    Scale { factor: f64, offset: f64 },
    /// Sum over the latest value of every source (e.g. total power over
    /// three phases).
    Sum,
    /// Pass the most recent source reading through unchanged.
    Latest,
}

/// A sensor with no read path of its own; its value is a pure function of
/// the latest push(es) from one or more source sensors.
pub struct DerivedSensor {
    core: SensorCore,
    transform: Transform,
    inputs: Mutex<HashMap<String, f64>>,
}

impl DerivedSensor {
    pub fn new(core: SensorCore, transform: Transform) -> Self {
        Self {
            core,
            transform,
            inputs: Mutex::new(HashMap::new()),
        }
    }

    pub fn core(&self) -> &SensorCore {
        &self.core
    }

    pub fn push(&self, source_key: &str, history: &History) {
        let Some(latest) = history.last() else {
            return;
        };

        let value = match &self.transform {
            Transform::Scale { factor, offset } => latest.raw * factor + offset,
            Transform::Latest => latest.raw,
            Transform::Sum => {
                let mut inputs = self.inputs.lock().unwrap();
                inputs.insert(source_key.to_string(), latest.raw);
                inputs.values().sum()
            }
        };

        if let Err(e) = self.core.accept(value, latest.at) {
            warn!(
                "⚠️  Derived sensor '{}' rejected push from '{}': {}",
                self.core.key(),
                source_key,
                e
            );
        }
    }
}
