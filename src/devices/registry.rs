use std::collections::HashMap;

use crate::sensors::SensorNode;
use crate::utils::error::GatewayError;

/// The one explicit sensor registry, built once at startup and treated as
/// read-only afterwards. Duplicate construction is rejected here and only
/// here.
#[derive(Default)]
pub struct SensorRegistry {
    by_key: HashMap<String, SensorNode>,
    insertion_order: Vec<String>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: SensorNode) -> Result<(), GatewayError> {
        let key = node.key().to_string();
        if self.by_key.contains_key(&key) {
            return Err(GatewayError::DuplicateSensor(key));
        }
        self.insertion_order.push(key.clone());
        self.by_key.insert(key, node);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&SensorNode> {
        self.by_key.get(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Sensors in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &SensorNode> {
        self.insertion_order
            .iter()
            .filter_map(move |key| self.by_key.get(key))
    }
}
