use std::sync::Arc;

use log::info;
use tokio::sync::watch;

use crate::sensors::SensorNode;

/// One addressable device: its sensors, its children and the online signal
/// every scan-group loop on the subtree observes.
///
/// Devices are created from the discovered topology at startup and dropped
/// only at process exit.
pub struct Device {
    uuid: String,
    name: String,
    address: u8,
    sensors: Vec<SensorNode>,
    children: Vec<Arc<Device>>,
    online: watch::Sender<bool>,
}

impl Device {
    pub fn new(
        uuid: String,
        name: String,
        address: u8,
        sensors: Vec<SensorNode>,
        children: Vec<Arc<Device>>,
    ) -> Self {
        let (online, _) = watch::channel(true);
        Self {
            uuid,
            name,
            address,
            sensors,
            children,
            online,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn sensors(&self) -> &[SensorNode] {
        &self.sensors
    }

    pub fn children(&self) -> &[Arc<Device>] {
        &self.children
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Fresh receiver on the online signal, for the scheduler loops.
    pub fn online_rx(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Flip the online signal and propagate it through the subtree, so every
    /// affected loop observes the transition within its bounded sleep.
    pub fn set_online(&self, online: bool) {
        let changed = *self.online.borrow() != online;
        self.online.send_replace(online);
        if changed {
            info!(
                "{} Device '{}' (address {}) is now {}",
                if online { "🟢" } else { "🔴" },
                self.name,
                self.address,
                if online { "online" } else { "offline" }
            );
        }
        for child in &self.children {
            child.set_online(online);
        }
    }

    /// Flattened sensor set of the whole subtree, depth-first, used to feed
    /// the scan-group builder.
    pub fn collect_sensors(&self) -> Vec<SensorNode> {
        let mut out = self.sensors.clone();
        for child in &self.children {
            out.extend(child.collect_sensors());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, address: u8, children: Vec<Arc<Device>>) -> Device {
        Device::new(
            format!("uuid-{}", name),
            name.to_string(),
            address,
            Vec::new(),
            children,
        )
    }

    #[test]
    fn test_offline_propagates_to_subtree() {
        let leaf = Arc::new(device("leaf", 3, vec![]));
        let mid = Arc::new(device("mid", 2, vec![leaf.clone()]));
        let root = device("root", 1, vec![mid.clone()]);

        assert!(leaf.is_online());
        root.set_online(false);
        assert!(!root.is_online());
        assert!(!mid.is_online());
        assert!(!leaf.is_online());
    }

    #[tokio::test]
    async fn test_online_receiver_observes_change() {
        let dev = device("meter", 1, vec![]);
        let mut rx = dev.online_rx();
        dev.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
    }
}
