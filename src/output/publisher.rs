use std::sync::Mutex;

use async_trait::async_trait;
use log::info;
use tokio::sync::broadcast;

use crate::utils::error::GatewayError;

/// Topic-based pub/sub boundary. The core decides *when* and *what* to
/// publish; wire framing and broker handling live behind this trait.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos: u8,
        retain: bool,
    ) -> Result<(), GatewayError>;

    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<String>, GatewayError>;
}

/// Prints every publication; stands in for a broker in demo runs.
pub struct ConsolePublisher;

#[async_trait]
impl MessageBus for ConsolePublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        _qos: u8,
        _retain: bool,
    ) -> Result<(), GatewayError> {
        println!("{} {}", topic, payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<String>, GatewayError> {
        info!("📨 Console subscription to '{}' (no inbound traffic)", topic);
        // Keep a sender alive so the receiver stays open without ever firing.
        let (tx, rx) = broadcast::channel(16);
        std::mem::forget(tx);
        Ok(rx)
    }
}

/// In-memory broker double: records publications and loops injected
/// messages back to subscribers. Used by tests and the command service
/// tests in particular.
pub struct LoopbackBus {
    published: Mutex<Vec<(String, String)>>,
    inbound: broadcast::Sender<String>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        let (inbound, _) = broadcast::channel(64);
        Self {
            published: Mutex::new(Vec::new()),
            inbound,
        }
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Inject an inbound message as if the broker delivered it.
    pub fn inject(&self, message: &str) {
        let _ = self.inbound.send(message.to_string());
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for LoopbackBus {
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        _qos: u8,
        _retain: bool,
    ) -> Result<(), GatewayError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, _topic: &str) -> Result<broadcast::Receiver<String>, GatewayError> {
        Ok(self.inbound.subscribe())
    }
}
