use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::bus::{ConnectionLock, RegisterBus};
use crate::devices::SensorRegistry;
use crate::output::publisher::MessageBus;
use crate::sensors::SensorNode;
use crate::utils::error::GatewayError;

/// Inbound command as delivered on the command topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    pub message_id: String,
    #[serde(default)]
    pub operator: String,
    pub sensor: String,
    pub action: CommandAction,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    /// Write an engineering value to an addressable sensor.
    Write,
    /// Overwrite an accumulation sensor's running total.
    ResetTotal,
    /// Republish the sensor's current state on the next poll pass.
    ForcePublish,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub message_id: String,
    pub sensor: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Listens on the command topic and executes write/reset commands against
/// the registry, serialized on the same connection lock the poll loops use.
/// Every command gets a response on the response topic; a bad command is a
/// failed response, never a crash.
pub struct CommandService {
    registry: Arc<SensorRegistry>,
    bus: Arc<dyn RegisterBus>,
    lock: Arc<ConnectionLock>,
    publisher: Arc<dyn MessageBus>,
    command_topic: String,
    response_topic: String,
    lock_timeout: Duration,
    qos: u8,
}

impl CommandService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<SensorRegistry>,
        bus: Arc<dyn RegisterBus>,
        lock: Arc<ConnectionLock>,
        publisher: Arc<dyn MessageBus>,
        command_topic: String,
        response_topic: String,
        lock_timeout: Duration,
        qos: u8,
    ) -> Self {
        Self {
            registry,
            bus,
            lock,
            publisher,
            command_topic,
            response_topic,
            lock_timeout,
            qos,
        }
    }

    pub async fn run(self) {
        let mut receiver = match self.publisher.subscribe(&self.command_topic).await {
            Ok(receiver) => receiver,
            Err(e) => {
                error!("❌ Failed to subscribe to command topic: {}", e);
                return;
            }
        };
        info!("🔧 Command listener started on '{}'", self.command_topic);

        while let Ok(message) = receiver.recv().await {
            self.handle_message(&message).await;
        }
    }

    pub async fn handle_message(&self, message: &str) {
        let command: CommandMessage = match serde_json::from_str(message) {
            Ok(command) => command,
            Err(e) => {
                warn!("⚠️  Ignoring malformed command message: {}", e);
                return;
            }
        };

        info!(
            "📨 Command {:?} for sensor '{}' from '{}'",
            command.action, command.sensor, command.operator
        );

        let result = self.execute(&command).await;
        if let Err(e) = &result {
            warn!("❌ Command {} failed: {}", command.message_id, e);
        }

        let response = CommandResponse {
            message_id: command.message_id.clone(),
            sensor: command.sensor.clone(),
            success: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        };
        match serde_json::to_string(&response) {
            Ok(json) => {
                if let Err(e) = self
                    .publisher
                    .publish(&self.response_topic, &json, self.qos, false)
                    .await
                {
                    error!("❌ Failed to publish command response: {}", e);
                }
            }
            Err(e) => error!("❌ Failed to serialize command response: {}", e),
        }
    }

    pub async fn execute(&self, command: &CommandMessage) -> Result<(), GatewayError> {
        let node = self
            .registry
            .get(&command.sensor)
            .ok_or_else(|| GatewayError::SensorNotFound(command.sensor.clone()))?;

        match command.action {
            CommandAction::Write => {
                let value = command.value.ok_or_else(|| {
                    GatewayError::CommandError("write requires a value".to_string())
                })?;
                let SensorNode::Register(sensor) = node else {
                    return Err(GatewayError::CommandError(format!(
                        "Sensor '{}' is not addressable",
                        command.sensor
                    )));
                };
                let _guard = self.lock.acquire(self.lock_timeout).await?;
                sensor
                    .write_value(self.bus.as_ref(), value, sensor.core().gain())
                    .await?;
                info!("✅ Wrote {} to sensor '{}'", value, command.sensor);
                Ok(())
            }
            CommandAction::ResetTotal => {
                let SensorNode::Accumulation(sensor) = node else {
                    return Err(GatewayError::CommandError(format!(
                        "Sensor '{}' has no resettable total",
                        command.sensor
                    )));
                };
                sensor.reset(command.value.unwrap_or(0.0))
            }
            CommandAction::ForcePublish => {
                node.core().set_force_publish();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{RegisterKind, SimulatedBus, ValueType};
    use crate::output::publisher::LoopbackBus;
    use crate::sensors::{
        Access, AccumulationSensor, CoreSpec, RegisterSensor, SanityCheck, ScalarStore,
        SensorCore,
    };

    fn core(key: &str, gain: f64) -> SensorCore {
        SensorCore::new(CoreSpec {
            key: key.to_string(),
            topic: format!("site/{}", key),
            unit: None,
            scan_interval: Duration::from_secs(10),
            gain,
            precision: None,
            publishable: true,
            sanity: SanityCheck::unbounded(),
            max_failures: 3,
            retry_interval: Duration::from_secs(300),
        })
    }

    struct Rig {
        bus: Arc<SimulatedBus>,
        publisher: Arc<LoopbackBus>,
        service: CommandService,
        _dir: tempfile::TempDir,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = SensorRegistry::new();
        registry
            .insert(SensorNode::Register(Arc::new(RegisterSensor::new(
                core("meter.tariff", 0.5),
                1,
                120,
                Some(1),
                RegisterKind::Holding,
                ValueType::U16,
                Access::ReadWrite,
                false,
            ))))
            .unwrap();
        registry
            .insert(SensorNode::Accumulation(Arc::new(
                AccumulationSensor::new(
                    core("meter.energy", 1.0),
                    true,
                    ScalarStore::new(dir.path().join("energy.total")),
                )
                .unwrap(),
            )))
            .unwrap();

        let bus = Arc::new(SimulatedBus::new());
        let publisher = Arc::new(LoopbackBus::new());
        let service = CommandService::new(
            Arc::new(registry),
            bus.clone(),
            Arc::new(ConnectionLock::new("test")),
            publisher.clone(),
            "cmd".to_string(),
            "rsp".to_string(),
            Duration::from_secs(1),
            0,
        );
        Rig {
            bus,
            publisher,
            service,
            _dir: dir,
        }
    }

    fn command(sensor: &str, action: CommandAction, value: Option<f64>) -> CommandMessage {
        CommandMessage {
            message_id: "m1".to_string(),
            operator: "tester".to_string(),
            sensor: sensor.to_string(),
            action,
            value,
        }
    }

    #[tokio::test]
    async fn test_write_divides_out_gain() {
        let r = rig();
        r.service
            .execute(&command("meter.tariff", CommandAction::Write, Some(2.0)))
            .await
            .unwrap();
        // Engineering 2.0 with gain 0.5 lands as raw 4.
        assert_eq!(r.bus.register(1, RegisterKind::Holding, 120), Some(4));
    }

    #[tokio::test]
    async fn test_unknown_sensor_is_a_failed_command() {
        let r = rig();
        let err = r
            .service
            .execute(&command("nope", CommandAction::Write, Some(1.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::SensorNotFound(_)));
    }

    #[tokio::test]
    async fn test_write_without_value_fails() {
        let r = rig();
        let err = r
            .service
            .execute(&command("meter.tariff", CommandAction::Write, None))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CommandError(_)));
    }

    #[tokio::test]
    async fn test_reset_total_targets_accumulation_only() {
        let r = rig();
        r.service
            .execute(&command("meter.energy", CommandAction::ResetTotal, Some(50.0)))
            .await
            .unwrap();
        let err = r
            .service
            .execute(&command("meter.tariff", CommandAction::ResetTotal, None))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CommandError(_)));
    }

    #[tokio::test]
    async fn test_failed_command_publishes_failure_response() {
        let r = rig();
        let json = serde_json::to_string(&command("nope", CommandAction::Write, Some(1.0)))
            .unwrap();
        r.service.handle_message(&json).await;

        let responses = r.publisher.published_on("rsp");
        assert_eq!(responses.len(), 1);
        let response: CommandResponse = serde_json::from_str(&responses[0]).unwrap();
        assert!(!response.success);
        assert_eq!(response.message_id, "m1");
        assert!(response.error.unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_inbound_loop_end_to_end() {
        let r = rig();
        let publisher = r.publisher.clone();
        let handle = tokio::spawn(r.service.run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let json = serde_json::to_string(&command(
            "meter.tariff",
            CommandAction::Write,
            Some(1.0),
        ))
        .unwrap();
        publisher.inject(&json);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(r.bus.register(1, RegisterKind::Holding, 120), Some(2));
        let responses = publisher.published_on("rsp");
        assert_eq!(responses.len(), 1);
        handle.abort();
    }
}
