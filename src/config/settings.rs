use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::{RegisterKind, ValueType};
use crate::sensors::{Access, Transform};
use crate::utils::error::GatewayError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Gateway identification
    pub gateway_uuid: String,
    pub gateway_name: String,
    pub gateway_version: String,

    // Connection settings
    pub connection: ConnectionConfig,

    // Polling defaults
    pub polling: PollingConfig,

    // Pub/sub output settings
    pub mqtt: MqttConfig,

    // Accumulation totals and daily baselines
    pub persistence: PersistenceConfig,

    // Device topology
    pub devices: Vec<DeviceConfig>,

    // Pattern-based sensor setting overrides
    #[serde(default)]
    pub overrides: Vec<OverrideConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    /// Hard ceiling on the register span of one request.
    pub max_registers_per_request: u16,
    /// Disable batching for this connection: one scan group per sensor.
    pub disable_chunking: bool,
    pub lock_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub default_scan_interval_seconds: u64,
    pub max_failures: u32,
    /// Backoff base once a sensor exhausts its failure budget; zero keeps it
    /// disabled until restart.
    pub retry_interval_seconds: u64,
    /// Count sanity-check rejections against the failure budget.
    pub count_sanity_failures: bool,
    /// Re-announce every publishable sensor at this cadence so late-joining
    /// consumers converge.
    pub announce_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    pub client_id: String,
    pub topic_prefix: String,
    pub qos: u8,
    pub retain: bool,
    pub command_topic: String,
    pub response_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub uuid: String,
    pub name: String,
    pub address: u8,
    pub enabled: bool,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub children: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Stable key, unique across the whole gateway.
    pub key: String,
    pub name: String,

    #[serde(flatten)]
    pub kind: SensorKindConfig,

    pub unit: Option<String>,
    pub topic: Option<String>,
    pub scan_interval_seconds: Option<u64>,
    pub gain: Option<f64>,
    pub precision: Option<u32>,
    pub publishable: Option<bool>,
    /// Pre-assign this sensor to an explicit scan group, bypassing automatic
    /// grouping.
    pub scan_group: Option<String>,

    // Sanity bounds; unset bounds fall back to register-width defaults.
    pub min_raw: Option<f64>,
    pub max_raw: Option<f64>,
    pub delta_check: Option<bool>,

    // Failure budget overrides
    pub max_failures: Option<u32>,
    pub retry_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorKindConfig {
    Register {
        register: u16,
        count: Option<u16>,
        #[serde(default = "default_register_kind")]
        register_kind: RegisterKind,
        value_type: ValueType,
        #[serde(default = "default_access")]
        access: Access,
        #[serde(default)]
        reserved: bool,
    },
    Computed {
        sources: Vec<String>,
        #[serde(flatten)]
        transform: Transform,
    },
    Accumulation {
        source: String,
        #[serde(default = "default_true")]
        monotonic: bool,
    },
    DailyAccumulation {
        source: String,
    },
}

fn default_register_kind() -> RegisterKind {
    RegisterKind::Holding
}

fn default_access() -> Access {
    Access::ReadOnly
}

fn default_true() -> bool {
    true
}

/// One `(pattern, override-record)` pair; `*` in the pattern matches any run
/// of characters in a sensor key. All overrides are resolved once at
/// construction time, later matching patterns winning field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideConfig {
    pub pattern: String,
    pub scan_interval_seconds: Option<u64>,
    pub gain: Option<f64>,
    pub precision: Option<u32>,
    pub min_raw: Option<f64>,
    pub max_raw: Option<f64>,
    pub delta_check: Option<bool>,
    pub max_failures: Option<u32>,
    pub retry_interval_seconds: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let meter_sensors = vec![
            SensorConfig {
                key: "meter.voltage_l1".to_string(),
                name: "Voltage L1".to_string(),
                kind: SensorKindConfig::Register {
                    register: 100,
                    count: None,
                    register_kind: RegisterKind::Holding,
                    value_type: ValueType::U16,
                    access: Access::ReadOnly,
                    reserved: false,
                },
                unit: Some("V".to_string()),
                topic: None,
                scan_interval_seconds: Some(10),
                gain: Some(0.1),
                precision: Some(1),
                publishable: None,
                scan_group: None,
                min_raw: Some(0.0),
                max_raw: Some(3000.0),
                delta_check: None,
                max_failures: None,
                retry_interval_seconds: None,
            },
            SensorConfig {
                key: "meter.power_l1".to_string(),
                name: "Active Power L1".to_string(),
                kind: SensorKindConfig::Register {
                    register: 101,
                    count: None,
                    register_kind: RegisterKind::Holding,
                    value_type: ValueType::I16,
                    access: Access::ReadOnly,
                    reserved: false,
                },
                unit: Some("W".to_string()),
                topic: None,
                scan_interval_seconds: Some(10),
                gain: None,
                precision: None,
                publishable: None,
                scan_group: None,
                min_raw: None,
                max_raw: None,
                delta_check: None,
                max_failures: None,
                retry_interval_seconds: None,
            },
            SensorConfig {
                key: "meter.power_l2".to_string(),
                name: "Active Power L2".to_string(),
                kind: SensorKindConfig::Register {
                    register: 102,
                    count: None,
                    register_kind: RegisterKind::Holding,
                    value_type: ValueType::I16,
                    access: Access::ReadOnly,
                    reserved: false,
                },
                unit: Some("W".to_string()),
                topic: None,
                scan_interval_seconds: Some(10),
                gain: None,
                precision: None,
                publishable: None,
                scan_group: None,
                min_raw: None,
                max_raw: None,
                delta_check: None,
                max_failures: None,
                retry_interval_seconds: None,
            },
            SensorConfig {
                key: "meter.power_l3".to_string(),
                name: "Active Power L3".to_string(),
                kind: SensorKindConfig::Register {
                    register: 103,
                    count: None,
                    register_kind: RegisterKind::Holding,
                    value_type: ValueType::I16,
                    access: Access::ReadOnly,
                    reserved: false,
                },
                unit: Some("W".to_string()),
                topic: None,
                scan_interval_seconds: Some(10),
                gain: None,
                precision: None,
                publishable: None,
                scan_group: None,
                min_raw: None,
                max_raw: None,
                delta_check: None,
                max_failures: None,
                retry_interval_seconds: None,
            },
            SensorConfig {
                key: "meter.power_total".to_string(),
                name: "Active Power Total".to_string(),
                kind: SensorKindConfig::Computed {
                    sources: vec![
                        "meter.power_l1".to_string(),
                        "meter.power_l2".to_string(),
                        "meter.power_l3".to_string(),
                    ],
                    transform: Transform::Sum,
                },
                unit: Some("W".to_string()),
                topic: None,
                scan_interval_seconds: Some(30),
                gain: None,
                precision: Some(0),
                publishable: None,
                scan_group: None,
                min_raw: None,
                max_raw: None,
                delta_check: None,
                max_failures: None,
                retry_interval_seconds: None,
            },
            SensorConfig {
                key: "meter.energy_total".to_string(),
                name: "Energy Total".to_string(),
                kind: SensorKindConfig::Accumulation {
                    source: "meter.power_total".to_string(),
                    monotonic: true,
                },
                unit: Some("Wh".to_string()),
                topic: None,
                scan_interval_seconds: Some(60),
                gain: None,
                precision: Some(1),
                publishable: None,
                scan_group: None,
                min_raw: None,
                max_raw: None,
                delta_check: None,
                max_failures: None,
                retry_interval_seconds: None,
            },
            SensorConfig {
                key: "meter.energy_today".to_string(),
                name: "Energy Today".to_string(),
                kind: SensorKindConfig::DailyAccumulation {
                    source: "meter.energy_total".to_string(),
                },
                unit: Some("Wh".to_string()),
                topic: None,
                scan_interval_seconds: Some(60),
                gain: None,
                precision: Some(1),
                publishable: None,
                scan_group: None,
                min_raw: None,
                max_raw: None,
                delta_check: None,
                max_failures: None,
                retry_interval_seconds: None,
            },
            SensorConfig {
                key: "meter.tariff".to_string(),
                name: "Active Tariff".to_string(),
                kind: SensorKindConfig::Register {
                    register: 120,
                    count: None,
                    register_kind: RegisterKind::Holding,
                    value_type: ValueType::U16,
                    access: Access::ReadWrite,
                    reserved: false,
                },
                unit: None,
                topic: None,
                scan_interval_seconds: Some(60),
                gain: None,
                precision: None,
                publishable: None,
                scan_group: None,
                min_raw: Some(0.0),
                max_raw: Some(4.0),
                delta_check: None,
                max_failures: None,
                retry_interval_seconds: None,
            },
        ];

        Self {
            gateway_uuid: Uuid::new_v4().to_string(),
            gateway_name: "Field Gateway".to_string(),
            gateway_version: crate::VERSION.to_string(),
            connection: ConnectionConfig {
                name: "main".to_string(),
                max_registers_per_request: 125,
                disable_chunking: false,
                lock_timeout_ms: 2000,
                reconnect_delay_ms: 500,
            },
            polling: PollingConfig {
                default_scan_interval_seconds: 10,
                max_failures: 3,
                retry_interval_seconds: 300,
                count_sanity_failures: false,
                announce_interval_seconds: 300,
            },
            mqtt: MqttConfig {
                broker: "tcp://localhost:1883".to_string(),
                client_id: "field-gateway".to_string(),
                topic_prefix: "site/gateway".to_string(),
                qos: 1,
                retain: true,
                command_topic: "site/gateway/command".to_string(),
                response_topic: "site/gateway/response".to_string(),
            },
            persistence: PersistenceConfig {
                data_dir: "data".to_string(),
            },
            devices: vec![DeviceConfig {
                uuid: Uuid::new_v4().to_string(),
                name: "Grid Meter".to_string(),
                address: 1,
                enabled: true,
                sensors: meter_sensors,
                children: Vec::new(),
            }],
            overrides: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            GatewayError::ConfigError(format!(
                "Cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| GatewayError::ConfigError(format!("Invalid config: {}", e)))?;

        // Backward compatibility with hand-written files.
        if config.gateway_uuid.is_empty() {
            config.gateway_uuid = Uuid::new_v4().to_string();
        }
        if config.gateway_version.is_empty() {
            config.gateway_version = crate::VERSION.to_string();
        }
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), GatewayError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| GatewayError::SerializationError(format!("TOML error: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn enabled_devices(&self) -> Vec<&DeviceConfig> {
        self.devices.iter().filter(|d| d.enabled).collect()
    }

    /// Topic a sensor publishes on: explicit topic, or prefix + key with the
    /// key's dots mapped to topic levels.
    pub fn topic_for(&self, sensor: &SensorConfig) -> String {
        match &sensor.topic {
            Some(topic) => topic.clone(),
            None => format!(
                "{}/{}",
                self.mqtt.topic_prefix,
                sensor.key.replace('.', "/")
            ),
        }
    }

    /// Named-group pre-assignments across all enabled devices, for the
    /// scan-group builder.
    pub fn named_assignments(&self) -> HashMap<String, String> {
        fn walk(device: &DeviceConfig, out: &mut HashMap<String, String>) {
            for sensor in &device.sensors {
                if let Some(group) = &sensor.scan_group {
                    out.insert(sensor.key.clone(), group.clone());
                }
            }
            for child in &device.children {
                walk(child, out);
            }
        }
        let mut out = HashMap::new();
        for device in self.enabled_devices() {
            walk(device, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.devices.len(), config.devices.len());
        assert_eq!(
            parsed.devices[0].sensors.len(),
            config.devices[0].sensors.len()
        );
        assert_eq!(parsed.connection.max_registers_per_request, 125);
    }

    #[test]
    fn test_sensor_kind_parses_from_toml() {
        let text = r#"
            key = "m.power"
            name = "Power"
            type = "register"
            register = 100
            value_type = "f32"
        "#;
        let sensor: SensorConfig = toml::from_str(text).unwrap();
        match sensor.kind {
            SensorKindConfig::Register {
                register,
                value_type,
                register_kind,
                access,
                ..
            } => {
                assert_eq!(register, 100);
                assert_eq!(value_type, ValueType::F32);
                assert_eq!(register_kind, RegisterKind::Holding);
                assert_eq!(access, Access::ReadOnly);
            }
            _ => panic!("expected register sensor"),
        }
    }

    #[test]
    fn test_topic_for_derives_from_key() {
        let config = Config::default();
        let sensor = &config.devices[0].sensors[0];
        assert_eq!(
            config.topic_for(sensor),
            "site/gateway/meter/voltage_l1"
        );
    }
}
