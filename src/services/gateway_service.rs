use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::time;

use crate::bus::{ConnectionLock, RegisterBus};
use crate::config::{resolve, Config, DeviceConfig, SensorConfig, SensorKindConfig};
use crate::devices::{Device, SensorRegistry};
use crate::output::publisher::MessageBus;
use crate::scheduler::{PollScheduler, ScanGroup, ScanGroupBuilder};
use crate::sensors::{
    AccumulationSensor, CoreSpec, DailyAccumulationSensor, DerivedSensor, PublishContext,
    RegisterSensor, ScalarStore, SensorCore, SensorNode,
};
use crate::services::command_service::CommandService;
use crate::utils::error::GatewayError;

/// Owns the whole steady-state machinery: the sensor registry, the device
/// tree, the scan groups and the connection lock. Construction happens once
/// at startup; afterwards everything here is read-only shared state for the
/// scheduler and command tasks.
pub struct GatewayService {
    config: Config,
    registry: Arc<SensorRegistry>,
    lock: Arc<ConnectionLock>,
    bus: Arc<dyn RegisterBus>,
    publisher: Arc<dyn MessageBus>,
    device_groups: Vec<(Arc<Device>, Vec<ScanGroup>)>,
}

impl std::fmt::Debug for GatewayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayService")
            .field("gateway_name", &self.config.gateway_name)
            .field("device_count", &self.device_groups.len())
            .finish_non_exhaustive()
    }
}

impl GatewayService {
    pub fn new(
        config: Config,
        bus: Arc<dyn RegisterBus>,
        publisher: Arc<dyn MessageBus>,
    ) -> Result<Self, GatewayError> {
        info!(
            "🚀 Initializing gateway '{}' [{}]",
            config.gateway_name, config.gateway_uuid
        );
        info!("📦 Version: {}", config.gateway_version);
        info!(
            "📡 Devices: {} configured, {} enabled",
            config.devices.len(),
            config.enabled_devices().len()
        );

        let data_dir = PathBuf::from(&config.persistence.data_dir);
        let mut registry = SensorRegistry::new();
        let mut roots = Vec::new();
        for device_config in config.enabled_devices() {
            let device = Self::build_device(&config, device_config, &data_dir, &mut registry)?;
            roots.push(Arc::new(device));
        }
        let registry = Arc::new(registry);

        let named = config.named_assignments();
        let builder = ScanGroupBuilder::new(
            config.connection.max_registers_per_request,
            config.connection.disable_chunking,
        );
        let mut device_groups = Vec::new();
        for device in roots {
            let groups = builder.build(&device.collect_sensors(), &named);
            info!(
                "🧩 Device '{}': {} scan groups over {} sensors",
                device.name(),
                groups.len(),
                device.collect_sensors().len()
            );
            device_groups.push((device, groups));
        }

        let lock = Arc::new(ConnectionLock::new(config.connection.name.clone()));
        info!(
            "✅ Gateway initialized: {} sensors registered",
            registry.len()
        );

        Ok(Self {
            config,
            registry,
            lock,
            bus,
            publisher,
            device_groups,
        })
    }

    fn build_device(
        config: &Config,
        device_config: &DeviceConfig,
        data_dir: &Path,
        registry: &mut SensorRegistry,
    ) -> Result<Device, GatewayError> {
        let mut sensors = Vec::new();
        for sensor_config in &device_config.sensors {
            let node = Self::build_sensor(
                config,
                device_config.address,
                sensor_config,
                data_dir,
                registry,
            )?;
            registry.insert(node.clone())?;
            sensors.push(node);
        }

        let mut children = Vec::new();
        for child in &device_config.children {
            if child.enabled {
                children.push(Arc::new(Self::build_device(
                    config, child, data_dir, registry,
                )?));
            }
        }

        info!(
            "📋 Registered device '{}' at address {} ({} sensors, {} children)",
            device_config.name,
            device_config.address,
            sensors.len(),
            children.len()
        );
        Ok(Device::new(
            device_config.uuid.clone(),
            device_config.name.clone(),
            device_config.address,
            sensors,
            children,
        ))
    }

    fn build_sensor(
        config: &Config,
        device_address: u8,
        sensor_config: &SensorConfig,
        data_dir: &Path,
        registry: &SensorRegistry,
    ) -> Result<SensorNode, GatewayError> {
        let resolved = resolve(&config.polling, &config.overrides, sensor_config);
        let core = SensorCore::new(CoreSpec {
            key: sensor_config.key.clone(),
            topic: config.topic_for(sensor_config),
            unit: sensor_config.unit.clone(),
            scan_interval: resolved.scan_interval,
            gain: resolved.gain,
            precision: resolved.precision,
            publishable: resolved.publishable,
            sanity: resolved.sanity,
            max_failures: resolved.max_failures,
            retry_interval: resolved.retry_interval,
        });

        let node = match &sensor_config.kind {
            SensorKindConfig::Register {
                register,
                count,
                register_kind,
                value_type,
                access,
                reserved,
            } => SensorNode::Register(Arc::new(RegisterSensor::new(
                core,
                device_address,
                *register,
                *count,
                *register_kind,
                *value_type,
                *access,
                *reserved,
            ))),
            SensorKindConfig::Computed { sources, transform } => {
                let node =
                    SensorNode::Computed(Arc::new(DerivedSensor::new(core, transform.clone())));
                Self::wire_sources(registry, &node, sources)?;
                node
            }
            SensorKindConfig::Accumulation { source, monotonic } => {
                let store =
                    ScalarStore::new(data_dir.join(format!("{}.total", sensor_config.key)));
                let node = SensorNode::Accumulation(Arc::new(AccumulationSensor::new(
                    core, *monotonic, store,
                )?));
                Self::wire_sources(registry, &node, std::slice::from_ref(source))?;
                node
            }
            SensorKindConfig::DailyAccumulation { source } => {
                let store =
                    ScalarStore::new(data_dir.join(format!("{}.baseline", sensor_config.key)));
                let node =
                    SensorNode::Daily(Arc::new(DailyAccumulationSensor::new(core, store)));
                Self::wire_sources(registry, &node, std::slice::from_ref(source))?;
                node
            }
        };
        Ok(node)
    }

    /// Register the new sensor on each of its sources. Sources must be
    /// declared before their dependents, which also rules out cycles.
    fn wire_sources(
        registry: &SensorRegistry,
        node: &SensorNode,
        sources: &[String],
    ) -> Result<(), GatewayError> {
        let dependent = node.as_derived_ref().ok_or_else(|| {
            GatewayError::ConfigError(format!("Sensor '{}' cannot be a dependent", node.key()))
        })?;
        for source in sources {
            let source_node = registry.get(source).ok_or_else(|| {
                GatewayError::ConfigError(format!(
                    "Sensor '{}' references source '{}' which is not declared before it",
                    node.key(),
                    source
                ))
            })?;
            source_node.core().register_dependent(dependent.clone());
        }
        Ok(())
    }

    pub fn registry(&self) -> &Arc<SensorRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device_groups(&self) -> &[(Arc<Device>, Vec<ScanGroup>)] {
        &self.device_groups
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.config.connection.lock_timeout_ms)
    }

    fn publish_context(&self) -> PublishContext {
        PublishContext {
            bus: self.bus.clone(),
            lock: self.lock.clone(),
            publisher: self.publisher.clone(),
            qos: self.config.mqtt.qos,
            retain: self.config.mqtt.retain,
            lock_timeout: self.lock_timeout(),
            count_sanity_failures: self.config.polling.count_sanity_failures,
        }
    }

    pub fn command_service(&self) -> CommandService {
        CommandService::new(
            self.registry.clone(),
            self.bus.clone(),
            self.lock.clone(),
            self.publisher.clone(),
            self.config.mqtt.command_topic.clone(),
            self.config.mqtt.response_topic.clone(),
            self.lock_timeout(),
            self.config.mqtt.qos,
        )
    }

    /// Dry-run view of the grouping, for the CLI.
    pub fn print_groups(&self) {
        for (device, groups) in &self.device_groups {
            println!(
                "Device '{}' (address {}): {} groups",
                device.name(),
                device.address(),
                groups.len()
            );
            for group in groups {
                println!(
                    "  {} [{} sensors]: {}",
                    group.name,
                    group.sensors.len(),
                    group.keys().join(", ")
                );
            }
        }
    }

    /// Run until a shutdown signal arrives: one scheduler task per scan
    /// group, the inbound command listener and the periodic re-announcement
    /// task, all multiplexed on the runtime.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let mut scheduler_handles = Vec::new();
        for (device, groups) in &self.device_groups {
            for group in groups {
                let scheduler = PollScheduler::new(
                    group.clone(),
                    self.publish_context(),
                    device.online_rx(),
                    self.config.connection.max_registers_per_request,
                    Duration::from_millis(self.config.connection.reconnect_delay_ms),
                );
                scheduler_handles.push(tokio::spawn(scheduler.run()));
            }
        }

        let command_handle = tokio::spawn(self.command_service().run());
        let announce_handle = tokio::spawn(Self::announce_loop(
            self.registry.clone(),
            Duration::from_secs(self.config.polling.announce_interval_seconds),
        ));

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Failed to listen for shutdown signal: {}", e);
        }
        info!("🛑 Shutdown requested; taking devices offline");
        for (device, _) in &self.device_groups {
            device.set_online(false);
        }
        for handle in scheduler_handles {
            let _ = handle.await;
        }
        command_handle.abort();
        announce_handle.abort();
        info!("👋 Gateway stopped");
        Ok(())
    }

    /// Housekeeping: periodically force-publish every publishable sensor so
    /// late-joining consumers converge on current state.
    async fn announce_loop(registry: Arc<SensorRegistry>, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let mut ticker = time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let mut announced = 0;
            for sensor in registry.iter() {
                if sensor.core().publishable() {
                    sensor.core().set_force_publish();
                    announced += 1;
                }
            }
            info!("📣 Re-announcing {} sensors", announced);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimulatedBus;
    use crate::output::publisher::LoopbackBus;
    use crate::sensors::Transform;

    fn service_from(config: Config) -> Result<GatewayService, GatewayError> {
        GatewayService::new(
            config,
            Arc::new(SimulatedBus::new()),
            Arc::new(LoopbackBus::new()),
        )
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.persistence.data_dir = tempfile::tempdir()
            .unwrap()
            .keep()
            .to_string_lossy()
            .to_string();
        config
    }

    #[test]
    fn test_default_config_builds() {
        let service = service_from(test_config()).unwrap();
        assert_eq!(service.registry().len(), 8);

        let (_, groups) = &service.device_groups()[0];
        // Registers 100-103 form one run, 120 its own, plus the catch-all.
        assert_eq!(groups.len(), 3);
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert!(names.contains(&"scan-1-100"));
        assert!(names.contains(&"scan-1-120"));
        assert!(names.contains(&"virtual"));
    }

    #[test]
    fn test_duplicate_sensor_key_is_a_construction_error() {
        let mut config = test_config();
        let duplicate = config.devices[0].sensors[0].clone();
        config.devices[0].sensors.push(duplicate);
        let err = service_from(config).unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateSensor(_)));
    }

    #[test]
    fn test_missing_source_is_a_construction_error() {
        let mut config = test_config();
        if let SensorKindConfig::Computed { sources, .. } =
            &mut config.devices[0].sensors[4].kind
        {
            sources.push("meter.does_not_exist".to_string());
        } else {
            panic!("expected computed sensor at index 4");
        }
        let err = service_from(config).unwrap_err();
        assert!(matches!(err, GatewayError::ConfigError(_)));
    }

    #[test]
    fn test_source_declared_after_dependent_is_rejected() {
        let mut config = test_config();
        // The sum sensor at index 4 references the phases declared before
        // it; moving it to the front breaks declaration order.
        let computed = config.devices[0].sensors.remove(4);
        config.devices[0].sensors.insert(0, computed);
        assert!(service_from(config).is_err());
    }

    #[test]
    fn test_register_fan_out_reaches_daily_sensor() {
        let config = test_config();
        let service = service_from(config).unwrap();
        // power_l1 feeds power_total (sum) feeds energy_total feeds
        // energy_today, so the register sensor reports a daily feeder.
        let node = service.registry().get("meter.power_l1").unwrap();
        assert!(node.core().feeds_daily());
        let voltage = service.registry().get("meter.voltage_l1").unwrap();
        assert!(!voltage.core().feeds_daily());
    }

    #[test]
    fn test_disable_chunking_splits_every_register() {
        let mut config = test_config();
        config.connection.disable_chunking = true;
        let service = service_from(config).unwrap();
        let (_, groups) = &service.device_groups()[0];
        // Five addressable sensors, each alone, plus the catch-all.
        assert_eq!(groups.len(), 6);
    }

    #[test]
    fn test_named_group_in_config_passes_through() {
        let mut config = test_config();
        config.devices[0].sensors[0].scan_group = Some("fast".to_string());
        let service = service_from(config).unwrap();
        let (_, groups) = &service.device_groups()[0];
        let fast = groups.iter().find(|g| g.name == "fast").unwrap();
        assert_eq!(fast.keys(), vec!["meter.voltage_l1"]);
    }

    #[test]
    fn test_child_device_sensors_group_under_root() {
        let mut config = test_config();
        let child_sensor = SensorConfig {
            key: "sub.status".to_string(),
            name: "Sub Status".to_string(),
            kind: SensorKindConfig::Register {
                register: 10,
                count: None,
                register_kind: crate::bus::RegisterKind::Holding,
                value_type: crate::bus::ValueType::U16,
                access: crate::sensors::Access::ReadOnly,
                reserved: false,
            },
            unit: None,
            topic: None,
            scan_interval_seconds: None,
            gain: None,
            precision: None,
            publishable: None,
            scan_group: None,
            min_raw: None,
            max_raw: None,
            delta_check: None,
            max_failures: None,
            retry_interval_seconds: None,
        };
        config.devices[0].children.push(DeviceConfig {
            uuid: "child-uuid".to_string(),
            name: "Sub Unit".to_string(),
            address: 2,
            enabled: true,
            sensors: vec![child_sensor],
            children: Vec::new(),
        });

        let service = service_from(config).unwrap();
        let (device, groups) = &service.device_groups()[0];
        assert_eq!(device.collect_sensors().len(), 9);
        assert!(groups.iter().any(|g| g.name == "scan-2-10"));
    }

    #[test]
    fn test_computed_transform_survives_construction() {
        let config = test_config();
        let service = service_from(config).unwrap();
        let node = service.registry().get("meter.power_total").unwrap();
        assert!(matches!(node, SensorNode::Computed(_)));
        // Push through the registered fan-out and observe the sum.
        let l1 = service.registry().get("meter.power_l1").unwrap();
        let l2 = service.registry().get("meter.power_l2").unwrap();
        l1.core().accept(100.0, chrono::Utc::now()).unwrap();
        l2.core().accept(50.0, chrono::Utc::now()).unwrap();
        let total = service.registry().get("meter.power_total").unwrap();
        assert_eq!(total.core().last_reading().unwrap().raw, 150.0);
    }

    #[test]
    fn test_transform_is_sum_for_default_power_total() {
        let config = test_config();
        if let SensorKindConfig::Computed { transform, .. } = &config.devices[0].sensors[4].kind {
            assert!(matches!(transform, Transform::Sum));
        } else {
            panic!("expected computed sensor");
        }
    }
}
