pub mod overrides;
pub mod settings;

pub use overrides::{resolve, wildcard_match, ResolvedSettings};
pub use settings::{
    Config, ConnectionConfig, DeviceConfig, MqttConfig, OverrideConfig, PersistenceConfig,
    PollingConfig, SensorConfig, SensorKindConfig,
};
