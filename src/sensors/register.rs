use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::core::{Reading, SensorCore};
use crate::bus::{decode_value, encode_value, RegisterBus, RegisterKind, ValueType};
use crate::utils::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

impl Access {
    pub fn is_readable(&self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, Access::ReadOnly)
    }
}

/// An addressable sensor backed by a contiguous register run on one device.
pub struct RegisterSensor {
    core: SensorCore,
    device_address: u8,
    address: u16,
    count: u16,
    kind: RegisterKind,
    value_type: ValueType,
    access: Access,
    reserved: bool,
}

impl RegisterSensor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        core: SensorCore,
        device_address: u8,
        address: u16,
        count: Option<u16>,
        kind: RegisterKind,
        value_type: ValueType,
        access: Access,
        reserved: bool,
    ) -> Self {
        Self {
            core,
            device_address,
            address,
            count: count.unwrap_or_else(|| value_type.register_count()),
            kind,
            value_type,
            access,
            reserved,
        }
    }

    pub fn core(&self) -> &SensorCore {
        &self.core
    }

    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    /// First register past this sensor's run.
    pub fn end_address(&self) -> u16 {
        self.address.saturating_add(self.count)
    }

    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// Placeholder kept only to preserve address continuity in a scan group.
    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    /// Perform the physical read and run the accepted reading through the
    /// sanity gate and fan-out. The caller holds the connection lock.
    pub async fn fetch(&self, bus: &dyn RegisterBus) -> Result<Reading, GatewayError> {
        let registers = bus
            .read(self.kind, self.address, self.count, self.device_address)
            .await?;
        let raw = decode_value(self.value_type, &registers)?;
        let at = Utc::now();
        self.core.accept(raw, at)?;
        Ok(Reading { at, raw })
    }

    /// Write an engineering value back to the device. The inverse of the
    /// publish scaling: the gain divides out before encoding.
    pub async fn write_value(
        &self,
        bus: &dyn RegisterBus,
        engineering_value: f64,
        gain: f64,
    ) -> Result<(), GatewayError> {
        if !self.access.is_writable() {
            return Err(GatewayError::CommandError(format!(
                "Sensor '{}' is not writable",
                self.core.key()
            )));
        }
        let raw = if gain != 0.0 {
            engineering_value / gain
        } else {
            engineering_value
        };
        let registers = encode_value(self.value_type, raw);
        bus.write(self.address, &registers, self.device_address)
            .await
    }
}
