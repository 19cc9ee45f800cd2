use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::error::GatewayError;

/// Register table a sensor address lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    Holding,
    Input,
    Coil,
    Discrete,
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterKind::Holding => write!(f, "holding"),
            RegisterKind::Input => write!(f, "input"),
            RegisterKind::Coil => write!(f, "coil"),
            RegisterKind::Discrete => write!(f, "discrete"),
        }
    }
}

/// In-protocol response codes returned by the device side.
///
/// `IllegalAddress` is the one permanent failure: the register plainly does
/// not exist on the device, so the owning sensor is disabled without retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalAddress,
    IllegalValue,
    DeviceFailure,
    NoResponse,
}

impl ExceptionCode {
    pub fn code(&self) -> i8 {
        match self {
            ExceptionCode::IllegalFunction => 1,
            ExceptionCode::IllegalAddress => 2,
            ExceptionCode::IllegalValue => 3,
            ExceptionCode::DeviceFailure => 4,
            ExceptionCode::NoResponse => -1,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            1 => Some(ExceptionCode::IllegalFunction),
            2 => Some(ExceptionCode::IllegalAddress),
            3 => Some(ExceptionCode::IllegalValue),
            4 => Some(ExceptionCode::DeviceFailure),
            -1 => Some(ExceptionCode::NoResponse),
            _ => None,
        }
    }

    /// Permanent failures zero the failure budget immediately.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ExceptionCode::IllegalAddress)
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionCode::IllegalFunction => write!(f, "1 (illegal function)"),
            ExceptionCode::IllegalAddress => write!(f, "2 (illegal address)"),
            ExceptionCode::IllegalValue => write!(f, "3 (illegal value)"),
            ExceptionCode::DeviceFailure => write!(f, "4 (device failure)"),
            ExceptionCode::NoResponse => write!(f, "-1 (no response)"),
        }
    }
}

/// Abstract register transport. The wire encoding lives behind this trait;
/// the core only issues read/write/read-ahead transactions against it.
///
/// Errors split into two classes: `GatewayError::Exception` for in-protocol
/// response codes, and `GatewayError::ConnectionError` for transport-level
/// disconnection, which the scheduler answers with its reconnection loop.
#[async_trait]
pub trait RegisterBus: Send + Sync {
    async fn read(
        &self,
        kind: RegisterKind,
        address: u16,
        count: u16,
        device: u8,
    ) -> Result<Vec<u16>, GatewayError>;

    /// Pre-fetch a register window into the connection's response cache so
    /// the individual reads of the same poll pass are served without further
    /// round-trips.
    async fn read_ahead(
        &self,
        first_address: u16,
        count: u16,
        device: u8,
        kind: RegisterKind,
    ) -> Result<(), GatewayError>;

    async fn write(
        &self,
        address: u16,
        values: &[u16],
        device: u8,
    ) -> Result<(), GatewayError>;

    /// Close and reopen the underlying transport. Used only by the
    /// reconnection path, under the unbounded connection lock.
    async fn reopen(&self) -> Result<(), GatewayError>;
}
