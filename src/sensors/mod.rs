pub mod accumulation;
pub mod core;
pub mod derived;
pub mod register;
pub mod sanity;

use std::sync::Arc;
use std::time::Duration;

use log::debug;

pub use accumulation::{AccumulationSensor, DailyAccumulationSensor, ScalarStore};
pub use self::core::{CoreSpec, FailureBudget, History, Reading, SensorCore};
pub use derived::{DerivedRef, DerivedSensor, Transform};
pub use register::{Access, RegisterSensor};
pub use sanity::SanityCheck;

use crate::bus::{ConnectionLock, RegisterBus};
use crate::output::payload::state_document;
use crate::output::publisher::MessageBus;
use crate::utils::error::GatewayError;

/// Everything a sensor needs to resolve and publish its state.
pub struct PublishContext {
    pub bus: Arc<dyn RegisterBus>,
    pub lock: Arc<ConnectionLock>,
    pub publisher: Arc<dyn MessageBus>,
    pub qos: u8,
    pub retain: bool,
    pub lock_timeout: Duration,
    pub count_sanity_failures: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    Skipped,
}

/// A concrete sensor: one register-backed flavor plus the three computed
/// flavors, crossed with access via `Access` on the register variant.
#[derive(Clone)]
pub enum SensorNode {
    Register(Arc<RegisterSensor>),
    Computed(Arc<DerivedSensor>),
    Accumulation(Arc<AccumulationSensor>),
    Daily(Arc<DailyAccumulationSensor>),
}

impl SensorNode {
    pub fn core(&self) -> &SensorCore {
        match self {
            SensorNode::Register(s) => s.core(),
            SensorNode::Computed(s) => s.core(),
            SensorNode::Accumulation(s) => s.core(),
            SensorNode::Daily(s) => s.core(),
        }
    }

    pub fn key(&self) -> &str {
        self.core().key()
    }

    pub fn register(&self) -> Option<&RegisterSensor> {
        match self {
            SensorNode::Register(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_addressable(&self) -> bool {
        matches!(self, SensorNode::Register(_))
    }

    /// Readable sensors are the ones the poll loop is responsible for:
    /// register sensors with a read path, and computed sensors that
    /// republish their latest state.
    pub fn is_readable(&self) -> bool {
        match self {
            SensorNode::Register(s) => s.access().is_readable(),
            _ => true,
        }
    }

    /// Fan-out reference for registering this sensor on its sources.
    /// Register sensors have their own read path and are never pushed into.
    pub fn as_derived_ref(&self) -> Option<DerivedRef> {
        match self {
            SensorNode::Register(_) => None,
            SensorNode::Computed(s) => Some(DerivedRef::Computed(s.clone())),
            SensorNode::Accumulation(s) => Some(DerivedRef::Accumulation(s.clone())),
            SensorNode::Daily(s) => Some(DerivedRef::Daily(s.clone())),
        }
    }

    /// Resolve the current state and forward it to the publish boundary.
    ///
    /// Register sensors perform the physical read under the bounded
    /// connection lock; computed sensors republish their last accepted
    /// value. Every failure is recorded against the sensor's own budget
    /// here; only a connection-level transport error escapes to the caller
    /// unrecorded, for the scheduler's reconnection loop to handle.
    pub async fn publish(&self, ctx: &PublishContext) -> Result<PublishOutcome, GatewayError> {
        let core = self.core();
        if !core.publishable() {
            return Ok(PublishOutcome::Skipped);
        }
        if core.is_blocked() {
            return Ok(PublishOutcome::Skipped);
        }

        let reading = match self {
            SensorNode::Register(sensor) => {
                let guard = match ctx.lock.acquire(ctx.lock_timeout).await {
                    Ok(guard) => guard,
                    Err(_) => {
                        debug!(
                            "⏳ Sensor '{}' skipped: connection busy",
                            core.key()
                        );
                        return Ok(PublishOutcome::Skipped);
                    }
                };
                let result = sensor.fetch(ctx.bus.as_ref()).await;
                drop(guard);

                match result {
                    Ok(reading) => {
                        core.record_success();
                        reading
                    }
                    Err(e) if e.is_disconnection() => return Err(e),
                    Err(GatewayError::Exception(code)) => {
                        if code.is_permanent() {
                            core.record_permanent_failure();
                        } else {
                            core.record_failure();
                        }
                        return Err(GatewayError::Exception(code));
                    }
                    Err(e @ GatewayError::Validation(_)) => {
                        if ctx.count_sanity_failures {
                            core.record_failure();
                        }
                        return Err(e);
                    }
                    Err(e) => {
                        core.record_failure();
                        return Err(e);
                    }
                }
            }
            // No independent read path: republish the last accepted value.
            _ => match core.last_reading() {
                Some(reading) => reading,
                None => return Ok(PublishOutcome::Skipped),
            },
        };

        let document = state_document(core.key(), core.scaled(reading.raw), core.unit(), reading.at);
        ctx.publisher
            .publish(core.topic(), &document.to_string(), ctx.qos, ctx.retain)
            .await?;
        Ok(PublishOutcome::Published)
    }
}
