//! Industrial Register Gateway Library
//!
//! This library polls fleets of register-based industrial devices over a
//! half-duplex request/response link and republishes their state on a
//! topic-based pub/sub model, with an inbound command path writing values
//! back. Sensors are batched into scan groups to minimize physical
//! round-trips, validated before acceptance, and fanned out synchronously
//! into derived and accumulation sensors with durable running totals.

pub mod bus;
pub mod cli;
pub mod config;
pub mod devices;
pub mod output;
pub mod scheduler;
pub mod sensors;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use bus::{ConnectionLock, RegisterBus, RegisterKind, SimulatedBus, ValueType};
pub use config::Config;
pub use devices::{Device, SensorRegistry};
pub use output::{ConsolePublisher, MessageBus};
pub use scheduler::{PollScheduler, ScanGroup, ScanGroupBuilder};
pub use sensors::{SanityCheck, SensorNode};
pub use services::{CommandService, GatewayService};
pub use utils::error::GatewayError;

pub const VERSION: &str = "1.0.0";
