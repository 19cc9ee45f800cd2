pub mod device;
pub mod registry;

pub use device::Device;
pub use registry::SensorRegistry;
