pub mod lock;
pub mod sim;
pub mod traits;
pub mod words;

pub use lock::{ConnectionGuard, ConnectionLock};
pub use sim::SimulatedBus;
pub use traits::{ExceptionCode, RegisterBus, RegisterKind};
pub use words::{decode_value, encode_value, ValueType};
