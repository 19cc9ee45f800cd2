pub mod payload;
pub mod publisher;

pub use payload::state_document;
pub use publisher::{ConsolePublisher, LoopbackBus, MessageBus};
