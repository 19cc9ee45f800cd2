pub mod command_service;
pub mod gateway_service;

pub use command_service::{CommandAction, CommandMessage, CommandResponse, CommandService};
pub use gateway_service::GatewayService;
