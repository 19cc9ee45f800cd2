use clap::ArgMatches;
use log::info;
use uuid::Uuid;

use crate::services::{CommandAction, CommandMessage, GatewayService};
use crate::utils::error::GatewayError;

/// Handle one-shot subcommands. Returns `true` when a subcommand ran and the
/// process should exit instead of entering the poll loops.
pub async fn handle_subcommands(
    matches: &ArgMatches,
    service: &GatewayService,
) -> Result<bool, GatewayError> {
    if matches.subcommand_matches("print-config").is_some() {
        let text = toml::to_string_pretty(service.config())
            .map_err(|e| GatewayError::SerializationError(format!("TOML error: {}", e)))?;
        println!("{}", text);
        return Ok(true);
    }

    if matches.subcommand_matches("print-groups").is_some() {
        info!("🧩 Dry-running the scan group builder");
        service.print_groups();
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("write") {
        let sensor = matches.get_one::<String>("sensor").unwrap();
        let value: f64 = matches
            .get_one::<String>("value")
            .unwrap()
            .parse()
            .map_err(|e| GatewayError::InvalidData(format!("Bad value: {}", e)))?;

        let command = CommandMessage {
            message_id: Uuid::new_v4().to_string(),
            operator: "cli".to_string(),
            sensor: sensor.clone(),
            action: CommandAction::Write,
            value: Some(value),
        };
        service.command_service().execute(&command).await?;
        println!("✅ Wrote {} to '{}'", value, sensor);
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("reset-total") {
        let sensor = matches.get_one::<String>("sensor").unwrap();
        let value: f64 = match matches.get_one::<String>("value") {
            Some(text) => text
                .parse()
                .map_err(|e| GatewayError::InvalidData(format!("Bad value: {}", e)))?,
            None => 0.0,
        };

        let command = CommandMessage {
            message_id: Uuid::new_v4().to_string(),
            operator: "cli".to_string(),
            sensor: sensor.clone(),
            action: CommandAction::ResetTotal,
            value: Some(value),
        };
        service.command_service().execute(&command).await?;
        println!("✅ Reset total of '{}' to {}", sensor, value);
        return Ok(true);
    }

    Ok(false)
}
