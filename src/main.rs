use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use log::{info, warn};

use fieldgate::bus::SimulatedBus;
use fieldgate::cli;
use fieldgate::config::{Config, DeviceConfig, SensorKindConfig};
use fieldgate::output::ConsolePublisher;
use fieldgate::services::GatewayService;

fn build_cli() -> Command {
    Command::new("fieldgate")
        .version(fieldgate::VERSION)
        .about("Industrial register-to-pubsub protocol gateway")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .default_value("config.toml")
                .help("Path to the TOML configuration file"),
        )
        .arg(
            Arg::new("init-config")
                .long("init-config")
                .action(ArgAction::SetTrue)
                .help("Write a default configuration file and exit"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .help("Log level: trace, debug, info, warn, error"),
        )
        .subcommand(Command::new("print-config").about("Print the effective configuration"))
        .subcommand(
            Command::new("print-groups").about("Dry-run the scan group builder and print groups"),
        )
        .subcommand(
            Command::new("write")
                .about("Write a value to a sensor and exit")
                .arg(Arg::new("sensor").required(true).help("Sensor key"))
                .arg(Arg::new("value").required(true).help("Engineering value")),
        )
        .subcommand(
            Command::new("reset-total")
                .about("Reset an accumulation sensor's running total")
                .arg(Arg::new("sensor").required(true).help("Sensor key"))
                .arg(Arg::new("value").help("New total (default 0)")),
        )
}

/// Seed the simulated bus so every configured register exists and reads as
/// zero until something writes it.
fn seed_simulated_registers(bus: &SimulatedBus, devices: &[DeviceConfig]) {
    for device in devices {
        for sensor in &device.sensors {
            if let SensorKindConfig::Register {
                register,
                count,
                register_kind,
                value_type,
                ..
            } = &sensor.kind
            {
                let count = count.unwrap_or_else(|| value_type.register_count());
                let zeros = vec![0u16; count as usize];
                bus.set_registers(device.address, *register_kind, *register, &zeros);
            }
        }
        seed_simulated_registers(bus, &device.children);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let log_level = matches.get_one::<String>("log-level").unwrap();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config_path = matches.get_one::<String>("config").unwrap();

    if matches.get_flag("init-config") {
        let config = Config::default();
        config.save_to_file(config_path)?;
        println!("✅ Wrote default configuration to {}", config_path);
        return Ok(());
    }

    let config = if Path::new(config_path).exists() {
        info!("📄 Loading configuration from {}", config_path);
        Config::from_file(config_path)?
    } else {
        warn!(
            "📄 {} not found, running with the built-in default configuration",
            config_path
        );
        Config::default()
    };

    // This build ships the simulated transport; real transports implement
    // `RegisterBus` and plug in here.
    let bus = Arc::new(SimulatedBus::new());
    seed_simulated_registers(&bus, &config.devices);
    let publisher = Arc::new(ConsolePublisher);

    let service = GatewayService::new(config, bus, publisher)?;

    if cli::handle_subcommands(&matches, &service).await? {
        return Ok(());
    }

    service.run().await?;
    Ok(())
}
