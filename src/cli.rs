use clap::{Parser, Subcommand};
use flexi_logger::{detailed_format, Logger};
use log::info;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::MigratorError;

#[derive(Parser)]
#[command(
    name = "migrator",
    version,
    about = "Migrator: online dual-write migration with validation and repair"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the platform config directory)
    #[arg(long = "config", short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the control-plane server (default if no command specified)
    Serve,

    /// Print the effective configuration as TOML
    Config,
}

impl Cli {
    pub fn handle_command_line() -> Result<(), MigratorError> {
        let args = Cli::parse();

        let config_path = args.config.clone().or_else(Config::default_path);
        let config = Config::load_config(config_path.as_deref());

        // Default to Serve if no command specified
        match args.command.unwrap_or(Command::Serve) {
            Command::Serve => Self::start_server(config),
            Command::Config => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
        }
    }

    fn start_server(config: Config) -> Result<(), MigratorError> {
        // The handle must outlive the server or logging stops
        let _logger = Logger::try_with_env_or_str(config.logging.log_spec())
            .and_then(|logger| logger.format(detailed_format).start())
            .map_err(|e| MigratorError::Error(format!("Failed to start logger: {}", e)))?;

        let config = Config::init(config)?;
        let host = config.server.host.clone();
        let port = config.server.port;

        info!("Starting server on {}:{}", host, port);

        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| MigratorError::Error(format!("Failed to create runtime: {}", e)))?;

        rt.block_on(async {
            let web_server = crate::server::WebServer::new(host, port);
            web_server.start(config).await
        })
    }
}
