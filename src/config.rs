use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::MigratorError;
use crate::migrator::Pattern;

static CONFIG: OnceCell<Config> = OnceCell::new();

const ENV_PREFIX: &str = "MIGRATOR_";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub migrator: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const MIGRATOR_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            migrator: Self::MIGRATOR_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.migrator.clone();
        self.migrator = self.migrator.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.migrator.as_str()) {
            eprintln!(
                "Config error: migrator log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::MIGRATOR_LEVEL
            );
            self.migrator = Self::MIGRATOR_LEVEL.to_owned();
        }
    }

    /// flexi_logger filter: our level for this crate, warnings for everything else
    pub fn log_spec(&self) -> String {
        format!("warn, migrator={}", self.migrator)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8081,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub src: String,
    pub dst: String,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    const POOL_SIZE: u32 = 8;
    const BUSY_TIMEOUT_MS: u64 = 5000;

    fn default() -> Self {
        DatabaseConfig {
            src: "src.db".to_string(),
            dst: "dst.db".to_string(),
            pool_size: Self::POOL_SIZE,
            busy_timeout_ms: Self::BUSY_TIMEOUT_MS,
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    fn ensure_valid(&mut self) {
        if self.pool_size == 0 {
            eprintln!(
                "Config error: pool_size must be positive - using default of {}",
                Self::POOL_SIZE
            );
            self.pool_size = Self::POOL_SIZE;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MigratorConfig {
    pattern: String,
    pub batch_size: i64,
    pub topic: String,
    pub group_id: String,
    pub max_redeliveries: u32,
}

impl MigratorConfig {
    const BATCH_SIZE: i64 = 100;

    pub fn pattern(&self) -> Pattern {
        // ensure_valid has already rejected anything unparseable
        self.pattern.parse().unwrap_or(Pattern::SrcOnly)
    }

    fn default() -> Self {
        MigratorConfig {
            pattern: Pattern::SrcOnly.to_string(),
            batch_size: Self::BATCH_SIZE,
            topic: "inconsistent_interactive".to_string(),
            group_id: "migrator".to_string(),
            max_redeliveries: 3,
        }
    }

    fn ensure_valid(&mut self) {
        match self.pattern.parse::<Pattern>() {
            Ok(pattern) => self.pattern = pattern.to_string(),
            Err(_) => {
                eprintln!(
                    "Config error: pattern of '{}' is invalid - using default of '{}'",
                    self.pattern,
                    Pattern::SrcOnly
                );
                self.pattern = Pattern::SrcOnly.to_string();
            }
        }

        if self.batch_size <= 0 {
            eprintln!(
                "Config error: batch_size of {} is invalid - using default of {}",
                self.batch_size,
                Self::BATCH_SIZE
            );
            self.batch_size = Self::BATCH_SIZE;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub migrator: MigratorConfig,
}

impl Config {
    fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            migrator: MigratorConfig::default(),
        }
    }

    /// `config.toml` in the platform config directory, if one can be determined
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "migrator").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads defaults, then the TOML file (if it exists), then `MIGRATOR_*`
    /// environment variables. On error, reports on stderr and falls back to defaults.
    pub fn load_config(config_path: Option<&Path>) -> Self {
        let default_config = Config::default();

        let mut figment = Figment::from(Serialized::defaults(default_config.clone()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load configuration: {}. Using default configuration.",
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.database.ensure_valid();
        self.migrator.ensure_valid();
    }

    pub fn to_toml(&self) -> Result<String, MigratorError> {
        toml::to_string_pretty(self)
            .map_err(|e| MigratorError::Error(format!("Failed to serialize config: {}", e)))
    }

    pub fn init(config: Config) -> Result<&'static Config, MigratorError> {
        CONFIG
            .set(config)
            .map_err(|_| MigratorError::Error("Configuration already initialized".into()))?;
        Self::get()
    }

    pub fn get() -> Result<&'static Config, MigratorError> {
        CONFIG
            .get()
            .ok_or_else(|| MigratorError::Error("Configuration not initialized".into()))
    }
}
