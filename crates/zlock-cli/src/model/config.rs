//! Configuration management for the zlock demo
//!
//! Sources, lowest priority first: `conf/application.yml` (optional),
//! `ZLOCK_*` environment variables (`__` separates nested keys, e.g.
//! `ZLOCK_LOCK__ROOT_PATH`), then command line flags.

use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment};
use zlock_recipe::LockConfig;

use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const DEFAULT_HOSTS: u32 = 3;
pub const DEFAULT_HOLD_SECS: u64 = 10;

/// Command line arguments for the demo
#[derive(Debug, Parser)]
#[command(
    name = "zlock",
    version,
    about = "Simulated hosts taking turns on a distributed lock"
)]
pub struct Cli {
    /// Number of contending hosts
    #[arg(long = "hosts")]
    pub hosts: Option<u32>,
    /// Seconds each host holds the lock
    #[arg(long = "hold-secs")]
    pub hold_secs: Option<u64>,
    /// Lock root path
    #[arg(short = 'r', long = "root")]
    pub root: Option<String>,
    /// Console and file log level
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE, env = "ZLOCK_CONFIG")]
    pub config_file: String,
}

/// Application configuration loaded from config file, environment and flags
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new() -> anyhow::Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(args: Cli) -> anyhow::Result<Self> {
        let mut config_builder = Config::builder()
            .add_source(config::File::with_name(&args.config_file).required(false))
            .add_source(
                Environment::with_prefix("ZLOCK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(v) = args.hosts {
            config_builder = config_builder.set_override("demo.hosts", v)?;
        }
        if let Some(v) = args.hold_secs {
            config_builder = config_builder.set_override("demo.hold_secs", v)?;
        }
        if let Some(v) = args.root {
            config_builder = config_builder.set_override("lock.root_path", v)?;
        }
        if let Some(v) = args.log_level {
            config_builder = config_builder.set_override("logs.level", v)?;
        }

        let config = config_builder.build()?;
        Ok(Configuration { config })
    }

    // ========================================================================
    // Demo
    // ========================================================================

    pub fn hosts(&self) -> u32 {
        self.config
            .get_int("demo.hosts")
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(DEFAULT_HOSTS)
    }

    pub fn hold(&self) -> Duration {
        let secs = self
            .config
            .get_int("demo.hold_secs")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(DEFAULT_HOLD_SECS);
        Duration::from_secs(secs)
    }

    // ========================================================================
    // Lock
    // ========================================================================

    /// The `lock` table as a validated [`LockConfig`]; missing keys take defaults
    pub fn lock_config(&self) -> anyhow::Result<LockConfig> {
        let lock_config = match self.config.get::<LockConfig>("lock") {
            Ok(lock_config) => lock_config,
            Err(ConfigError::NotFound(_)) => LockConfig::default(),
            Err(e) => return Err(e.into()),
        };
        lock_config.validate()?;
        Ok(lock_config)
    }

    // ========================================================================
    // Logging
    // ========================================================================

    /// `logs.*` keys, falling back to the `ZLOCK_LOG_*` variables
    pub fn logging_config(&self) -> LoggingConfig {
        let env = LoggingConfig::from_env();
        let log_dir = self
            .config
            .get_string("logs.path")
            .unwrap_or_else(|_| env.log_dir.display().to_string());
        let level = self
            .config
            .get_string("logs.level")
            .unwrap_or_else(|_| env.console_level.to_string());
        let rotation = self
            .config
            .get_string("logs.rotation")
            .unwrap_or_else(|_| env.rotation.as_str().to_string());

        LoggingConfig::from_config(
            Some(log_dir),
            self.config
                .get_bool("logs.console")
                .unwrap_or(env.console_output),
            self.config.get_bool("logs.file").unwrap_or(env.file_logging),
            &level,
            &rotation,
        )
    }
}
