use anyhow::Result;
use clap::Parser;
use figment::{Figment, providers::{Env, Format, Toml, Serialized}};
use garde::Validate;

use super::AppConfig;

#[derive(Parser, Clone, Debug, Default)]
#[command(name = "request-telemetry", about = "Instrumented demo server")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, env = "APP_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    /// Server port
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Environment name
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Load configuration from the command line and the layered sources.
pub fn load_config() -> Result<AppConfig> {
    load_config_with(Cli::parse())
}

/// Merge, in increasing priority: embedded defaults, `config/default.toml`,
/// `config/{environment}.toml`, an explicit `--config` file, `APP_` environment
/// variables and finally CLI flags. The result is validated before returning.
pub fn load_config_with(cli: Cli) -> Result<AppConfig> {
    let env_name = cli.environment.clone().unwrap_or_else(||
        std::env::var("ENVIRONMENT").unwrap_or_else(|_| "production".to_string())
    );

    let mut figment = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file("config/default.toml"))
        .merge(Toml::file(format!("config/{}.toml", env_name)));

    if let Some(path) = &cli.config {
        figment = figment.merge(Toml::file(path));
    }

    let mut config: AppConfig = figment
        .merge(Env::prefixed("APP_").split("__"))
        .merge(Serialized::default("environment", env_name.to_lowercase()))
        .extract()?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.debug {
        config.logging.level = "debug".to_string();
    }

    config.validate()?;

    Ok(config)
}
