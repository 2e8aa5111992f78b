use crate::error::ConfigError;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{
    BusyPolicy, Config, EngineSettings, ExecutionSettings, ReconciliationSettings,
    ServerSettings, TelegramConfig,
};

/// Loads the application configuration from `meridian.toml` plus environment
/// overrides.
///
/// This function is the primary entry point for this crate. Every policy
/// value has a default, so a missing file yields a fully usable config; the
/// `MERIDIAN__` environment prefix overrides individual keys (for example
/// `MERIDIAN__ENGINE__CYCLE_INTERVAL_SECS=60`).
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from("meridian")
}

/// Loads configuration from an explicit file stem, used by tests and the
/// `--config` CLI flag.
pub fn load_config_from(name: &str) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(name).required(false))
        .add_source(
            config::Environment::with_prefix("MERIDIAN")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    // Attempt to deserialize the entire configuration into our `Config` struct
    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;

    Ok(config)
}
