use crate::error::ConfigError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// The root configuration structure for the entire application.
///
/// Tolerances, timeouts and the retry schedule are policy parameters, not
/// structure: they all live here with documented defaults instead of being
/// hardcoded at call sites.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSettings,
    pub execution: ExecutionSettings,
    pub reconciliation: ReconciliationSettings,
    pub server: ServerSettings,
    pub telegram: TelegramConfig,
}

impl Config {
    /// Validates that the loaded parameters are logical before the engine
    /// starts issuing orders with them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.cycle_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "engine.cycle_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.engine.lease_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "engine.lease_ttl_secs must be greater than 0".to_string(),
            ));
        }
        if self.execution.partial_fill_tolerance_pct < Decimal::ZERO
            || self.execution.partial_fill_tolerance_pct >= dec!(1)
        {
            return Err(ConfigError::ValidationError(
                "execution.partial_fill_tolerance_pct must be in [0, 1)".to_string(),
            ));
        }
        if self.reconciliation.dust_tolerance < Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "reconciliation.dust_tolerance must not be negative".to_string(),
            ));
        }
        if self.reconciliation.pending_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "reconciliation.pending_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// What the scheduler does with a trigger that arrives while a cycle is
/// already in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Reject the trigger with a `CycleBusy` signal.
    Reject,
    /// Queue at most one trigger for the next slot; further triggers are
    /// still rejected so a burst cannot build a backlog.
    Queue,
}

/// Parameters for the cycle scheduler.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Fixed interval between scheduled cycles, in seconds.
    pub cycle_interval_secs: u64,
    /// Policy for triggers arriving while a cycle is in progress.
    pub on_busy: BusyPolicy,
    /// Time-to-live of the durable cycle lease. Must comfortably exceed the
    /// longest expected cycle so a healthy instance never loses its lease
    /// mid-cycle.
    pub lease_ttl_secs: u64,
    /// How long shutdown waits for pending order confirmations before
    /// leaving them to restart-time reconciliation.
    pub shutdown_grace_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 300,
            on_busy: BusyPolicy::Reject,
            lease_ttl_secs: 600,
            shutdown_grace_secs: 30,
        }
    }
}

/// Parameters for the order execution pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Maximum resubmission attempts for transient venue errors.
    pub max_retries: u32,
    /// Base backoff before the first retry, in milliseconds. Doubles on
    /// every subsequent attempt.
    pub retry_backoff_ms: u64,
    /// A partial fill whose unfilled remainder is within this fraction of
    /// the requested quantity is accepted as complete (remainder cancelled).
    pub partial_fill_tolerance_pct: Decimal,
    /// Whether an accepted partial fill confirms a pending-open position.
    pub accept_partial_open: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 500,
            partial_fill_tolerance_pct: dec!(0.05),
            accept_partial_open: true,
        }
    }
}

/// Parameters for ledger-vs-venue reconciliation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconciliationSettings {
    /// Quantity differences at or below this are rounding noise, not drift.
    pub dust_tolerance: Decimal,
    /// A position stuck in a pending state longer than this is forcibly
    /// resolved by the reconciler.
    pub pending_timeout_secs: u64,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            dust_tolerance: dec!(0.0001),
            pending_timeout_secs: 900,
        }
    }
}

/// Bind address for the control API, separate from any trade-data ports.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3456,
        }
    }
}

/// Telegram alerting credentials. Empty values disable alerting.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.cycle_interval_secs, 300);
        assert_eq!(config.engine.on_busy, BusyPolicy::Reject);
        assert_eq!(config.execution.max_retries, 3);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config = Config::default();
        config.engine.cycle_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn full_fill_tolerance_is_rejected() {
        let mut config = Config::default();
        config.execution.partial_fill_tolerance_pct = dec!(1);
        assert!(config.validate().is_err());
    }
}
