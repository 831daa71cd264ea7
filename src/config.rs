// src/config.rs

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Tuning knobs for a supervised [`crate::process::Process`].
///
/// Defaults: five-second start/stop timeouts, a half-second watch
/// interval.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct SupervisorSettings {
    pub start_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub watch_interval_ms: u64,
}

impl SupervisorSettings {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            start_timeout_ms: 5_000,
            stop_timeout_ms: 5_000,
            watch_interval_ms: 500,
        }
    }
}

/// Tuning knobs for a [`crate::queue::Bridge`].
///
/// Defaults: a 250ms linger on shutdown, no high water mark (unbounded
/// buffer), and bulk replies capped at one message unless the caller
/// asks for more.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct BridgeSettings {
    pub bulk_size: usize,
    pub linger_ms: u64,
    pub high_water_mark: usize,
}

impl BridgeSettings {
    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            bulk_size: 1,
            linger_ms: 250,
            high_water_mark: 0,
        }
    }
}

/// Top-level settings for a process hosting both a supervisor and a
/// bridge, loaded from `Settings.toml` / `Settings.<RUN_MODE>.toml`
/// plus `APP__*` environment overrides.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub debug_mode: bool,
    pub supervisor: SupervisorSettings,
    pub bridge: BridgeSettings,
}

impl AppConfig {
    /// Loads configuration the way the rest of this lineage does:
    /// defaults, then `Settings.toml`, then `Settings.<RUN_MODE>.toml`,
    /// then `APP__*` environment variables, in increasing precedence.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("app_name", "supervisor_bridge")?
            .set_default("environment", "development")?
            .set_default("debug_mode", false)?
            .set_default("supervisor.start_timeout_ms", 5_000)?
            .set_default("supervisor.stop_timeout_ms", 5_000)?
            .set_default("supervisor.watch_interval_ms", 500)?
            .set_default("bridge.bulk_size", 1)?
            .set_default("bridge.linger_ms", 250)?
            .set_default("bridge.high_water_mark", 0)?;

        let builder = builder.add_source(File::with_name("Settings").required(false));
        let builder =
            builder.add_source(File::with_name(&format!("Settings.{}", run_mode)).required(false));
        let builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }

    /// Same validation contract as the rest of the lineage: return a
    /// human-readable `String` on the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.app_name.is_empty() {
            return Err("app_name must be provided".into());
        }
        if self.supervisor.start_timeout_ms == 0 {
            return Err("supervisor.start_timeout_ms must be greater than 0".into());
        }
        if self.supervisor.stop_timeout_ms == 0 {
            return Err("supervisor.stop_timeout_ms must be greater than 0".into());
        }
        if self.bridge.bulk_size == 0 {
            return Err("bridge.bulk_size must be greater than 0".into());
        }
        Ok(())
    }

    /// A config usable in tests and doctests without touching the
    /// filesystem or environment.
    pub fn dummy() -> Self {
        Self {
            app_name: "supervisor_bridge".into(),
            environment: "development".into(),
            debug_mode: false,
            supervisor: SupervisorSettings::default(),
            bridge: BridgeSettings::default(),
        }
    }
}
