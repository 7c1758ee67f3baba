//! Kernel configuration.
//!
//! Every tunable lives here with its default. `KernelConfig::from_env`
//! overlays `TICKGATE_*` environment variables on top of the defaults.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::KernelError;
use super::time::TICK_MS;

/// Boolean feature switches read by the bus and the committer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Fill a missing packet `trace_id` from the active trace at publish time.
    pub trace_auto_inject: bool,
    /// Push a packet's trace id around each handler invocation.
    pub trace_handler_scope: bool,
    /// Synthesize `ext-*` ids for packets published outside any trace.
    pub trace_external_ids: bool,
    /// Publish tick lifecycle and commit telemetry synchronously.
    pub tick_telemetry_sync: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            trace_auto_inject: true,
            trace_handler_scope: true,
            trace_external_ids: false,
            tick_telemetry_sync: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub silence_window_ms: u64,
    pub voice_pressure_threshold: f64,
    pub recency_decay_ms: u64,
    pub goal_relevance_goal_driven: f64,
    pub goal_relevance_default: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            silence_window_ms: 5_000,
            voice_pressure_threshold: 0.6,
            recency_decay_ms: 30_000,
            goal_relevance_goal_driven: 0.8,
            goal_relevance_default: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomyConfig {
    /// Autonomous attempts allowed per 60s window.
    pub ops_per_minute: u32,
    pub base_cooldown_ms: u64,
    pub max_cooldown_ms: u64,
    /// Minimum user silence before an autonomous attempt.
    pub min_silence_ms: u64,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            ops_per_minute: 6,
            base_cooldown_ms: 25_000,
            max_cooldown_ms: 300_000,
            min_silence_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    pub dedup_window_ms: u64,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self { dedup_window_ms: 3_000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub flags: FeatureFlags,
    pub gate: GateConfig,
    pub autonomy: AutonomyConfig,
    pub commit: CommitConfig,
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub tick_interval_ms: u64,
    /// Whether the agent starts with autonomous mode enabled.
    pub autonomous_mode: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: TICK_MS,
            autonomous_mode: true,
        }
    }
}

impl KernelConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Recognised variables:
    /// - `TICKGATE_TRACE_AUTO_INJECT`, `TICKGATE_TRACE_HANDLER_SCOPE`,
    ///   `TICKGATE_TRACE_EXTERNAL_IDS`, `TICKGATE_TICK_TELEMETRY_SYNC`
    /// - `TICKGATE_SILENCE_WINDOW_MS`, `TICKGATE_VOICE_PRESSURE_THRESHOLD`,
    ///   `TICKGATE_RECENCY_DECAY_MS`
    /// - `TICKGATE_AUTONOMY_OPS_PER_MINUTE`, `TICKGATE_AUTONOMY_BASE_COOLDOWN_MS`,
    ///   `TICKGATE_AUTONOMY_MIN_SILENCE_MS`
    /// - `TICKGATE_DEDUP_WINDOW_MS`
    /// - `TICKGATE_TICK_INTERVAL_MS`, `TICKGATE_AUTONOMOUS_MODE`
    pub fn from_env() -> Result<Self, KernelError> {
        let defaults = Self::default();

        let flags = FeatureFlags {
            trace_auto_inject: env_or("TICKGATE_TRACE_AUTO_INJECT", defaults.flags.trace_auto_inject)?,
            trace_handler_scope: env_or("TICKGATE_TRACE_HANDLER_SCOPE", defaults.flags.trace_handler_scope)?,
            trace_external_ids: env_or("TICKGATE_TRACE_EXTERNAL_IDS", defaults.flags.trace_external_ids)?,
            tick_telemetry_sync: env_or("TICKGATE_TICK_TELEMETRY_SYNC", defaults.flags.tick_telemetry_sync)?,
        };

        let gate = GateConfig {
            silence_window_ms: env_or("TICKGATE_SILENCE_WINDOW_MS", defaults.gate.silence_window_ms)?,
            voice_pressure_threshold: env_or(
                "TICKGATE_VOICE_PRESSURE_THRESHOLD",
                defaults.gate.voice_pressure_threshold,
            )?,
            recency_decay_ms: env_or("TICKGATE_RECENCY_DECAY_MS", defaults.gate.recency_decay_ms)?,
            ..defaults.gate
        };

        let autonomy = AutonomyConfig {
            ops_per_minute: env_or("TICKGATE_AUTONOMY_OPS_PER_MINUTE", defaults.autonomy.ops_per_minute)?,
            base_cooldown_ms: env_or(
                "TICKGATE_AUTONOMY_BASE_COOLDOWN_MS",
                defaults.autonomy.base_cooldown_ms,
            )?,
            min_silence_ms: env_or("TICKGATE_AUTONOMY_MIN_SILENCE_MS", defaults.autonomy.min_silence_ms)?,
            ..defaults.autonomy
        };

        let commit = CommitConfig {
            dedup_window_ms: env_or("TICKGATE_DEDUP_WINDOW_MS", defaults.commit.dedup_window_ms)?,
        };

        let driver = DriverConfig {
            tick_interval_ms: env_or("TICKGATE_TICK_INTERVAL_MS", defaults.driver.tick_interval_ms)?,
            autonomous_mode: env_or("TICKGATE_AUTONOMOUS_MODE", defaults.driver.autonomous_mode)?,
        };

        Ok(Self {
            flags,
            gate,
            autonomy,
            commit,
            driver,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, KernelError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| KernelError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}
