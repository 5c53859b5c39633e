// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Driver configuration: timing budgets, retry counts and failure policies.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct SanitizationChange {
    pub field: &'static str,
    pub original: String,
    pub sanitized: String,
    pub reason: String,
}

/// What to do when the compiled program does not fit into the waveform cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOverflowPolicy {
    #[default]
    Halt,
    Warn,
}

/// What to do when a vector write keeps failing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum CrashRecovery {
    /// Wait for the device to come back, then re-run the connection bootstrap.
    Reconnect { wait_s: f64 },
    #[default]
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub device: String,
    pub channels: usize,
    pub compile_timeout_ms: u64,
    pub compile_poll_interval_ms: u64,
    /// Pause between a finished compilation and the first upload poll.
    pub upload_settle_ms: u64,
    pub upload_poll_slow_ms: u64,
    pub upload_poll_medium_ms: u64,
    pub upload_poll_fast_ms: u64,
    /// Progress fraction from which the medium interval is used.
    pub upload_medium_threshold: f64,
    /// Progress fraction from which the fast interval is used.
    pub upload_fast_threshold: f64,
    pub cache_overflow_threshold: f64,
    pub cache_overflow: CacheOverflowPolicy,
    pub vector_write_attempts: u32,
    pub vector_write_backoff_ms: u64,
    pub crash_recovery: CrashRecovery,
    pub clock_change_budget_ms: u64,
    pub clock_change_poll_ms: u64,
    pub reference_clock_settle_ms: u64,
    pub halt_on_external_clock_failure: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device: "dev8000".to_string(),
            channels: 8,
            compile_timeout_ms: 10_000,
            compile_poll_interval_ms: 50,
            upload_settle_ms: 200,
            upload_poll_slow_ms: 600,
            upload_poll_medium_ms: 300,
            upload_poll_fast_ms: 25,
            upload_medium_threshold: 0.70,
            upload_fast_threshold: 0.98,
            cache_overflow_threshold: 0.9999,
            cache_overflow: CacheOverflowPolicy::Halt,
            vector_write_attempts: 3,
            vector_write_backoff_ms: 5_000,
            crash_recovery: CrashRecovery::Fail,
            clock_change_budget_ms: 2_950,
            clock_change_poll_ms: 50,
            reference_clock_settle_ms: 500,
            halt_on_external_clock_failure: false,
        }
    }
}

impl DriverConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| Error::Configuration(format!("Invalid driver configuration: {err}")))
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    pub fn compile_poll_interval(&self) -> Duration {
        Duration::from_millis(self.compile_poll_interval_ms)
    }

    pub fn upload_settle(&self) -> Duration {
        Duration::from_millis(self.upload_settle_ms)
    }

    /// Poll interval while the upload is at `progress`, shorter as it nears completion.
    pub fn upload_poll_interval(&self, progress: f64) -> Duration {
        let ms = if progress >= self.upload_fast_threshold {
            self.upload_poll_fast_ms
        } else if progress >= self.upload_medium_threshold {
            self.upload_poll_medium_ms
        } else {
            self.upload_poll_slow_ms
        };
        Duration::from_millis(ms)
    }

    pub fn vector_write_backoff(&self) -> Duration {
        Duration::from_millis(self.vector_write_backoff_ms)
    }

    pub fn clock_change_budget(&self) -> Duration {
        Duration::from_millis(self.clock_change_budget_ms)
    }

    pub fn clock_change_poll(&self) -> Duration {
        Duration::from_millis(self.clock_change_poll_ms)
    }

    pub fn reference_clock_settle(&self) -> Duration {
        Duration::from_millis(self.reference_clock_settle_ms)
    }

    /// Replace values the polling loops cannot work with.
    pub fn sanitize(&mut self) -> Vec<SanitizationChange> {
        let defaults = DriverConfig::default();
        let mut changes = vec![];
        let intervals = [
            (
                "compile_poll_interval_ms",
                &mut self.compile_poll_interval_ms,
                defaults.compile_poll_interval_ms,
            ),
            (
                "upload_poll_slow_ms",
                &mut self.upload_poll_slow_ms,
                defaults.upload_poll_slow_ms,
            ),
            (
                "upload_poll_medium_ms",
                &mut self.upload_poll_medium_ms,
                defaults.upload_poll_medium_ms,
            ),
            (
                "upload_poll_fast_ms",
                &mut self.upload_poll_fast_ms,
                defaults.upload_poll_fast_ms,
            ),
            (
                "clock_change_poll_ms",
                &mut self.clock_change_poll_ms,
                defaults.clock_change_poll_ms,
            ),
        ];
        for (field, value, default) in intervals {
            if *value == 0 {
                changes.push(SanitizationChange {
                    field,
                    original: value.to_string(),
                    sanitized: default.to_string(),
                    reason: "A poll interval of zero never advances the timeout budget.".to_string(),
                });
                *value = default;
            }
        }
        if self.vector_write_attempts == 0 {
            changes.push(SanitizationChange {
                field: "vector_write_attempts",
                original: "0".to_string(),
                sanitized: "1".to_string(),
                reason: "At least one write attempt is required.".to_string(),
            });
            self.vector_write_attempts = 1;
        }
        let max_channels = usize::from(hdawg_common::device_traits::HDAWG_TRAITS.max_channels);
        if self.channels == 0 || self.channels > max_channels {
            let sanitized = self.channels.clamp(1, max_channels);
            changes.push(SanitizationChange {
                field: "channels",
                original: self.channels.to_string(),
                sanitized: sanitized.to_string(),
                reason: format!("Must be between 1 and {max_channels}."),
            });
            self.channels = sanitized;
        }
        let thresholds = [
            (
                "upload_medium_threshold",
                &mut self.upload_medium_threshold,
                defaults.upload_medium_threshold,
            ),
            (
                "upload_fast_threshold",
                &mut self.upload_fast_threshold,
                defaults.upload_fast_threshold,
            ),
            (
                "cache_overflow_threshold",
                &mut self.cache_overflow_threshold,
                defaults.cache_overflow_threshold,
            ),
        ];
        for (field, value, default) in thresholds {
            if value.is_nan() || *value <= 0.0 || *value > 1.0 {
                changes.push(SanitizationChange {
                    field,
                    original: value.to_string(),
                    sanitized: default.to_string(),
                    reason: "Must be a fraction in (0, 1].".to_string(),
                });
                *value = default;
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = DriverConfig::from_json(
            r#"{"device": "dev8123", "crash_recovery": {"policy": "reconnect", "wait_s": 30.0}}"#,
        )
        .unwrap();
        assert_eq!(config.device, "dev8123");
        assert_eq!(config.crash_recovery, CrashRecovery::Reconnect { wait_s: 30.0 });
        assert_eq!(config.compile_timeout(), Duration::from_secs(10));
        assert_eq!(config.cache_overflow, CacheOverflowPolicy::Halt);
    }

    #[test]
    fn test_invalid_json_is_configuration_error() {
        let err = DriverConfig::from_json(r#"{"cache_overflow": "ignore"}"#).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_upload_poll_interval() {
        let config = DriverConfig::default();
        assert_eq!(config.upload_poll_interval(0.0), Duration::from_millis(600));
        assert_eq!(config.upload_poll_interval(0.75), Duration::from_millis(300));
        assert_eq!(config.upload_poll_interval(0.985), Duration::from_millis(25));
    }

    #[test]
    fn test_sanitize() {
        let mut config = DriverConfig {
            compile_poll_interval_ms: 0,
            vector_write_attempts: 0,
            channels: 20,
            cache_overflow_threshold: 1.5,
            ..Default::default()
        };
        let changes = config.sanitize();
        let fields: Vec<_> = changes.iter().map(|c| c.field).collect();
        assert_eq!(
            fields,
            vec![
                "compile_poll_interval_ms",
                "vector_write_attempts",
                "channels",
                "cache_overflow_threshold"
            ]
        );
        assert_eq!(config.compile_poll_interval_ms, 50);
        assert_eq!(config.vector_write_attempts, 1);
        assert_eq!(config.channels, 16);
        assert_eq!(config.cache_overflow_threshold, 0.9999);
        assert!(DriverConfig::default().sanitize().is_empty());
    }
}
