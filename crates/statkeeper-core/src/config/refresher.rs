//! Statistics refresher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::result::AppResult;
use crate::types::time_window::TimeWindow;

/// Control-loop, window, retry, and scoring settings for the refresher.
///
/// The refresher clones and validates this struct at the start of every
/// cycle, so a reload never takes effect mid-cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefresherConfig {
    /// Whether automatic refresh is enabled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between control-loop ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,
    /// Maximum number of refresh executions running at once.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Maintenance window start, `"HH:MM"` or `"HH:MM +ZZZZ"`.
    #[serde(default = "default_window_start")]
    pub window_start: String,
    /// Maintenance window end, `"HH:MM"` or `"HH:MM +ZZZZ"`.
    #[serde(default = "default_window_end")]
    pub window_end: String,
    /// Minimum seconds between two refreshes of the same object.
    #[serde(default = "default_min_reanalyze_interval")]
    pub min_reanalyze_interval_seconds: u64,
    /// Failed attempts allowed before an object is quarantined.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Quarantine cool-down in seconds.
    #[serde(default = "default_quarantine")]
    pub quarantine_seconds: u64,
    /// Minimum change ratio for an analyzed object to count as stale (0 disables).
    #[serde(default = "default_auto_analyze_ratio")]
    pub auto_analyze_ratio: f64,
    /// Seconds to wait for in-flight refreshes on shutdown before aborting them.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
    /// Priority score coefficients.
    #[serde(default)]
    pub weights: WeightConfig,
}

/// Coefficients applied to each staleness signal by the priority function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    /// Weight of the modified/total row ratio.
    #[serde(default = "default_change_ratio_weight")]
    pub change_ratio: f64,
    /// Weight of the logarithmic table size term.
    #[serde(default = "default_size_weight")]
    pub size: f64,
    /// Weight of the time-since-last-refresh term.
    #[serde(default = "default_staleness_weight")]
    pub staleness: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            change_ratio: default_change_ratio_weight(),
            size: default_size_weight(),
            staleness: default_staleness_weight(),
        }
    }
}

impl WeightConfig {
    /// Reject negative or non-finite coefficients.
    pub fn validate(&self) -> AppResult<()> {
        for (name, value) in [
            ("change_ratio", self.change_ratio),
            ("size", self.size),
            ("staleness", self.staleness),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::configuration(format!(
                    "refresher.weights.{name} must be a finite non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: default_tick_interval(),
            concurrency_limit: default_concurrency_limit(),
            window_start: default_window_start(),
            window_end: default_window_end(),
            min_reanalyze_interval_seconds: default_min_reanalyze_interval(),
            max_retries: default_max_retries(),
            quarantine_seconds: default_quarantine(),
            auto_analyze_ratio: default_auto_analyze_ratio(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            weights: WeightConfig::default(),
        }
    }
}

impl RefresherConfig {
    /// Validate every field, including the window bounds.
    pub fn validate(&self) -> AppResult<()> {
        if self.tick_interval_seconds == 0 {
            return Err(AppError::configuration(
                "refresher.tick_interval_seconds must be greater than zero",
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(AppError::configuration(
                "refresher.concurrency_limit must be greater than zero",
            ));
        }
        if self.max_retries == 0 {
            return Err(AppError::configuration(
                "refresher.max_retries must be greater than zero",
            ));
        }
        if !self.auto_analyze_ratio.is_finite() || self.auto_analyze_ratio < 0.0 {
            return Err(AppError::configuration(format!(
                "refresher.auto_analyze_ratio must be a finite non-negative number, got {}",
                self.auto_analyze_ratio
            )));
        }
        self.weights.validate()?;
        self.window()?;
        Ok(())
    }

    /// Build the maintenance window from the configured bounds.
    pub fn window(&self) -> AppResult<TimeWindow> {
        TimeWindow::parse(&self.window_start, &self.window_end)
    }

    /// Tick interval as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    /// Minimum re-analyze interval as a [`chrono::Duration`].
    pub fn min_reanalyze_interval(&self) -> chrono::Duration {
        seconds(self.min_reanalyze_interval_seconds)
    }

    /// Quarantine cool-down as a [`chrono::Duration`].
    pub fn quarantine_duration(&self) -> chrono::Duration {
        seconds(self.quarantine_seconds)
    }

    /// Shutdown drain timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

fn seconds(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> u64 {
    30
}

fn default_concurrency_limit() -> usize {
    2
}

fn default_window_start() -> String {
    "00:00 +0000".to_string()
}

fn default_window_end() -> String {
    "23:59 +0000".to_string()
}

fn default_min_reanalyze_interval() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_quarantine() -> u64 {
    1800
}

fn default_auto_analyze_ratio() -> f64 {
    0.5
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_change_ratio_weight() -> f64 {
    0.6
}

fn default_size_weight() -> f64 {
    0.1
}

fn default_staleness_weight() -> f64 {
    0.3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RefresherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency_limit, 2);
        assert_eq!(config.weights.change_ratio, 0.6);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = RefresherConfig {
            concurrency_limit: 0,
            ..RefresherConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let config = RefresherConfig {
            weights: WeightConfig {
                staleness: -1.0,
                ..WeightConfig::default()
            },
            ..RefresherConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.message.contains("staleness"));
    }

    #[test]
    fn test_bad_window_rejected() {
        let config = RefresherConfig {
            window_start: "25:00".to_string(),
            ..RefresherConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_weights_deserialize_with_defaults() {
        let config: RefresherConfig =
            serde_json::from_str(r#"{"concurrency_limit": 4, "weights": {"size": 0.5}}"#).unwrap();
        assert_eq!(config.concurrency_limit, 4);
        assert_eq!(config.weights.size, 0.5);
        assert_eq!(config.weights.staleness, 0.3);
        assert_eq!(config.max_retries, 3);
    }
}
