use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the REST store, without the `/rest/v1` suffix.
    pub store_url: String,
    pub store_api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default = "default_interval_secs")]
    pub motion_interval_secs: f64,
    #[serde(default = "default_interval_secs")]
    pub heart_rate_interval_secs: f64,
}

fn default_interval_secs() -> f64 {
    5.0
}

fn interval(name: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidInterval { name });
    }

    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidInterval { name })
}

impl Config {
    /// The motion and heart rate intervals.
    pub fn sampling_intervals(&self) -> Result<(Duration, Duration), ConfigError> {
        Ok((
            interval("motionIntervalSecs", self.motion_interval_secs)?,
            interval("heartRateIntervalSecs", self.heart_rate_interval_secs)?,
        ))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store_url: String::from("http://localhost:54321"),
            store_api_key: String::new(),
            metrics_url: None,
            user_id: None,
            motion_interval_secs: default_interval_secs(),
            heart_rate_interval_secs: default_interval_secs(),
        }
    }
}
