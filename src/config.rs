use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::{Error, InternalResult, ast::DEFAULT_FILE};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub debugger: DebuggerConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub serializer: SerializerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    /// Entries kept per execution log before the oldest is evicted.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    #[serde(default = "default_sweep_interval", with = "duration_ms")]
    pub sweep_interval: Duration,

    /// How long a finished execution stays retrievable.
    #[serde(default = "default_retention", with = "duration_ms")]
    pub retention: Duration,

    #[serde(default = "default_file")]
    pub default_file: String,

    /// Nested user-function calls allowed before a run fails with
    /// `CallDepthExceeded`. Each level costs several async frames on the
    /// worker's stack.
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebuggerConfig {
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,

    #[serde(default = "default_max_concurrent_plan_runs")]
    pub max_concurrent_plan_runs: usize,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerializerConfig {
    /// gzip level, 0 to 9.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    #[serde(default = "default_format_version")]
    pub format_version: String,
}

fn default_log_capacity() -> usize {
    1000
}
fn default_subscriber_capacity() -> usize {
    100
}
fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_retention() -> Duration {
    Duration::from_secs(300)
}
fn default_file() -> String {
    DEFAULT_FILE.to_string()
}
pub(crate) fn default_max_call_depth() -> usize {
    32
}
fn default_event_capacity() -> usize {
    100
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}
fn default_max_concurrent_plan_runs() -> usize {
    1
}
fn default_compression_level() -> u32 {
    6
}
fn default_format_version() -> String {
    "1.0".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
            subscriber_capacity: default_subscriber_capacity(),
            sweep_interval: default_sweep_interval(),
            retention: default_retention(),
            default_file: default_file(),
            max_call_depth: default_max_call_depth(),
        }
    }
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_concurrent_plan_runs: default_max_concurrent_plan_runs(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl AgentConfig {
    /// Non-positive concurrency becomes 1 and a zero poll interval falls back
    /// to the default.
    pub fn normalized(mut self) -> Self {
        if self.max_concurrent_plan_runs == 0 {
            self.max_concurrent_plan_runs = 1;
        }
        if self.poll_interval.is_zero() {
            self.poll_interval = default_poll_interval();
        }
        self
    }
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
            format_version: default_format_version(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> InternalResult<Self> {
        from_file(path)
    }
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Internal(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_runtime_config_serde() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        tracing::debug!("{}", json);
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: RuntimeConfig =
            from_str(r#"{"execution": {"log_capacity": 10}, "agent": {"poll_interval": 250}}"#)
                .unwrap();
        assert_eq!(config.execution.log_capacity, 10);
        assert_eq!(config.execution.subscriber_capacity, 100);
        assert_eq!(config.execution.retention, Duration::from_secs(300));
        assert_eq!(config.execution.max_call_depth, 32);
        assert_eq!(config.agent.poll_interval, Duration::from_millis(250));
        assert_eq!(config.serializer.format_version, "1.0");
    }

    #[test]
    fn test_agent_config_normalized() {
        let config = AgentConfig {
            poll_interval: Duration::ZERO,
            max_concurrent_plan_runs: 0,
            event_capacity: 5,
        }
        .normalized();
        assert_eq!(config.max_concurrent_plan_runs, 1);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"debugger": {{"event_capacity": 8}}}}"#).unwrap();
        let config = RuntimeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.debugger.event_capacity, 8);
        assert!(RuntimeConfig::from_file("/nonexistent/chariot.json").is_err());
    }
}
