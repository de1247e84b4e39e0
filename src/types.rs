use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use uuid::Uuid;

/// Lifecycle of a workout session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Configured, no I/O yet
    Idle,
    /// Opening the transport connection
    Connecting,
    /// Running the PING / INIT handshake
    Initializing,
    /// Sending the starting resistance level
    ConfiguringLevel,
    /// Polling telemetry once per second
    Running,
    /// Sending STOP and releasing the connection
    Stopping,
    /// Session recorded and handed to persistence
    Finalized,
    /// Aborted by a transport failure
    Failed,
}

impl SessionState {
    /// Whether the session can no longer change
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Initializing => write!(f, "Initializing"),
            Self::ConfiguringLevel => write!(f, "Configuring Level"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Finalized => write!(f, "Finalized"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOutcome {
    /// Ran for the full programmed duration
    Completed,
    /// Stopped early by the rider
    Cancelled,
    /// Aborted by a transport error
    Failed(String),
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

/// A bike seen during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Advertised name
    pub name: String,
    /// Identifier to pass to [`crate::Transport::connect`] (MAC address on Linux)
    pub address: String,
    /// Signal strength (RSSI)
    pub rssi: i16,
}

impl DeviceInfo {
    /// Create new device info
    #[must_use]
    pub const fn new(name: String, address: String, rssi: i16) -> Self {
        Self {
            name,
            address,
            rssi,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.address)
    }
}

/// Scan parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanParams {
    /// How long to listen for advertisements
    pub scan_timeout_ms: u64,
    /// Only report devices whose name contains this text (case-insensitive)
    pub name_filter: Option<String>,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 5_000,
            name_filter: None,
        }
    }
}

/// Delays and timeouts the console needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Per-write acknowledgment timeout in milliseconds
    pub write_timeout_ms: u64,
    /// Pause after SET_LEVEL and START; the firmware drops commands without it
    pub settle_delay_ms: u64,
    /// Telemetry poll cadence in milliseconds
    pub poll_interval_ms: u64,
    /// How long to wait for the telemetry frame answering a READ
    pub notification_timeout_ms: u64,
    /// Consecutive unanswered READs before the session fails
    pub max_missed_reads: u32,
}

impl TimingConfig {
    /// Settle delay as a [`Duration`]
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Poll interval as a [`Duration`]
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            write_timeout_ms: 3_000,
            settle_delay_ms: 500,
            poll_interval_ms: 1_000,
            notification_timeout_ms: 900,
            max_missed_reads: 10,
        }
    }
}

/// Retry behaviour for connects and writes
///
/// Defaults to no retries; a failed step fails the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Pause between attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_ms: 500,
        }
    }
}

/// Everything a session needs besides the program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Device to connect to (MAC address, or platform id where addresses are hidden)
    pub device_id: String,
    /// Characteristic carrying both commands and notifications
    pub characteristic: Uuid,
    /// Delays and timeouts
    #[serde(default)]
    pub timing: TimingConfig,
    /// Retry behaviour
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl SessionConfig {
    /// Config with default timing and no retries
    #[must_use]
    pub fn new(device_id: impl Into<String>, characteristic: Uuid) -> Self {
        Self {
            device_id: device_id.into(),
            characteristic,
            timing: TimingConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the timing
    #[must_use]
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Replace the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_config_defaults() {
        let config = TimingConfig::default();

        assert_eq!(config.connect_timeout_ms, 30_000);
        assert_eq!(config.write_timeout_ms, 3_000);
        assert_eq!(config.settle_delay(), Duration::from_millis(500));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.notification_timeout_ms < config.poll_interval_ms);
        assert_eq!(config.max_missed_reads, 10);
    }

    #[test]
    fn test_retry_policy_default_is_no_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 0);
    }

    #[test]
    fn test_session_state_terminal() {
        assert!(SessionState::Finalized.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Running.is_terminal());
        assert_eq!(SessionState::ConfiguringLevel.to_string(), "Configuring Level");
    }

    #[test]
    fn test_device_info_display() {
        let info = DeviceInfo::new("Bike".to_string(), "AA:BB:CC:DD:EE:FF".to_string(), -60);
        assert_eq!(info.to_string(), "Bike: AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::new("AA:BB:CC:DD:EE:FF", Uuid::nil()).with_retry(RetryPolicy {
            max_retries: 3,
            retry_delay_ms: 100,
        });

        assert_eq!(config.device_id, "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.timing, TimingConfig::default());
    }

    #[test]
    fn test_scan_params_default() {
        let params = ScanParams::default();
        assert_eq!(params.scan_timeout_ms, 5_000);
        assert!(params.name_filter.is_none());
    }
}
