use thiserror::Error;

/// Errors that can occur while driving an exercise bike session
#[derive(Error, Debug)]
pub enum BikeError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Device not found during scanning
    #[error("Exercise bike not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Device disconnected unexpectedly
    #[error("Device disconnected")]
    Disconnected,

    /// A write or connect did not complete in time
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Writing a command frame failed
    #[error("Failed to write command: {0}")]
    WriteFailed(String),

    /// Enabling or disabling notifications failed
    #[error("Failed to (un)subscribe to notifications: {0}")]
    SubscribeFailed(String),

    /// Session duration too short for the chosen program
    #[error("Duration of {minutes} minute(s) is invalid for program {program} (minimum {minimum})")]
    InvalidDuration {
        /// Program the duration was requested for
        program: String,
        /// Requested duration in minutes
        minutes: u32,
        /// Smallest duration the program supports
        minimum: u32,
    },

    /// Unknown program selector
    #[error("Unknown workout program: {0}")]
    InvalidProgram(String),

    /// Resistance level outside the encodable range
    #[error("Resistance level {level} is out of range (1 - {maximum})")]
    InvalidLevel {
        /// Offending level
        level: u32,
        /// Highest supported level
        maximum: u8,
    },

    /// Operation not allowed in the current session state
    #[error("Invalid session state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Session was already finalized and handed to persistence
    #[error("Session has already been finalized")]
    AlreadyFinalized,

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type for exercise bike operations
pub type Result<T> = std::result::Result<T, BikeError>;

impl BikeError {
    /// Check if this error came from the transport (connect, write, subscribe)
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::DeviceNotFound
                | Self::ConnectionFailed(_)
                | Self::Disconnected
                | Self::Timeout { .. }
                | Self::WriteFailed(_)
                | Self::SubscribeFailed(_)
        )
    }

    /// Check if this error is a pre-flight configuration failure
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidDuration { .. } | Self::InvalidProgram(_) | Self::InvalidLevel { .. }
        )
    }

    /// Check if a retry policy may repeat the failed operation
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::WriteFailed(_)
                | Self::ConnectionFailed(_)
                | Self::DeviceNotFound
                | Self::Ble(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let connection_error = BikeError::ConnectionFailed("test".to_string());
        assert!(connection_error.is_transport_error());
        assert!(connection_error.is_recoverable());
        assert!(!connection_error.is_configuration_error());

        let timeout_error = BikeError::Timeout { timeout_ms: 3000 };
        assert!(timeout_error.is_transport_error());
        assert!(timeout_error.is_recoverable());

        let duration_error = BikeError::InvalidDuration {
            program: "warmup-cooldown".to_string(),
            minutes: 2,
            minimum: 4,
        };
        assert!(duration_error.is_configuration_error());
        assert!(!duration_error.is_transport_error());
        assert!(!duration_error.is_recoverable());

        assert!(!BikeError::Disconnected.is_recoverable());
        assert!(!BikeError::AlreadyFinalized.is_transport_error());
    }

    #[test]
    fn test_error_display() {
        let error = BikeError::InvalidLevel {
            level: 300,
            maximum: 254,
        };
        let error_string = format!("{error}");
        assert!(error_string.contains("Resistance level 300"));
        assert!(error_string.contains("254"));

        let error = BikeError::InvalidProgram("program 9".to_string());
        assert_eq!(format!("{error}"), "Unknown workout program: program 9");
    }
}
