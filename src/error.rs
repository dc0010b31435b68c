use thiserror::Error;

use crate::protocol::Register;

/// Errors reported by a [`Link`](crate::link::Link) implementation
#[derive(Error, Debug)]
pub enum LinkError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Device address could not be parsed
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    /// Device not found during scanning
    #[error("Device {0} not found")]
    DeviceNotFound(String),

    /// The device does not expose the characteristic backing a register
    #[error("Characteristic for {0} register not found")]
    CharacteristicNotFound(Register),

    /// A register operation was attempted without an open connection
    #[error("Link is not connected")]
    NotConnected,

    /// Link operation timeout
    #[error("Link operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Other transport errors
    #[error("Link error: {0}")]
    Other(String),
}

/// Errors that can occur while driving a Comet Blue thermostat
#[derive(Error, Debug)]
pub enum CometBlueError {
    /// Transport-level connect failed on every attempt
    #[error("Failed to connect after {attempts} attempt(s): {source}")]
    Connect {
        /// Number of connect attempts made
        attempts: u32,
        /// Failure of the last attempt
        #[source]
        source: LinkError,
    },

    /// Writing the PIN to the credential register failed
    #[error("Failed to send PIN: {0}")]
    Authentication(#[source] LinkError),

    /// Reading a data register failed, most commonly because of a wrong PIN
    #[error("Failed to read {register} register: {source}")]
    Read {
        /// Register being read
        register: Register,
        /// Underlying link failure
        #[source]
        source: LinkError,
    },

    /// A register payload had an unexpected length
    #[error("Malformed {register} register: expected {expected} bytes, got {actual}")]
    MalformedRegister {
        /// Register the payload was read from
        register: Register,
        /// Expected payload length
        expected: usize,
        /// Actual payload length
        actual: usize,
    },

    /// Writing a register failed after a successful read
    #[error("Failed to write {register} register: {source}")]
    Write {
        /// Register being written
        register: Register,
        /// Underlying link failure
        #[source]
        source: LinkError,
    },

    /// Invalid setter parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Result type for Comet Blue operations
pub type Result<T> = std::result::Result<T, CometBlueError>;

impl CometBlueError {
    /// Check if this error indicates the device could not be reached
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Authentication(_))
    }

    /// Check if this error indicates the device rejected the session
    #[must_use]
    pub const fn is_credential_error(&self) -> bool {
        matches!(self, Self::Read { .. })
    }

    /// Check if the next refresh may succeed without caller intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Authentication(_) | Self::Write { .. }
        )
    }
}
