use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

use crate::protocol::{StatusFlag, StatusWord, TemperatureBlock};

/// Per-device session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Device MAC address, `XX:XX:XX:XX:XX:XX`
    pub address: String,
    /// PIN written to the credential register on every connect
    pub pin: u32,
    /// Minimum time between unforced refreshes, in seconds
    pub min_refresh_interval_secs: u64,
    /// Wait for the device's acknowledgment on data register writes
    pub confirm_writes: bool,
}

impl SessionConfig {
    /// Create a configuration for `address` with default settings
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Set the PIN
    #[must_use]
    pub fn with_pin(mut self, pin: u32) -> Self {
        self.pin = pin;
        self
    }

    /// Minimum refresh interval as a [`Duration`]
    #[must_use]
    pub const fn min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.min_refresh_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            pin: 0,
            min_refresh_interval_secs: 300,
            confirm_writes: false,
        }
    }
}

/// Parameters for the BLE link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleLinkParams {
    /// How long to scan for the device before giving up, in milliseconds
    pub scan_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for BleLinkParams {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 10_000,
            connect_timeout_ms: 30_000,
        }
    }
}

/// Local changes waiting for the next refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingMutation {
    /// New manual target temperature, in half degrees
    pub manual_target: Option<i8>,
    /// Status flag overrides
    pub flags: BTreeMap<StatusFlag, bool>,
}

impl PendingMutation {
    /// Check whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manual_target.is_none() && self.flags.is_empty()
    }

    /// Drop all pending changes
    pub fn clear(&mut self) {
        self.manual_target = None;
        self.flags.clear();
    }
}

/// Last known device state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Temperature register as last read or written
    pub temperatures: Option<TemperatureBlock>,
    /// Status register as last read or written
    pub status: Option<StatusWord>,
    /// Whether the last refresh succeeded
    pub available: bool,
}
