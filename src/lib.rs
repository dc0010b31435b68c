#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # cometblue
//!
//! A Rust library for driving Eurotronic Comet Blue radiator thermostats via
//! Bluetooth Low Energy. The same hardware is sold as Sygonix HT100 BT and
//! Xavax Hama Bluetooth thermostats.
//!
//! The device exposes a handful of fixed-layout GATT registers. Every
//! exchange is a short session: connect, unlock the session by writing a
//! numeric PIN, read or write registers, disconnect. The thermostat drops
//! idle connections quickly and drains its battery while connected, so no
//! connection is ever kept open between sessions.
//!
//! ## Registers
//!
//! - **Credential** (handle `0x47`): 32-bit little-endian PIN, write only
//! - **Temperature** (handle `0x3F`): seven signed bytes in half degrees
//!   Celsius; `-128` marks a field the device should leave untouched
//! - **Status** (handle `0x3D`): 24-bit little-endian flag word
//!
//! ## Architecture
//!
//! - [`protocol`]: pure encode/decode functions for the registers
//! - [`link`]: the [`Link`] contract a transport implements
//! - [`ble`]: a [`Link`] over `btleplug`
//! - [`device`]: [`CometBlueDevice`], the per-device session client that
//!   mirrors device state and writes back staged changes
//!
//! ## Quick Start
//!
//! ```no_run
//! use cometblue::{BleLinkParams, BleLinkProvider, CometBlueDevice, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = BleLinkProvider::new(BleLinkParams::default()).await?;
//!     let mut thermostat =
//!         CometBlueDevice::new(SessionConfig::new("11:22:33:44:55:66"), provider);
//!
//!     // Stage a new target temperature; it is written on the next refresh
//!     thermostat.set_manual_temperature(21.5)?;
//!
//!     if thermostat.should_refresh() {
//!         thermostat.refresh().await?;
//!     }
//!
//!     println!("Room: {:?} °C", thermostat.current_temperature());
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy link
pub mod ble;
/// Per-device session client
pub mod device;
/// Error types and handling
pub mod error;
/// Link contract between the session client and a transport
pub mod link;
/// Register layouts and codecs
pub mod protocol;
/// Configuration and session state
pub mod types;

pub use ble::{BleLink, BleLinkProvider};
pub use device::CometBlueDevice;
pub use error::{CometBlueError, LinkError, Result};
pub use link::{Link, LinkProvider};
pub use protocol::{Register, StatusFlag, StatusWord, TemperatureBlock};
pub use types::{BleLinkParams, PendingMutation, SessionConfig, SessionState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// ATT handle of the PIN register
pub const COMETBLUE_PIN_HANDLE: u16 = 0x47;

/// ATT handle of the temperature register
pub const COMETBLUE_TEMPERATURE_HANDLE: u16 = 0x3F;

/// ATT handle of the status register
pub const COMETBLUE_STATUS_HANDLE: u16 = 0x3D;

/// Primary service UUID
pub const COMETBLUE_SERVICE_UUID: &str = "47e9ee00-47e9-11e4-8939-164230d1df67";

/// PIN characteristic UUID
pub const COMETBLUE_PIN_CHAR_UUID: &str = "47e9ee30-47e9-11e4-8939-164230d1df67";

/// Temperature characteristic UUID
pub const COMETBLUE_TEMPERATURE_CHAR_UUID: &str = "47e9ee2b-47e9-11e4-8939-164230d1df67";

/// Status characteristic UUID
pub const COMETBLUE_STATUS_CHAR_UUID: &str = "47e9ee2a-47e9-11e4-8939-164230d1df67";
