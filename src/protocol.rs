use crate::{
    error::{CometBlueError, Result},
    COMETBLUE_PIN_CHAR_UUID, COMETBLUE_PIN_HANDLE, COMETBLUE_STATUS_CHAR_UUID,
    COMETBLUE_STATUS_HANDLE, COMETBLUE_TEMPERATURE_CHAR_UUID, COMETBLUE_TEMPERATURE_HANDLE,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use tracing::debug;

/// Temperature register size in bytes
pub const TEMPERATURE_BLOCK_SIZE: usize = 7;

/// Status register size in bytes
pub const STATUS_WORD_SIZE: usize = 3;

/// Wire value telling the device to leave a temperature field untouched
///
/// The same value read back from the device never denotes a real temperature.
pub const TEMPERATURE_UNCHANGED: i8 = i8::MIN;

/// Lowest target temperature accepted by the device, in degrees Celsius
pub const MIN_TARGET_CELSIUS: f32 = 8.0;

/// Highest target temperature accepted by the device, in degrees Celsius
pub const MAX_TARGET_CELSIUS: f32 = 28.0;

/// Registers exposed by the thermostat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    /// Write-only PIN register that unlocks the session
    Credential,
    /// Seven signed half-degree fields
    Temperature,
    /// Three-byte status bitmask
    Status,
}

impl Register {
    /// ATT handle of the register
    #[must_use]
    pub const fn handle(self) -> u16 {
        match self {
            Self::Credential => COMETBLUE_PIN_HANDLE,
            Self::Temperature => COMETBLUE_TEMPERATURE_HANDLE,
            Self::Status => COMETBLUE_STATUS_HANDLE,
        }
    }

    /// UUID of the characteristic backing the register
    #[must_use]
    pub const fn characteristic_uuid(self) -> &'static str {
        match self {
            Self::Credential => COMETBLUE_PIN_CHAR_UUID,
            Self::Temperature => COMETBLUE_TEMPERATURE_CHAR_UUID,
            Self::Status => COMETBLUE_STATUS_CHAR_UUID,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credential => write!(f, "credential"),
            Self::Temperature => write!(f, "temperature"),
            Self::Status => write!(f, "status"),
        }
    }
}

/// Contents of the temperature register
///
/// Every field is a signed byte. Temperature-bearing fields (`current`,
/// `manual_target`, `target_low`, `target_high`, `offset`) are in half degrees
/// Celsius. Any field may hold [`TEMPERATURE_UNCHANGED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemperatureBlock {
    /// Measured room temperature
    pub current: i8,
    /// Target temperature in manual mode
    pub manual_target: i8,
    /// Lower scheduled target ("eco")
    pub target_low: i8,
    /// Upper scheduled target ("comfort")
    pub target_high: i8,
    /// Sensor calibration offset
    pub offset: i8,
    /// Open-window detection sensitivity
    pub window_open_detect: i8,
    /// Open-window heating pause in minutes
    pub window_open_minutes: i8,
}

impl TemperatureBlock {
    /// A block that changes nothing when written
    pub const UNCHANGED: Self = Self {
        current: TEMPERATURE_UNCHANGED,
        manual_target: TEMPERATURE_UNCHANGED,
        target_low: TEMPERATURE_UNCHANGED,
        target_high: TEMPERATURE_UNCHANGED,
        offset: TEMPERATURE_UNCHANGED,
        window_open_detect: TEMPERATURE_UNCHANGED,
        window_open_minutes: TEMPERATURE_UNCHANGED,
    };

    /// Single-field patch that only changes the manual target temperature
    #[must_use]
    pub const fn manual_patch(manual_target: i8) -> Self {
        Self {
            manual_target,
            ..Self::UNCHANGED
        }
    }
}

/// Convert a half-degree wire value to degrees Celsius
///
/// Returns `None` for [`TEMPERATURE_UNCHANGED`].
#[must_use]
pub fn half_degrees_to_celsius(raw: i8) -> Option<f32> {
    (raw != TEMPERATURE_UNCHANGED).then(|| f32::from(raw) / 2.0)
}

/// Convert a target temperature in degrees Celsius to its half-degree wire value
///
/// Fractions below half a degree are truncated toward zero.
///
/// # Errors
///
/// Returns [`CometBlueError::InvalidParameters`] if the temperature is not finite or
/// lies outside [`MIN_TARGET_CELSIUS`]..=[`MAX_TARGET_CELSIUS`].
#[allow(clippy::cast_possible_truncation)]
pub fn celsius_to_half_degrees(celsius: f32) -> Result<i8> {
    if !celsius.is_finite() || !(MIN_TARGET_CELSIUS..=MAX_TARGET_CELSIUS).contains(&celsius) {
        return Err(CometBlueError::InvalidParameters(format!(
            "Temperature {celsius:.1}°C is out of range ({MIN_TARGET_CELSIUS:.1} - {MAX_TARGET_CELSIUS:.1})"
        )));
    }

    Ok((celsius * 2.0) as i8)
}

/// Decode the temperature register
///
/// # Errors
///
/// Returns [`CometBlueError::MalformedRegister`] unless `data` is exactly
/// [`TEMPERATURE_BLOCK_SIZE`] bytes long.
pub fn decode_temperature(data: &[u8]) -> Result<TemperatureBlock> {
    check_length(Register::Temperature, data, TEMPERATURE_BLOCK_SIZE)?;

    let mut buf = data;
    Ok(TemperatureBlock {
        current: buf.get_i8(),
        manual_target: buf.get_i8(),
        target_low: buf.get_i8(),
        target_high: buf.get_i8(),
        offset: buf.get_i8(),
        window_open_detect: buf.get_i8(),
        window_open_minutes: buf.get_i8(),
    })
}

/// Encode the temperature register
#[must_use]
pub fn encode_temperature(block: &TemperatureBlock) -> Bytes {
    let mut buf = BytesMut::with_capacity(TEMPERATURE_BLOCK_SIZE);

    buf.put_i8(block.current);
    buf.put_i8(block.manual_target);
    buf.put_i8(block.target_low);
    buf.put_i8(block.target_high);
    buf.put_i8(block.offset);
    buf.put_i8(block.window_open_detect);
    buf.put_i8(block.window_open_minutes);

    buf.freeze()
}

/// Encode the PIN written to the credential register
#[must_use]
pub fn encode_pin(pin: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32_le(pin);
    buf.freeze()
}

/// Named flags of the status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFlag {
    /// Buttons on the device are locked
    Childlock,
    /// Manual mode, the schedule is ignored
    ManualMode,
    /// Valve adaptation running
    Adapting,
    /// Device not ready
    NotReady,
    /// Installation in progress (adapting, not ready and motor moving at once)
    Installing,
    /// Valve motor moving
    MotorMoving,
    /// Frost protection active
    AntifrostActivated,
    /// Target temperature reached
    Satisfied,
    /// Battery low
    LowBattery,
}

impl StatusFlag {
    /// All known flags
    pub const ALL: [Self; 9] = [
        Self::Childlock,
        Self::ManualMode,
        Self::Adapting,
        Self::NotReady,
        Self::Installing,
        Self::MotorMoving,
        Self::AntifrostActivated,
        Self::Satisfied,
        Self::LowBattery,
    ];

    /// Bitmask of the flag; a flag is set when every bit of its mask is set
    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Self::Childlock => 0x80,
            Self::ManualMode => 0x1,
            Self::Adapting => 0x400,
            Self::NotReady => 0x200,
            Self::Installing => 0x400 | 0x200 | 0x100,
            Self::MotorMoving => 0x100,
            Self::AntifrostActivated => 0x10,
            Self::Satisfied => 0x8_0000,
            Self::LowBattery => 0x800,
        }
    }

    /// Canonical snake-case name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Childlock => "childlock",
            Self::ManualMode => "manual_mode",
            Self::Adapting => "adapting",
            Self::NotReady => "not_ready",
            Self::Installing => "installing",
            Self::MotorMoving => "motor_moving",
            Self::AntifrostActivated => "antifrost_activated",
            Self::Satisfied => "satisfied",
            Self::LowBattery => "low_battery",
        }
    }

    /// Look a flag up by its canonical name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|flag| flag.name() == name)
    }
}

impl FromStr for StatusFlag {
    type Err = CometBlueError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
            .ok_or_else(|| CometBlueError::InvalidParameters(format!("Unknown status flag: {s}")))
    }
}

impl fmt::Display for StatusFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Union of the masks of every known flag
pub const KNOWN_STATUS_BITS: u32 = {
    let mut bits = 0;
    let mut i = 0;
    while i < StatusFlag::ALL.len() {
        bits |= StatusFlag::ALL[i].mask();
        i += 1;
    }
    bits
};

/// Decoded status register, widened to a double word
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusWord {
    raw: u32,
}

impl StatusWord {
    /// Wrap a raw status word
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self { raw }
    }

    /// The raw status word
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.raw
    }

    /// Check whether every bit of the flag's mask is set
    #[must_use]
    pub const fn is_set(self, flag: StatusFlag) -> bool {
        self.raw & flag.mask() == flag.mask()
    }

    /// Bits not covered by any known flag
    #[must_use]
    pub const fn unused_bits(self) -> u32 {
        self.raw & !KNOWN_STATUS_BITS
    }

    /// State of every known flag
    #[must_use]
    pub fn flags(self) -> BTreeMap<StatusFlag, bool> {
        StatusFlag::ALL
            .into_iter()
            .map(|flag| (flag, self.is_set(flag)))
            .collect()
    }

    /// Apply flag overrides on top of this word
    ///
    /// Overrides are applied in flag order: `true` sets every bit of the mask,
    /// `false` clears every bit of it. Bits outside the overridden masks are kept.
    #[must_use]
    pub fn with_overrides(self, overrides: &BTreeMap<StatusFlag, bool>) -> Self {
        let raw = overrides.iter().fold(self.raw, |raw, (flag, &set)| {
            if set {
                raw | flag.mask()
            } else {
                raw & !flag.mask()
            }
        });
        Self { raw }
    }
}

/// Decode the status register
///
/// The three wire bytes are little-endian and are zero-extended to a double
/// word before the masks are evaluated.
///
/// # Errors
///
/// Returns [`CometBlueError::MalformedRegister`] unless `data` is exactly
/// [`STATUS_WORD_SIZE`] bytes long.
pub fn decode_status(data: &[u8]) -> Result<StatusWord> {
    check_length(Register::Status, data, STATUS_WORD_SIZE)?;

    let mut widened = [0u8; 4];
    widened[..STATUS_WORD_SIZE].copy_from_slice(data);

    Ok(StatusWord::from_raw((&widened[..]).get_u32_le()))
}

/// Encode a status word to the register's wire format
///
/// Only the low three bytes are transmitted; anything in the high byte is lost.
#[must_use]
pub fn encode_status_word(word: StatusWord) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32_le(word.raw());
    buf.truncate(STATUS_WORD_SIZE);
    buf.freeze()
}

/// Encode a flag mapping to the register's wire format
///
/// The masks of all flags set to `true` are OR-ed together.
#[must_use]
pub fn encode_status(flags: impl IntoIterator<Item = (StatusFlag, bool)>) -> Bytes {
    let raw = flags
        .into_iter()
        .filter(|&(_, set)| set)
        .fold(0, |raw, (flag, _)| raw | flag.mask());

    encode_status_word(StatusWord::from_raw(raw))
}

/// Encode a flag mapping keyed by flag name
///
/// Unknown names are skipped.
#[must_use]
pub fn encode_status_named<'a>(flags: impl IntoIterator<Item = (&'a str, bool)>) -> Bytes {
    encode_status(flags.into_iter().filter_map(|(name, set)| {
        let flag = StatusFlag::from_name(name);
        if flag.is_none() {
            debug!("Ignoring unknown status flag {name}");
        }
        flag.map(|flag| (flag, set))
    }))
}

fn check_length(register: Register, data: &[u8], expected: usize) -> Result<()> {
    if data.len() == expected {
        Ok(())
    } else {
        Err(CometBlueError::MalformedRegister {
            register,
            expected,
            actual: data.len(),
        })
    }
}
