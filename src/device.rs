use crate::{
    error::{CometBlueError, Result},
    link::{Link, LinkProvider},
    protocol::{
        celsius_to_half_degrees, decode_status, decode_temperature, encode_pin,
        encode_status_word, encode_temperature, half_degrees_to_celsius, Register, StatusFlag,
        TemperatureBlock, TEMPERATURE_UNCHANGED,
    },
    types::{PendingMutation, SessionConfig, SessionState},
};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Connect + PIN attempts made per refresh before giving up
pub const MAX_CONNECT_ATTEMPTS: u32 = 2;

/// Session client for one Comet Blue thermostat
///
/// `CometBlueDevice` keeps an in-memory mirror of the device's registers and a
/// set of pending local changes. Nothing touches the radio except
/// [`refresh`](Self::refresh), which runs one complete session:
///
/// 1. Create a fresh link, connect and send the PIN (one retry on failure)
/// 2. Read the temperature and status registers and decode them
/// 3. Write back the pending target temperature and status flag overrides
/// 4. Disconnect, on every path
///
/// The mirror survives failed refreshes so the last known values stay
/// readable; [`is_available`](Self::is_available) reports whether the most
/// recent refresh succeeded.
///
/// A refresh takes `&mut self`, so only one session per device can be in
/// flight and the link never escapes it.
///
/// # Examples
///
/// ```no_run
/// use cometblue::{BleLinkParams, BleLinkProvider, CometBlueDevice, SessionConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let provider = BleLinkProvider::new(BleLinkParams::default()).await?;
///     let config = SessionConfig::new("11:22:33:44:55:66").with_pin(0);
///     let mut thermostat = CometBlueDevice::new(config, provider);
///
///     thermostat.set_manual_temperature(21.5)?;
///     thermostat.refresh().await?;
///
///     println!("Room temperature: {:?}", thermostat.current_temperature());
///     Ok(())
/// }
/// ```
pub struct CometBlueDevice<P: LinkProvider> {
    provider: P,
    config: SessionConfig,
    state: SessionState,
    pending: PendingMutation,
    last_refresh: Option<Instant>,
}

impl<P: LinkProvider> CometBlueDevice<P> {
    /// Create a session client; no connection is made until the first refresh
    pub fn new(config: SessionConfig, provider: P) -> Self {
        Self {
            provider,
            config,
            state: SessionState::default(),
            pending: PendingMutation::default(),
            last_refresh: None,
        }
    }

    /// Get the session configuration
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Device address
    #[must_use]
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Get the last known device state
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Get the changes waiting for the next refresh
    #[must_use]
    pub const fn pending(&self) -> &PendingMutation {
        &self.pending
    }

    /// Check whether the poller should call [`refresh`](Self::refresh) now
    ///
    /// True while changes are pending, before the first refresh, and once the
    /// configured minimum interval has passed since the last attempt.
    #[must_use]
    pub fn should_refresh(&self) -> bool {
        if !self.pending.is_empty() {
            return true;
        }

        self.last_refresh
            .is_none_or(|last| last.elapsed() > self.config.min_refresh_interval())
    }

    /// Refresh if [`should_refresh`](Self::should_refresh) says so
    ///
    /// Failures are logged and reflected in [`is_available`](Self::is_available).
    /// Returns whether a refresh ran.
    pub async fn update(&mut self) -> bool {
        if !self.should_refresh() {
            debug!("Ignoring update for {}", self.config.address);
            return false;
        }

        if let Err(e) = self.refresh().await {
            debug!("Update of {} failed, retrying next poll: {e}", self.config.address);
        }
        true
    }

    /// Run one session against the device
    ///
    /// On success the pending changes are cleared and the device is marked
    /// available. On failure the device is marked unavailable and pending
    /// changes are kept for the next refresh. Registers that were read before a
    /// failed write still become the new mirror.
    ///
    /// # Errors
    ///
    /// - [`CometBlueError::Connect`] or [`CometBlueError::Authentication`] if
    ///   both connect attempts failed
    /// - [`CometBlueError::Read`] if a register read failed, usually a wrong PIN
    /// - [`CometBlueError::MalformedRegister`] if a register had the wrong size
    /// - [`CometBlueError::Write`] if writing back a pending change failed
    pub async fn refresh(&mut self) -> Result<()> {
        self.last_refresh = Some(Instant::now());
        debug!("Connecting to device {}", self.config.address);

        let mut link = self.provider.create_link();
        let result = self.run_session(&mut link).await;

        link.disconnect().await;
        debug!("Disconnected from device {}", self.config.address);

        match &result {
            Ok(()) => {
                self.pending.clear();
                self.state.available = true;
            }
            Err(e) => {
                self.state.available = false;
                if e.is_credential_error() {
                    error!(
                        "Can't read Comet Blue data ({}). Did you set the correct PIN? {e}",
                        self.config.address
                    );
                } else {
                    error!("Refresh of {} failed: {e}", self.config.address);
                }
            }
        }

        result
    }

    async fn run_session(&mut self, link: &mut P::Link) -> Result<()> {
        self.connect(link).await?;

        let data = Self::read(link, Register::Temperature).await?;
        let temperatures = decode_temperature(&data)?;
        let data = Self::read(link, Register::Status).await?;
        let status = decode_status(&data)?;

        self.state.temperatures = Some(temperatures);
        self.state.status = Some(status);

        if let Some(manual_target) = self.pending.manual_target {
            info!(
                "Updating temperature for device {} to {:.1}°C",
                self.config.address,
                f32::from(manual_target) / 2.0
            );

            let patch = TemperatureBlock::manual_patch(manual_target);
            self.write(link, Register::Temperature, &encode_temperature(&patch))
                .await?;

            self.state.temperatures = Some(TemperatureBlock {
                manual_target,
                ..temperatures
            });
        }

        if !self.pending.flags.is_empty() {
            let merged = status.with_overrides(&self.pending.flags);
            info!(
                "Updating status for device {} from {:#08X} to {:#08X}",
                self.config.address,
                status.raw(),
                merged.raw()
            );

            self.write(link, Register::Status, &encode_status_word(merged))
                .await?;

            self.state.status = Some(merged);
        }

        Ok(())
    }

    /// Connect and send the PIN, retrying the whole sequence once
    ///
    /// A link whose PIN write failed is disconnected and replaced with a fresh
    /// one from the provider before the retry.
    async fn connect(&self, link: &mut P::Link) -> Result<()> {
        let mut attempt = 1;

        loop {
            match self.connect_once(link, attempt).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
                    warn!(
                        "Unable to connect to device {} (attempt {attempt}/{MAX_CONNECT_ATTEMPTS}), retrying: {e}",
                        self.config.address
                    );

                    // The transport is up after a failed PIN write
                    if matches!(e, CometBlueError::Authentication(_)) {
                        link.disconnect().await;
                        *link = self.provider.create_link();
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn connect_once(&self, link: &mut P::Link, attempt: u32) -> Result<()> {
        link.connect(&self.config.address)
            .await
            .map_err(|source| CometBlueError::Connect {
                attempts: attempt,
                source,
            })?;

        debug!("Sending PIN to device {}", self.config.address);
        link.write_register(Register::Credential, &encode_pin(self.config.pin), true)
            .await
            .map_err(CometBlueError::Authentication)
    }

    async fn read(link: &mut P::Link, register: Register) -> Result<Vec<u8>> {
        link.read_register(register)
            .await
            .map_err(|source| CometBlueError::Read { register, source })
    }

    async fn write(&self, link: &mut P::Link, register: Register, data: &[u8]) -> Result<()> {
        link.write_register(register, data, self.config.confirm_writes)
            .await
            .map_err(|source| CometBlueError::Write { register, source })
    }

    /// Whether the last refresh succeeded
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.state.available
    }

    /// Measured room temperature in °C
    #[must_use]
    pub fn current_temperature(&self) -> Option<f32> {
        self.temperature(|t| t.current)
    }

    /// Manual mode target temperature in °C
    #[must_use]
    pub fn manual_temperature(&self) -> Option<f32> {
        self.temperature(|t| t.manual_target)
    }

    /// Lower scheduled target temperature in °C
    #[must_use]
    pub fn target_low_temperature(&self) -> Option<f32> {
        self.temperature(|t| t.target_low)
    }

    /// Upper scheduled target temperature in °C
    #[must_use]
    pub fn target_high_temperature(&self) -> Option<f32> {
        self.temperature(|t| t.target_high)
    }

    /// Sensor offset in °C
    #[must_use]
    pub fn offset_temperature(&self) -> Option<f32> {
        self.temperature(|t| t.offset)
    }

    /// Open-window detection sensitivity
    #[must_use]
    pub fn window_open_detect(&self) -> Option<i8> {
        self.raw_field(|t| t.window_open_detect)
    }

    /// Open-window heating pause in minutes
    #[must_use]
    pub fn window_open_minutes(&self) -> Option<i8> {
        self.raw_field(|t| t.window_open_minutes)
    }

    fn raw_field(&self, field: impl Fn(&TemperatureBlock) -> i8) -> Option<i8> {
        self.state
            .temperatures
            .as_ref()
            .map(field)
            .filter(|&raw| raw != TEMPERATURE_UNCHANGED)
    }

    fn temperature(&self, field: impl Fn(&TemperatureBlock) -> i8) -> Option<f32> {
        self.raw_field(field).and_then(half_degrees_to_celsius)
    }

    /// Last known state of a status flag
    #[must_use]
    pub fn status_flag(&self, flag: StatusFlag) -> Option<bool> {
        self.state.status.map(|status| status.is_set(flag))
    }

    /// Whether the device is in manual mode
    #[must_use]
    pub fn manual_mode(&self) -> Option<bool> {
        self.status_flag(StatusFlag::ManualMode)
    }

    /// Raw status word
    #[must_use]
    pub fn status_word(&self) -> Option<u32> {
        self.state.status.map(|status| status.raw())
    }

    /// Status bits not covered by any known flag
    #[must_use]
    pub fn unused_status_bits(&self) -> Option<u32> {
        self.state.status.map(|status| status.unused_bits())
    }

    /// Stage a new manual target temperature for the next refresh
    ///
    /// # Errors
    ///
    /// Returns [`CometBlueError::InvalidParameters`] if the temperature is outside
    /// 8.0 - 28.0 °C; nothing is staged in that case.
    pub fn set_manual_temperature(&mut self, celsius: f32) -> Result<()> {
        let raw = celsius_to_half_degrees(celsius)?;
        debug!("Temperature to set for {}: {celsius:.1}°C", self.config.address);

        self.pending.manual_target = Some(raw);
        Ok(())
    }

    /// Stage a status flag override for the next refresh
    pub fn set_status_flag(&mut self, flag: StatusFlag, set: bool) {
        debug!("Status flag to set for {}: {flag}={set}", self.config.address);
        self.pending.flags.insert(flag, set);
    }

    /// Stage a manual mode change for the next refresh
    pub fn set_manual_mode(&mut self, manual: bool) {
        self.set_status_flag(StatusFlag::ManualMode, manual);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::LinkError, protocol::TEMPERATURE_BLOCK_SIZE};
    use async_trait::async_trait;
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tokio_test::{assert_err, assert_ok};

    const ADDRESS: &str = "11:22:33:44:55:66";

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Connect(String),
        Read(Register),
        Write(Register, Vec<u8>, bool),
        Disconnect,
    }

    #[derive(Default)]
    struct Script {
        temperature: Vec<u8>,
        status: Vec<u8>,
        connect_failures: u32,
        pin_failures: u32,
        links_created: u32,
        fail_read: Option<Register>,
        fail_write: Option<Register>,
        calls: Vec<Call>,
    }

    /// Simulated thermostat shared by every link a test hands out
    #[derive(Clone)]
    struct MockDevice(Arc<Mutex<Script>>);

    impl MockDevice {
        fn new(temperature: &[u8], status: &[u8]) -> Self {
            Self(Arc::new(Mutex::new(Script {
                temperature: temperature.to_vec(),
                status: status.to_vec(),
                ..Script::default()
            })))
        }

        fn script(&self, f: impl FnOnce(&mut Script)) {
            f(&mut self.0.lock().unwrap());
        }

        fn take_calls(&self) -> Vec<Call> {
            std::mem::take(&mut self.0.lock().unwrap().calls)
        }

        fn client(&self) -> CometBlueDevice<impl LinkProvider<Link = MockLink>> {
            let device = self.clone();
            CometBlueDevice::new(SessionConfig::new(ADDRESS), move || {
                device.0.lock().unwrap().links_created += 1;
                MockLink(device.clone())
            })
        }
    }

    struct MockLink(MockDevice);

    #[async_trait]
    impl Link for MockLink {
        async fn connect(&mut self, address: &str) -> std::result::Result<(), LinkError> {
            let mut script = self.0 .0.lock().unwrap();
            script.calls.push(Call::Connect(address.to_string()));

            if script.connect_failures > 0 {
                script.connect_failures -= 1;
                return Err(LinkError::DeviceNotFound(address.to_string()));
            }
            Ok(())
        }

        async fn read_register(
            &mut self,
            register: Register,
        ) -> std::result::Result<Vec<u8>, LinkError> {
            let mut script = self.0 .0.lock().unwrap();
            script.calls.push(Call::Read(register));

            if script.fail_read == Some(register) {
                return Err(LinkError::Other("ATT error 0x05".to_string()));
            }
            match register {
                Register::Temperature => Ok(script.temperature.clone()),
                Register::Status => Ok(script.status.clone()),
                Register::Credential => Err(LinkError::Other("not readable".to_string())),
            }
        }

        async fn write_register(
            &mut self,
            register: Register,
            data: &[u8],
            with_response: bool,
        ) -> std::result::Result<(), LinkError> {
            let mut script = self.0 .0.lock().unwrap();
            script
                .calls
                .push(Call::Write(register, data.to_vec(), with_response));

            if register == Register::Credential && script.pin_failures > 0 {
                script.pin_failures -= 1;
                return Err(LinkError::Other("write rejected".to_string()));
            }
            if script.fail_write == Some(register) {
                return Err(LinkError::Other("write rejected".to_string()));
            }

            match register {
                Register::Temperature => {
                    for (stored, &new) in script.temperature.iter_mut().zip(data) {
                        if new as i8 != TEMPERATURE_UNCHANGED {
                            *stored = new;
                        }
                    }
                }
                Register::Status => script.status = data.to_vec(),
                Register::Credential => {}
            }
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.0 .0.lock().unwrap().calls.push(Call::Disconnect);
        }
    }

    const TEMPERATURES: [u8; TEMPERATURE_BLOCK_SIZE] = [20, 40, 16, 56, 0x80, 0, 0];
    const MANUAL_MODE: [u8; 3] = [0x01, 0x00, 0x00];

    fn session_prologue() -> Vec<Call> {
        vec![
            Call::Connect(ADDRESS.to_string()),
            Call::Write(Register::Credential, vec![0, 0, 0, 0], true),
            Call::Read(Register::Temperature),
            Call::Read(Register::Status),
        ]
    }

    #[tokio::test]
    async fn test_refresh_reads_registers() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        let mut client = device.client();

        assert!(!client.is_available());
        assert_eq!(client.current_temperature(), None);
        assert!(client.should_refresh());

        assert_ok!(client.refresh().await);

        assert!(client.is_available());
        assert_eq!(client.current_temperature(), Some(10.0));
        assert_eq!(client.manual_temperature(), Some(20.0));
        assert_eq!(client.target_low_temperature(), Some(8.0));
        assert_eq!(client.target_high_temperature(), Some(28.0));
        assert_eq!(client.offset_temperature(), None);
        assert_eq!(client.window_open_detect(), Some(0));
        assert_eq!(client.window_open_minutes(), Some(0));
        assert_eq!(client.manual_mode(), Some(true));
        assert_eq!(client.status_flag(StatusFlag::Childlock), Some(false));
        assert_eq!(client.status_word(), Some(0x00_0001));
        assert_eq!(client.unused_status_bits(), Some(0));

        let mut expected = session_prologue();
        expected.push(Call::Disconnect);
        assert_eq!(device.take_calls(), expected);
    }

    #[tokio::test]
    async fn test_pin_is_sent_little_endian() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        let provider_device = device.clone();
        let config = SessionConfig::new(ADDRESS).with_pin(123_456);
        let mut client = CometBlueDevice::new(config, move || MockLink(provider_device.clone()));

        assert_ok!(client.refresh().await);
        assert_eq!(
            device.take_calls()[1],
            Call::Write(Register::Credential, vec![0x40, 0xE2, 0x01, 0x00], true)
        );
    }

    #[tokio::test]
    async fn test_connect_fails_twice() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        let mut client = device.client();
        assert_ok!(client.refresh().await);
        let mirror = *client.state();
        device.take_calls();

        device.script(|s| s.connect_failures = 2);
        let err = assert_err!(client.refresh().await);

        assert!(matches!(err, CometBlueError::Connect { attempts: 2, .. }));
        assert!(err.is_connection_error());
        assert!(!client.is_available());
        assert_eq!(client.state().temperatures, mirror.temperatures);
        assert_eq!(client.state().status, mirror.status);
        assert_eq!(client.current_temperature(), Some(10.0));
        assert_eq!(
            device.take_calls(),
            vec![
                Call::Connect(ADDRESS.to_string()),
                Call::Connect(ADDRESS.to_string()),
                Call::Disconnect,
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_retries_once() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        device.script(|s| s.connect_failures = 1);
        let mut client = device.client();

        assert_ok!(client.refresh().await);
        assert!(client.is_available());

        let mut expected = vec![Call::Connect(ADDRESS.to_string())];
        expected.extend(session_prologue());
        expected.push(Call::Disconnect);
        assert_eq!(device.take_calls(), expected);
    }

    #[tokio::test]
    async fn test_pin_failure_tears_down_before_retry() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        device.script(|s| s.pin_failures = 1);
        let mut client = device.client();

        assert_ok!(client.refresh().await);
        assert_eq!(device.0.lock().unwrap().links_created, 2);

        let mut expected = vec![
            Call::Connect(ADDRESS.to_string()),
            Call::Write(Register::Credential, vec![0, 0, 0, 0], true),
            Call::Disconnect,
        ];
        expected.extend(session_prologue());
        expected.push(Call::Disconnect);
        assert_eq!(device.take_calls(), expected);

        device.script(|s| s.pin_failures = 2);
        let err = assert_err!(client.refresh().await);
        assert!(matches!(err, CometBlueError::Authentication(_)));
        assert!(!client.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_temperature_is_written_and_cleared() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        let mut client = device.client();
        assert_ok!(client.refresh().await);
        device.take_calls();
        assert!(!client.should_refresh());

        assert_ok!(client.set_manual_temperature(21.5));
        assert_eq!(client.pending().manual_target, Some(43));
        assert!(client.should_refresh());

        assert_ok!(client.refresh().await);

        let mut expected = session_prologue();
        expected.push(Call::Write(
            Register::Temperature,
            vec![0x80, 43, 0x80, 0x80, 0x80, 0x80, 0x80],
            false,
        ));
        expected.push(Call::Disconnect);
        assert_eq!(device.take_calls(), expected);

        assert!(client.pending().is_empty());
        assert_eq!(client.manual_temperature(), Some(21.5));
        assert_eq!(client.current_temperature(), Some(10.0));
        assert!(!client.should_refresh());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!client.should_refresh());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(client.should_refresh());
    }

    #[tokio::test]
    async fn test_status_overrides_merge_onto_fresh_read() {
        let device = MockDevice::new(&TEMPERATURES, &[0x81, 0x07, 0x40]);
        let mut client = device.client();
        client.set_manual_mode(false);
        client.set_status_flag(StatusFlag::Childlock, true);

        assert_ok!(client.refresh().await);

        let calls = device.take_calls();
        assert_eq!(
            calls[calls.len() - 2],
            Call::Write(Register::Status, vec![0x80, 0x07, 0x40], false)
        );
        assert_eq!(client.manual_mode(), Some(false));
        assert_eq!(client.status_flag(StatusFlag::Installing), Some(true));
        assert_eq!(client.unused_status_bits(), Some(0x40_0000));
        assert!(client.pending().is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_keeps_pending_mutation() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        device.script(|s| s.fail_read = Some(Register::Temperature));
        let mut client = device.client();
        assert_ok!(client.set_manual_temperature(22.0));

        let err = assert_err!(client.refresh().await);

        assert!(err.is_credential_error());
        assert!(!client.is_available());
        assert_eq!(client.pending().manual_target, Some(44));
        assert!(client.should_refresh());
        assert_eq!(client.current_temperature(), None);
        assert_eq!(device.take_calls().last(), Some(&Call::Disconnect));
    }

    #[tokio::test]
    async fn test_malformed_register_keeps_mirror() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        let mut client = device.client();
        assert_ok!(client.refresh().await);
        let mirror = *client.state();

        device.script(|s| s.status = vec![0x01, 0x00]);
        let err = assert_err!(client.refresh().await);

        assert!(matches!(
            err,
            CometBlueError::MalformedRegister {
                register: Register::Status,
                expected: 3,
                actual: 2
            }
        ));
        assert!(!client.is_available());
        assert_eq!(client.state().temperatures, mirror.temperatures);
        assert_eq!(client.state().status, mirror.status);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_read_state() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        let mut client = device.client();
        assert_ok!(client.refresh().await);

        device.script(|s| {
            s.temperature = vec![42, 40, 16, 56, 0x80, 0, 0];
            s.fail_write = Some(Register::Status);
        });
        client.set_manual_mode(false);
        device.take_calls();

        let err = assert_err!(client.refresh().await);

        assert!(matches!(
            err,
            CometBlueError::Write {
                register: Register::Status,
                ..
            }
        ));
        assert!(!client.is_available());
        assert_eq!(client.current_temperature(), Some(21.0));
        assert_eq!(client.manual_mode(), Some(true));
        assert_eq!(client.pending().flags.get(&StatusFlag::ManualMode), Some(&false));
        assert_eq!(device.take_calls().last(), Some(&Call::Disconnect));
    }

    #[tokio::test]
    async fn test_temperature_write_failure_keeps_pending() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        device.script(|s| s.fail_write = Some(Register::Temperature));
        let mut client = device.client();
        assert_ok!(client.set_manual_temperature(21.5));

        let err = assert_err!(client.refresh().await);

        assert!(matches!(
            err,
            CometBlueError::Write {
                register: Register::Temperature,
                ..
            }
        ));
        assert!(!client.is_available());
        assert_eq!(client.manual_temperature(), Some(20.0));
        assert_eq!(client.current_temperature(), Some(10.0));
        assert_eq!(client.pending().manual_target, Some(43));
        assert!(client.should_refresh());
        assert_eq!(device.take_calls().last(), Some(&Call::Disconnect));
    }

    #[tokio::test]
    async fn test_status_read_failure_keeps_mirror() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        let mut client = device.client();
        assert_ok!(client.refresh().await);
        let mirror = *client.state();
        device.take_calls();

        device.script(|s| {
            s.temperature = vec![42, 40, 16, 56, 0x80, 0, 0];
            s.fail_read = Some(Register::Status);
        });
        client.set_manual_mode(false);

        let err = assert_err!(client.refresh().await);

        assert!(err.is_credential_error());
        assert!(!client.is_available());
        assert_eq!(client.state().temperatures, mirror.temperatures);
        assert_eq!(client.state().status, mirror.status);
        assert_eq!(client.current_temperature(), Some(10.0));
        assert_eq!(client.pending().flags.get(&StatusFlag::ManualMode), Some(&false));

        let mut expected = session_prologue();
        expected.push(Call::Disconnect);
        assert_eq!(device.take_calls(), expected);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        let mut client = device.client();

        assert_ok!(client.refresh().await);
        let first = *client.state();
        device.take_calls();

        assert_ok!(client.refresh().await);
        assert_eq!(*client.state(), first);

        let writes: Vec<_> = device
            .take_calls()
            .into_iter()
            .filter(|call| {
                matches!(call, Call::Write(register, ..) if *register != Register::Credential)
            })
            .collect();
        assert!(writes.is_empty());
    }

    #[tokio::test]
    async fn test_update_skips_fresh_device() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        let mut client = device.client();

        assert!(client.update().await);
        device.take_calls();

        assert!(!client.update().await);
        assert!(device.take_calls().is_empty());

        client.set_manual_mode(false);
        assert!(client.update().await);
        assert!(!device.take_calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_swallows_failures() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        device.script(|s| s.connect_failures = 2);
        let mut client = device.client();

        assert!(client.update().await);
        assert!(!client.is_available());
    }

    #[test]
    fn test_invalid_temperature_is_not_staged() {
        let device = MockDevice::new(&TEMPERATURES, &MANUAL_MODE);
        let mut client = device.client();

        let err = assert_err!(client.set_manual_temperature(35.0));
        assert!(matches!(err, CometBlueError::InvalidParameters(_)));
        assert!(client.pending().is_empty());
    }
}
