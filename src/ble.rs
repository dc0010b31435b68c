use async_trait::async_trait;
use btleplug::{
    api::{
        BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures::stream::StreamExt;
use std::{collections::HashMap, time::Duration};
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::LinkError,
    link::{Link, LinkProvider},
    protocol::Register,
    types::BleLinkParams,
    COMETBLUE_SERVICE_UUID,
};

/// Scan filter matching devices that advertise the thermostat service
fn service_scan_filter() -> Result<ScanFilter, LinkError> {
    let service_uuid = Uuid::parse_str(COMETBLUE_SERVICE_UUID)
        .map_err(|e| LinkError::Other(format!("Invalid service UUID: {e}")))?;

    Ok(ScanFilter {
        services: vec![service_uuid],
    })
}

/// Hands out [`BleLink`]s bound to the first Bluetooth adapter
pub struct BleLinkProvider {
    adapter: Adapter,
    params: BleLinkParams,
}

impl BleLinkProvider {
    /// Create a provider on the first available adapter
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Ble`] if the Bluetooth manager cannot be initialized,
    /// or [`LinkError::Other`] if no adapter is present.
    pub async fn new(params: BleLinkParams) -> Result<Self, LinkError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LinkError::Other("No Bluetooth adapter available".to_string()))?;

        Ok(Self { adapter, params })
    }
}

impl LinkProvider for BleLinkProvider {
    type Link = BleLink;

    fn create_link(&self) -> BleLink {
        BleLink {
            adapter: self.adapter.clone(),
            params: self.params.clone(),
            peripheral: None,
            characteristics: HashMap::new(),
        }
    }
}

/// [`Link`] over a GATT connection
///
/// Registers are resolved to characteristics by UUID after service discovery.
pub struct BleLink {
    adapter: Adapter,
    params: BleLinkParams,
    peripheral: Option<Peripheral>,
    characteristics: HashMap<Uuid, Characteristic>,
}

impl BleLink {
    /// Find the peripheral with the given address, scanning if the adapter hasn't seen it yet
    async fn find_peripheral(&self, target: BDAddr) -> Result<Peripheral, LinkError> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address() == target {
                return Ok(peripheral);
            }
        }

        let scan_filter = service_scan_filter()?;

        info!("Scanning for device {target}...");
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(scan_filter).await?;

        let scan = async {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDiscovered(id) = event {
                    let peripheral = self.adapter.peripheral(&id).await?;
                    if peripheral.address() == target {
                        return Ok(Some(peripheral));
                    }
                }
            }
            Ok::<_, LinkError>(None)
        };

        let found = timeout(Duration::from_millis(self.params.scan_timeout_ms), scan).await;
        self.adapter.stop_scan().await?;

        match found {
            Ok(Ok(Some(peripheral))) => Ok(peripheral),
            Ok(Err(e)) => Err(e),
            Ok(Ok(None)) | Err(_) => Err(LinkError::DeviceNotFound(target.to_string())),
        }
    }

    fn characteristic(
        &self,
        register: Register,
    ) -> Result<(&Peripheral, &Characteristic), LinkError> {
        let peripheral = self.peripheral.as_ref().ok_or(LinkError::NotConnected)?;

        let uuid = Uuid::parse_str(register.characteristic_uuid())
            .map_err(|e| LinkError::Other(format!("Invalid characteristic UUID: {e}")))?;
        let characteristic = self
            .characteristics
            .get(&uuid)
            .ok_or(LinkError::CharacteristicNotFound(register))?;

        Ok((peripheral, characteristic))
    }
}

#[async_trait]
impl Link for BleLink {
    async fn connect(&mut self, address: &str) -> Result<(), LinkError> {
        let target: BDAddr = address
            .parse()
            .map_err(|_| LinkError::InvalidAddress(address.to_string()))?;

        let peripheral = self.find_peripheral(target).await?;

        let timeout_ms = self.params.connect_timeout_ms;
        timeout(Duration::from_millis(timeout_ms), peripheral.connect())
            .await
            .map_err(|_| LinkError::Timeout { timeout_ms })??;
        self.peripheral = Some(peripheral.clone());

        peripheral.discover_services().await?;
        self.characteristics = peripheral
            .characteristics()
            .into_iter()
            .map(|c| (c.uuid, c))
            .collect();

        info!("Connected to {target}");
        Ok(())
    }

    async fn read_register(&mut self, register: Register) -> Result<Vec<u8>, LinkError> {
        let (peripheral, characteristic) = self.characteristic(register)?;

        let data = peripheral.read(characteristic).await?;
        debug!("Read {register} register: {:02X?}", data);

        Ok(data)
    }

    async fn write_register(
        &mut self,
        register: Register,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), LinkError> {
        let (peripheral, characteristic) = self.characteristic(register)?;

        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        debug!("Writing {register} register: {:02X?}", data);
        peripheral.write(characteristic, data, write_type).await?;

        Ok(())
    }

    async fn disconnect(&mut self) {
        self.characteristics.clear();

        if let Some(peripheral) = self.peripheral.take() {
            if let Err(e) = peripheral.disconnect().await {
                debug!("Ignoring disconnect error: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_parsing() {
        assert!(Uuid::parse_str(COMETBLUE_SERVICE_UUID).is_ok());

        for register in [Register::Credential, Register::Temperature, Register::Status] {
            assert!(
                Uuid::parse_str(register.characteristic_uuid()).is_ok(),
                "{register} UUID"
            );
        }
    }

    #[test]
    fn test_scan_filter_targets_service() {
        let filter = service_scan_filter().unwrap();
        assert_eq!(
            filter.services,
            vec![Uuid::parse_str(COMETBLUE_SERVICE_UUID).unwrap()]
        );
    }

    #[test]
    fn test_address_parsing() {
        assert!("11:22:33:44:55:66".parse::<BDAddr>().is_ok());
        assert!("11:22:33:44:55".parse::<BDAddr>().is_err());
        assert!("not an address".parse::<BDAddr>().is_err());
    }
}
