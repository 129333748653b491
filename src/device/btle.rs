//! btleplug implementation of the link adapter traits.

use std::collections::BTreeSet;
use std::time::Duration;
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::future;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::time::sleep;

use crate::device::adapter::{
    name_matches, Channel, ChannelFlags, DisconnectStream, LinkAdapter, LinkPeripheral, PayloadStream, PowerState,
    ServiceInfo, WriteMode,
};
use crate::error::DeviceError;

pub struct BtleAdapter {
    // kept alive for as long as the adapter is in use
    _manager: Manager,
    adapter: Option<Adapter>,
}

impl BtleAdapter {
    /// Uses the first adapter reported by the platform, if any.
    pub async fn new() -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?.into_iter().next();

        match &adapter {
            Some(adapter) => info!(
                "Using adapter {}",
                adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()),
            ),
            None => warn!("No bluetooth adapter found"),
        }

        Ok(BtleAdapter { _manager: manager, adapter })
    }

    fn adapter(&self) -> Result<&Adapter, DeviceError> {
        self.adapter.as_ref().ok_or(DeviceError::AdapterUnavailable { state: PowerState::Unsupported })
    }
}

#[derive(Debug, Clone)]
pub struct BtlePeripheral {
    peripheral: Peripheral,
}

impl BtlePeripheral {
    fn characteristic(&self, channel: &Channel) -> Result<Characteristic, DeviceError> {
        self.peripheral.services()
            .iter()
            .filter(|service| service.uuid == channel.service_uuid)
            .flat_map(|service| service.characteristics.iter())
            .find(|characteristic| characteristic.uuid == channel.uuid)
            .cloned()
            .ok_or(DeviceError::MissingCharacteristic { uuid: channel.uuid })
    }
}

fn channel_flags(properties: CharPropFlags) -> ChannelFlags {
    ChannelFlags {
        read: properties.contains(CharPropFlags::READ),
        write: properties.contains(CharPropFlags::WRITE),
        write_without_response: properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: properties.contains(CharPropFlags::NOTIFY) || properties.contains(CharPropFlags::INDICATE),
    }
}

fn service_info(service: Service) -> ServiceInfo {
    ServiceInfo {
        uuid: service.uuid,
        channels: service.characteristics
            .into_iter()
            .map(|characteristic| Channel {
                uuid: characteristic.uuid,
                service_uuid: characteristic.service_uuid,
                flags: channel_flags(characteristic.properties),
            })
            .collect(),
    }
}

#[async_trait]
impl LinkPeripheral for BtlePeripheral {
    fn id(&self) -> String {
        format!("{:?}", self.peripheral.id())
    }

    async fn display_name(&self) -> Option<String> {
        match self.peripheral.properties().await {
            Ok(properties) => properties.and_then(|properties| properties.local_name),
            Err(err) => {
                warn!("Could not query peripheral for properties: {:?}", err);
                None
            },
        }
    }

    async fn is_connected(&self) -> Result<bool, DeviceError> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn services(&self) -> Result<Vec<ServiceInfo>, DeviceError> {
        info!("Discovering services...");
        self.peripheral.discover_services().await?;

        let services: BTreeSet<Service> = self.peripheral.services();
        Ok(services.into_iter().map(service_info).collect())
    }

    async fn read(&self, channel: &Channel) -> Result<Vec<u8>, DeviceError> {
        let characteristic = self.characteristic(channel)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write(&self, channel: &Channel, data: &[u8], mode: WriteMode) -> Result<(), DeviceError> {
        let characteristic = self.characteristic(channel)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };

        Ok(self.peripheral.write(&characteristic, data, write_type).await?)
    }

    async fn monitor(&self, channel: &Channel) -> Result<PayloadStream, DeviceError> {
        let characteristic = self.characteristic(channel)?;
        info!("Subscribing to characteristic {:?} {:?}", characteristic.service_uuid, characteristic.uuid);
        self.peripheral.subscribe(&characteristic).await?;

        let uuid = characteristic.uuid;
        let notifications = self.peripheral.notifications().await?;
        Ok(notifications
            .filter_map(move |notification| future::ready((notification.uuid == uuid).then_some(notification.value)))
            .boxed())
    }

    async fn unmonitor(&self, channel: &Channel) -> Result<(), DeviceError> {
        let characteristic = self.characteristic(channel)?;
        Ok(self.peripheral.unsubscribe(&characteristic).await?)
    }
}

fn power_state_of(state: CentralState) -> PowerState {
    match state {
        CentralState::PoweredOn => PowerState::On,
        CentralState::PoweredOff => PowerState::Off,
        CentralState::Unknown => PowerState::Unknown,
    }
}

#[async_trait]
impl LinkAdapter for BtleAdapter {
    type Peripheral = BtlePeripheral;

    async fn power_state(&self) -> PowerState {
        match &self.adapter {
            None => PowerState::Unsupported,
            Some(adapter) => match adapter.adapter_state().await {
                Ok(state) => power_state_of(state),
                Err(err) => {
                    warn!("Could not query the bluetooth adapter state: {}", err);
                    PowerState::Unknown
                },
            },
        }
    }

    async fn connected_peripherals(&self) -> Result<Vec<BtlePeripheral>, DeviceError> {
        let mut connected = Vec::new();

        for peripheral in self.adapter()?.peripherals().await? {
            match peripheral.is_connected().await {
                Ok(true) => connected.push(BtlePeripheral { peripheral }),
                Ok(false) => {},
                Err(err) => debug!("Error checking for connection state: {:?}", err),
            }
        }

        Ok(connected)
    }

    async fn scan(&self, name_fragments: &[&str], duration: Duration) -> Result<Vec<BtlePeripheral>, DeviceError> {
        let adapter = self.adapter()?;

        info!("Scanning for {:?}...", duration);
        adapter.start_scan(ScanFilter::default()).await?;
        sleep(duration).await;
        if let Err(err) = adapter.stop_scan().await {
            warn!("Failed to stop scanning: {}", err);
        }

        let mut found = Vec::new();
        for peripheral in adapter.peripherals().await? {
            let peripheral = BtlePeripheral { peripheral };
            if let Some(name) = peripheral.display_name().await {
                if name_matches(&name, name_fragments) {
                    debug!("Scan matched {} ({})", name, peripheral.id());
                    found.push(peripheral);
                }
            }
        }

        Ok(found)
    }

    async fn connect(&self, peripheral: &BtlePeripheral) -> Result<(), DeviceError> {
        Ok(peripheral.peripheral.connect().await?)
    }

    async fn disconnects(&self, peripheral: &BtlePeripheral) -> Result<DisconnectStream, DeviceError> {
        let target = peripheral.peripheral.id();
        let events = self.adapter()?.events().await?;

        Ok(events
            .filter_map(move |event| future::ready(match event {
                CentralEvent::DeviceDisconnected(id) if id == target => Some(()),
                _ => None,
            }))
            .boxed())
    }
}
