use std::time::Duration;
use log::{debug, info, warn};

use crate::device::adapter::{name_matches, LinkAdapter, LinkPeripheral, PowerState};
use crate::error::DeviceError;

/// Finds the wristband, preferring one that is already connected over an active scan.
pub struct PeripheralResolver<'a, A: LinkAdapter> {
    adapter: &'a A,
    name_fragments: &'a [&'a str],
    scan_duration: Duration,
}

impl<'a, A: LinkAdapter> PeripheralResolver<'a, A> {
    pub fn new(adapter: &'a A, name_fragments: &'a [&'a str], scan_duration: Duration) -> Self {
        PeripheralResolver { adapter, name_fragments, scan_duration }
    }

    /// Both `AdapterUnavailable` and `PeripheralNotFound` mean "not found"; neither is retried here.
    pub async fn resolve(&self) -> Result<A::Peripheral, DeviceError> {
        let state = self.adapter.power_state().await;
        if state != PowerState::On {
            warn!("Bluetooth adapter is not powered on ({:?})", state);
            return Err(DeviceError::AdapterUnavailable { state });
        }

        match self.adapter.connected_peripherals().await {
            Ok(peripherals) => {
                if let Some(peripheral) = self.first_match(peripherals).await {
                    info!("Using already connected peripheral {}", peripheral.id());
                    return Ok(peripheral);
                }
            },
            Err(err) => {
                warn!("Failed to query connected peripherals: {}", err);
            },
        }

        debug!("No matching peripheral connected; scanning for {:?}", self.scan_duration);
        let found = match self.adapter.scan(self.name_fragments, self.scan_duration).await {
            Ok(found) => found,
            Err(err) => {
                warn!("Scanning failed: {}", err);
                return Err(DeviceError::PeripheralNotFound);
            },
        };

        match self.first_match(found).await {
            Some(peripheral) => {
                info!("Using scanned peripheral {}", peripheral.id());
                Ok(peripheral)
            },
            None => Err(DeviceError::PeripheralNotFound),
        }
    }

    async fn first_match(&self, peripherals: Vec<A::Peripheral>) -> Option<A::Peripheral> {
        for peripheral in peripherals {
            match peripheral.display_name().await {
                Some(name) if name_matches(&name, self.name_fragments) => return Some(peripheral),
                Some(name) => debug!("Ignoring peripheral {} ({})", peripheral.id(), name),
                None => debug!("Ignoring unnamed peripheral {}", peripheral.id()),
            }
        }
        None
    }
}
