use log::{debug, info, warn};

use crate::device::adapter::{Channel, LinkPeripheral, ServiceInfo};
use crate::device::constants::{
    HEART_RATE_MEASUREMENT_CHARACTERISTIC, HEART_RATE_SERVICE, MOTION_CONTROL_CANDIDATES,
    MOTION_CONTROL_SUFFIXES, MOTION_DATA_CHARACTERISTIC, MOTION_SERVICE,
};
use crate::error::DeviceError;

/// The channels a sampling session needs, resolved once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    pub motion_data: Channel,
    /// Without a control channel motion is sampled read-only, with no activation step.
    pub motion_control: Option<Channel>,
    pub heart_rate_data: Channel,
}

pub async fn discover_channels<P: LinkPeripheral>(peripheral: &P) -> Result<Channels, DeviceError> {
    info!("Discovering services of {}...", peripheral.id());
    let services = peripheral.services().await?;
    let channels = select_channels(&services)?;

    match &channels.motion_control {
        Some(control) => info!("Motion control channel: {}", control.uuid),
        None => warn!("No writable motion control channel; sampling motion read-only"),
    }

    Ok(channels)
}

pub fn select_channels(services: &[ServiceInfo]) -> Result<Channels, DeviceError> {
    let motion_service = find_service(services, &MOTION_SERVICE)?;
    let heart_rate_service = find_service(services, &HEART_RATE_SERVICE)?;

    let motion_data = motion_service.channels.iter()
        .find(|channel| channel.uuid == MOTION_DATA_CHARACTERISTIC)
        .cloned()
        .ok_or(DeviceError::MissingCharacteristic { uuid: MOTION_DATA_CHARACTERISTIC })?;

    let heart_rate_data = heart_rate_service.channels.iter()
        .find(|channel| channel.uuid == HEART_RATE_MEASUREMENT_CHARACTERISTIC)
        .cloned()
        .ok_or(DeviceError::MissingCharacteristic { uuid: HEART_RATE_MEASUREMENT_CHARACTERISTIC })?;

    let motion_control = select_motion_control(motion_service);

    Ok(Channels { motion_data, motion_control, heart_rate_data })
}

fn find_service<'a>(services: &'a [ServiceInfo], uuid: &uuid::Uuid) -> Result<&'a ServiceInfo, DeviceError> {
    services.iter()
        .find(|service| service.uuid == *uuid)
        .ok_or(DeviceError::MissingService { uuid: *uuid })
}

// Writable siblings of the data channel, in order of preference:
// known identifiers, then known suffixes, then whatever is writable.
fn select_motion_control(motion_service: &ServiceInfo) -> Option<Channel> {
    let writable: Vec<&Channel> = motion_service.channels.iter()
        .filter(|channel| channel.uuid != MOTION_DATA_CHARACTERISTIC && channel.flags.is_writable())
        .collect();

    debug!("{} writable motion sibling(s)", writable.len());

    writable.iter()
        .find(|channel| MOTION_CONTROL_CANDIDATES.contains(&channel.uuid))
        .or_else(|| writable.iter().find(|channel| has_control_suffix(channel)))
        .or_else(|| writable.first())
        .map(|channel| (*channel).clone())
}

fn has_control_suffix(channel: &Channel) -> bool {
    let short = channel.uuid.simple().to_string();
    MOTION_CONTROL_SUFFIXES.iter().any(|suffix| short[..8].ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::adapter::ChannelFlags;
    use uuid::Uuid;

    fn channel(uuid: Uuid, service_uuid: Uuid, flags: ChannelFlags) -> Channel {
        Channel { uuid, service_uuid, flags }
    }

    fn notifiable() -> ChannelFlags {
        ChannelFlags { read: true, notify: true, ..Default::default() }
    }

    fn writable() -> ChannelFlags {
        ChannelFlags { write: true, ..Default::default() }
    }

    fn heart_rate_service() -> ServiceInfo {
        ServiceInfo {
            uuid: HEART_RATE_SERVICE,
            channels: vec![channel(HEART_RATE_MEASUREMENT_CHARACTERISTIC, HEART_RATE_SERVICE, notifiable())],
        }
    }

    fn motion_service(extra: Vec<Channel>) -> ServiceInfo {
        let mut channels = vec![channel(MOTION_DATA_CHARACTERISTIC, MOTION_SERVICE, notifiable())];
        channels.extend(extra);
        ServiceInfo { uuid: MOTION_SERVICE, channels }
    }

    #[test]
    fn finds_all_three_channels() {
        let control = channel(MOTION_CONTROL_CANDIDATES[1], MOTION_SERVICE, writable());
        let services = vec![motion_service(vec![control.clone()]), heart_rate_service()];

        let channels = select_channels(&services).unwrap();
        assert_eq!(channels.motion_data.uuid, MOTION_DATA_CHARACTERISTIC);
        assert_eq!(channels.motion_control, Some(control));
        assert_eq!(channels.heart_rate_data.uuid, HEART_RATE_MEASUREMENT_CHARACTERISTIC);
    }

    #[test]
    fn control_channel_is_optional() {
        let read_only = channel(Uuid::from_u128(0x0000fff4_0000_1000_8000_00805f9b34fb), MOTION_SERVICE, notifiable());
        let services = vec![motion_service(vec![read_only]), heart_rate_service()];

        let channels = select_channels(&services).unwrap();
        assert_eq!(channels.motion_control, None);
    }

    #[test]
    fn prefers_known_control_suffix_over_first_writable() {
        let other = channel(Uuid::from_u128(0x0000aaaa_0000_1000_8000_00805f9b34fb), MOTION_SERVICE, writable());
        let suffixed = channel(Uuid::from_u128(0x1234fff3_0000_1000_8000_00805f9b34fb), MOTION_SERVICE, writable());
        let services = vec![motion_service(vec![other.clone(), suffixed.clone()]), heart_rate_service()];

        let channels = select_channels(&services).unwrap();
        assert_eq!(channels.motion_control, Some(suffixed));

        let services = vec![motion_service(vec![other.clone()]), heart_rate_service()];
        assert_eq!(select_channels(&services).unwrap().motion_control, Some(other));
    }

    #[test]
    fn data_channel_is_never_the_control_channel() {
        let writable_data = channel(
            MOTION_DATA_CHARACTERISTIC,
            MOTION_SERVICE,
            ChannelFlags { read: true, notify: true, write: true, write_without_response: false },
        );
        let services = vec![
            ServiceInfo { uuid: MOTION_SERVICE, channels: vec![writable_data] },
            heart_rate_service(),
        ];

        assert_eq!(select_channels(&services).unwrap().motion_control, None);
    }

    #[test]
    fn missing_services_and_channels_fail() {
        let err = select_channels(&[heart_rate_service()]).unwrap_err();
        assert!(matches!(err, DeviceError::MissingService { uuid } if uuid == MOTION_SERVICE));

        let err = select_channels(&[motion_service(vec![])]).unwrap_err();
        assert!(matches!(err, DeviceError::MissingService { uuid } if uuid == HEART_RATE_SERVICE));

        let empty_heart_rate = ServiceInfo { uuid: HEART_RATE_SERVICE, channels: vec![] };
        let err = select_channels(&[motion_service(vec![]), empty_heart_rate]).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::MissingCharacteristic { uuid } if uuid == HEART_RATE_MEASUREMENT_CHARACTERISTIC
        ));
    }
}
