//! Boundary between the sampling core and the platform radio.
//!
//! Everything behind these traits is plain I/O. The btleplug implementation lives in
//! [`crate::device::btle`]; tests substitute an in-memory fake.

use std::time::Duration;
use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Unknown,
    Unsupported,
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelFlags {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

impl ChannelFlags {
    pub fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// One characteristic of a peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub flags: ChannelFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub channels: Vec<Channel>,
}

pub type PayloadStream = BoxStream<'static, Vec<u8>>;
pub type DisconnectStream = BoxStream<'static, ()>;

#[async_trait]
pub trait LinkPeripheral: Clone + Send + Sync + 'static {
    /// Stable identifier of the peripheral.
    fn id(&self) -> String;

    async fn display_name(&self) -> Option<String>;

    async fn is_connected(&self) -> Result<bool, DeviceError>;

    /// Enumerates services and their characteristics, discovering them first if needed.
    async fn services(&self) -> Result<Vec<ServiceInfo>, DeviceError>;

    async fn read(&self, channel: &Channel) -> Result<Vec<u8>, DeviceError>;

    async fn write(&self, channel: &Channel, data: &[u8], mode: WriteMode) -> Result<(), DeviceError>;

    /// Subscribes to change notifications. Dropping the stream stops delivery.
    async fn monitor(&self, channel: &Channel) -> Result<PayloadStream, DeviceError>;

    async fn unmonitor(&self, channel: &Channel) -> Result<(), DeviceError>;
}

#[async_trait]
pub trait LinkAdapter: Send + Sync + 'static {
    type Peripheral: LinkPeripheral;

    async fn power_state(&self) -> PowerState;

    async fn connected_peripherals(&self) -> Result<Vec<Self::Peripheral>, DeviceError>;

    /// Scans for `duration` and returns every peripheral whose name contains one of the fragments.
    async fn scan(&self, name_fragments: &[&str], duration: Duration) -> Result<Vec<Self::Peripheral>, DeviceError>;

    async fn connect(&self, peripheral: &Self::Peripheral) -> Result<(), DeviceError>;

    /// Yields once every time `peripheral` drops its connection.
    async fn disconnects(&self, peripheral: &Self::Peripheral) -> Result<DisconnectStream, DeviceError>;
}

/// Case-insensitive match of a display name against the target fragments.
pub fn name_matches(name: &str, fragments: &[&str]) -> bool {
    let name = name.to_lowercase();
    fragments.iter().any(|fragment| name.contains(&fragment.to_lowercase()))
}
