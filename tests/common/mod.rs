#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::future::pending;
use futures::StreamExt;
use uuid::Uuid;

use sleepband::device::adapter::{
    name_matches, Channel, ChannelFlags, DisconnectStream, LinkAdapter, LinkPeripheral, PayloadStream, PowerState,
    ServiceInfo, WriteMode,
};
use sleepband::device::constants::{
    HEART_RATE_MEASUREMENT_CHARACTERISTIC, HEART_RATE_SERVICE, MOTION_DATA_CHARACTERISTIC, MOTION_SERVICE,
};
use sleepband::device::types::{SessionEvent, SessionState};
use sleepband::error::{DeviceError, StoreError};
use sleepband::store::gateway::{ChannelKind, PersistenceGateway, SessionId};
use sleepband::store::metrics::MetricsTrigger;

pub const MOTION_CONTROL: Uuid = Uuid::from_u128(0x0000fff2_0000_1000_8000_00805f9b34fb);

/// Upper bound on how long (virtual time) a test waits for something to happen.
pub const PATIENCE: Duration = Duration::from_secs(120);

pub fn band_services(with_control: bool) -> Vec<ServiceInfo> {
    let notifiable = ChannelFlags { read: true, notify: true, ..Default::default() };
    let writable = ChannelFlags { write: true, write_without_response: true, ..Default::default() };

    let mut motion_channels = vec![Channel { uuid: MOTION_DATA_CHARACTERISTIC, service_uuid: MOTION_SERVICE, flags: notifiable }];
    if with_control {
        motion_channels.push(Channel { uuid: MOTION_CONTROL, service_uuid: MOTION_SERVICE, flags: writable });
    }

    vec![
        ServiceInfo { uuid: MOTION_SERVICE, channels: motion_channels },
        ServiceInfo {
            uuid: HEART_RATE_SERVICE,
            channels: vec![Channel {
                uuid: HEART_RATE_MEASUREMENT_CHARACTERISTIC,
                service_uuid: HEART_RATE_SERVICE,
                flags: notifiable,
            }],
        },
    ]
}

#[derive(Debug, Clone)]
pub enum ReadBehavior {
    Value(Vec<u8>),
    /// A different 3 byte payload on every read; decodes as an invalid motion sample.
    Counter,
    Fail,
    /// Never completes.
    Hang,
}

struct PeripheralState {
    id: String,
    name: Option<String>,
    services: Mutex<Vec<ServiceInfo>>,
    connected: AtomicBool,
    reads: Mutex<HashMap<Uuid, ReadBehavior>>,
    read_count: AtomicUsize,
    counter: AtomicUsize,
    writes: Mutex<Vec<(Uuid, Vec<u8>, WriteMode)>>,
    monitors: Mutex<HashMap<Uuid, UnboundedSender<Vec<u8>>>>,
    unmonitored: Mutex<Vec<Uuid>>,
}

#[derive(Clone)]
pub struct FakePeripheral {
    state: Arc<PeripheralState>,
}

impl FakePeripheral {
    pub fn new(name: &str, services: Vec<ServiceInfo>) -> Self {
        let mut reads = HashMap::new();
        reads.insert(MOTION_DATA_CHARACTERISTIC, ReadBehavior::Counter);
        // bpm 0 is rejected, so scheduled heart rate reads store nothing by default
        reads.insert(HEART_RATE_MEASUREMENT_CHARACTERISTIC, ReadBehavior::Value(vec![0x00, 0x00]));

        FakePeripheral {
            state: Arc::new(PeripheralState {
                id: format!("fake-{}", name),
                name: Some(name.to_string()),
                services: Mutex::new(services),
                connected: AtomicBool::new(true),
                reads: Mutex::new(reads),
                read_count: AtomicUsize::new(0),
                counter: AtomicUsize::new(0),
                writes: Mutex::new(Vec::new()),
                monitors: Mutex::new(HashMap::new()),
                unmonitored: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn band() -> Self {
        FakePeripheral::new("SleepBand 01", band_services(true))
    }

    pub fn set_read(&self, uuid: Uuid, behavior: ReadBehavior) {
        self.state.reads.lock().unwrap().insert(uuid, behavior);
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.connected.store(connected, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.state.read_count.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>, WriteMode)> {
        self.state.writes.lock().unwrap().clone()
    }

    pub fn unmonitored(&self) -> Vec<Uuid> {
        self.state.unmonitored.lock().unwrap().clone()
    }

    /// True while the session still holds the notification stream of `uuid`.
    pub fn is_monitored(&self, uuid: Uuid) -> bool {
        match self.state.monitors.lock().unwrap().get(&uuid) {
            Some(sender) => !sender.is_closed(),
            None => false,
        }
    }

    pub fn notify(&self, uuid: Uuid, payload: &[u8]) {
        let monitors = self.state.monitors.lock().unwrap();
        let sender = monitors.get(&uuid).expect("characteristic is not monitored");
        sender.unbounded_send(payload.to_vec()).expect("notification stream was dropped");
    }

    pub fn notify_motion(&self, payload: &[u8]) {
        self.notify(MOTION_DATA_CHARACTERISTIC, payload);
    }

    pub fn notify_heart_rate(&self, payload: &[u8]) {
        self.notify(HEART_RATE_MEASUREMENT_CHARACTERISTIC, payload);
    }
}

#[async_trait]
impl LinkPeripheral for FakePeripheral {
    fn id(&self) -> String {
        self.state.id.clone()
    }

    async fn display_name(&self) -> Option<String> {
        self.state.name.clone()
    }

    async fn is_connected(&self) -> Result<bool, DeviceError> {
        Ok(self.state.connected.load(Ordering::SeqCst))
    }

    async fn services(&self) -> Result<Vec<ServiceInfo>, DeviceError> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(btleplug::Error::NotConnected.into());
        }
        Ok(self.state.services.lock().unwrap().clone())
    }

    async fn read(&self, channel: &Channel) -> Result<Vec<u8>, DeviceError> {
        self.state.read_count.fetch_add(1, Ordering::SeqCst);
        let behavior = self.state.reads.lock().unwrap().get(&channel.uuid).cloned();

        match behavior {
            Some(ReadBehavior::Value(value)) => Ok(value),
            Some(ReadBehavior::Counter) => {
                let count = self.state.counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![count as u8, 0xAA, 0x55])
            },
            Some(ReadBehavior::Fail) | None => Err(btleplug::Error::RuntimeError(format!("read {} failed", channel.uuid)).into()),
            Some(ReadBehavior::Hang) => pending().await,
        }
    }

    async fn write(&self, channel: &Channel, data: &[u8], mode: WriteMode) -> Result<(), DeviceError> {
        self.state.writes.lock().unwrap().push((channel.uuid, data.to_vec(), mode));
        // the firmware refuses unacknowledged writes
        match mode {
            WriteMode::WithResponse => Ok(()),
            WriteMode::WithoutResponse => Err(btleplug::Error::NotSupported(String::from("write without response")).into()),
        }
    }

    async fn monitor(&self, channel: &Channel) -> Result<PayloadStream, DeviceError> {
        let (sender, receiver) = mpsc::unbounded();
        self.state.monitors.lock().unwrap().insert(channel.uuid, sender);
        Ok(receiver.boxed())
    }

    async fn unmonitor(&self, channel: &Channel) -> Result<(), DeviceError> {
        self.state.unmonitored.lock().unwrap().push(channel.uuid);
        Ok(())
    }
}

pub struct FakeAdapter {
    power: Mutex<PowerState>,
    peripherals: Mutex<Vec<FakePeripheral>>,
    connected_queries: AtomicUsize,
    scans: AtomicUsize,
    connects: AtomicUsize,
    disconnect_listeners: Mutex<Vec<(String, UnboundedSender<()>)>>,
}

impl FakeAdapter {
    pub fn new(peripherals: Vec<FakePeripheral>) -> Self {
        FakeAdapter {
            power: Mutex::new(PowerState::On),
            peripherals: Mutex::new(peripherals),
            connected_queries: AtomicUsize::new(0),
            scans: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            disconnect_listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn set_power(&self, power: PowerState) {
        *self.power.lock().unwrap() = power;
    }

    /// How many times a resolver asked for the connected peripherals.
    pub fn connected_queries(&self) -> usize {
        self.connected_queries.load(Ordering::SeqCst)
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn has_disconnect_listener(&self) -> bool {
        self.disconnect_listeners.lock().unwrap().iter().any(|(_, sender)| !sender.is_closed())
    }

    /// Drops the link of `peripheral` and tells every listener.
    pub fn disconnect(&self, peripheral: &FakePeripheral) {
        peripheral.set_connected(false);
        for (id, sender) in self.disconnect_listeners.lock().unwrap().iter() {
            if *id == peripheral.id() {
                let _ = sender.unbounded_send(());
            }
        }
    }
}

#[async_trait]
impl LinkAdapter for FakeAdapter {
    type Peripheral = FakePeripheral;

    async fn power_state(&self) -> PowerState {
        *self.power.lock().unwrap()
    }

    async fn connected_peripherals(&self) -> Result<Vec<FakePeripheral>, DeviceError> {
        self.connected_queries.fetch_add(1, Ordering::SeqCst);
        let peripherals = self.peripherals.lock().unwrap();
        Ok(peripherals.iter().filter(|peripheral| peripheral.state.connected.load(Ordering::SeqCst)).cloned().collect())
    }

    async fn scan(&self, name_fragments: &[&str], duration: Duration) -> Result<Vec<FakePeripheral>, DeviceError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(duration).await;

        let peripherals = self.peripherals.lock().unwrap().clone();
        Ok(peripherals
            .into_iter()
            .filter(|peripheral| match &peripheral.state.name {
                Some(name) => name_matches(name, name_fragments),
                None => false,
            })
            .collect())
    }

    async fn connect(&self, peripheral: &FakePeripheral) -> Result<(), DeviceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        peripheral.set_connected(true);
        Ok(())
    }

    async fn disconnects(&self, peripheral: &FakePeripheral) -> Result<DisconnectStream, DeviceError> {
        let (sender, receiver) = mpsc::unbounded();
        self.disconnect_listeners.lock().unwrap().push((peripheral.id(), sender));
        Ok(receiver.boxed())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSample {
    pub session_id: SessionId,
    pub kind: ChannelKind,
    pub payload: serde_json::Value,
    pub captured_at: String,
}

#[derive(Default)]
pub struct FakeGateway {
    /// Creates sessions but never answers appends or closes.
    pub unresponsive: bool,
    pub created: Mutex<Vec<(i64, String)>>,
    pub samples: Mutex<Vec<StoredSample>>,
    pub closed: Mutex<Vec<(SessionId, String)>>,
}

impl FakeGateway {
    pub fn unresponsive() -> Self {
        FakeGateway { unresponsive: true, ..Default::default() }
    }

    pub fn samples_of(&self, kind: ChannelKind) -> Vec<StoredSample> {
        self.samples.lock().unwrap().iter().filter(|sample| sample.kind == kind).cloned().collect()
    }

    pub fn closed(&self) -> Vec<(SessionId, String)> {
        self.closed.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<(i64, String)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceGateway for FakeGateway {
    async fn create_session(&self, user_id: i64, started_at: &str) -> Result<SessionId, StoreError> {
        let mut created = self.created.lock().unwrap();
        created.push((user_id, started_at.to_string()));
        Ok(100 + created.len() as SessionId)
    }

    async fn append_sample(
        &self,
        session_id: SessionId,
        kind: ChannelKind,
        payload: &serde_json::Value,
        captured_at: &str,
    ) -> Result<(), StoreError> {
        if self.unresponsive {
            return pending().await;
        }
        self.samples.lock().unwrap().push(StoredSample {
            session_id,
            kind,
            payload: payload.clone(),
            captured_at: captured_at.to_string(),
        });
        Ok(())
    }

    async fn close_session(&self, session_id: SessionId, ended_at: &str) -> Result<(), StoreError> {
        if self.unresponsive {
            return pending().await;
        }
        self.closed.lock().unwrap().push((session_id, ended_at.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMetrics {
    pub fail: bool,
    pub requested: Mutex<Vec<SessionId>>,
}

impl FakeMetrics {
    pub fn failing() -> Self {
        FakeMetrics { fail: true, ..Default::default() }
    }

    pub fn requested(&self) -> Vec<SessionId> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsTrigger for FakeMetrics {
    async fn request_metrics(&self, session_id: SessionId) -> Result<(), StoreError> {
        self.requested.lock().unwrap().push(session_id);
        if self.fail {
            return Err(StoreError::Status { status: 503, body: String::from("metrics service unavailable") });
        }
        Ok(())
    }
}

/// Reads session events until `state` is entered.
pub async fn wait_for_state(events: &mut mpsc::Receiver<SessionEvent>, state: SessionState) {
    let found = tokio::time::timeout(PATIENCE, async {
        while let Some(event) = events.next().await {
            if let SessionEvent::StateChange(entered) = event {
                if entered == state {
                    return true;
                }
            }
        }
        false
    }).await;

    assert!(matches!(found, Ok(true)), "session never entered {}", state);
}

/// Reads session events until one sample of `kind` was stored.
pub async fn wait_for_sample(events: &mut mpsc::Receiver<SessionEvent>, kind: ChannelKind) {
    let found = tokio::time::timeout(PATIENCE, async {
        while let Some(event) = events.next().await {
            if let SessionEvent::SampleStored(stored) = event {
                if stored == kind {
                    return true;
                }
            }
        }
        false
    }).await;

    assert!(matches!(found, Ok(true)), "no {} sample was stored", kind);
}
