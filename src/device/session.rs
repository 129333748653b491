//! The sampling session: owns the connected peripheral and its channels for the lifetime of one
//! collection, paces and stores samples, and reconnects when the link goes away.
//!
//! All session state lives in a single task driven by a `select!` loop over the notification
//! streams, the disconnect listener, three timers and a cancellation token. Callbacks therefore
//! never race on that state, but their relative order is not defined; the shared [`Pacer`] per
//! channel is what keeps a notification and a scheduled read that arrive together from both
//! being stored.
//!
//! Accepted samples are handed to a second task that writes them to the store in order, so a
//! slow store never holds up the radio side.

use std::sync::Arc;
use std::time::SystemTime;
use futures::channel::mpsc::{self, Receiver, Sender};
use futures::StreamExt;
use log::{debug, error, info, trace, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::activation::{activate_motion, with_deadline};
use crate::device::adapter::{DisconnectStream, LinkAdapter, LinkPeripheral, PayloadStream, PowerState};
use crate::device::constants::{
    IO_ERROR_THRESHOLD, KEEP_ALIVE_PERIOD, MAX_RECONNECT_ATTEMPTS, MOVEMENT_HISTORY_CAPACITY,
    MOVEMENT_THRESHOLD, READ_DEADLINE, READ_FLOOR, RECONNECT_BACKOFF, SAMPLE_QUEUE_CAPACITY, SCAN_DURATION,
    STALE_RUN_THRESHOLD, STORE_DEADLINE, TARGET_NAME_FRAGMENTS, WRITE_DEADLINE,
};
use crate::device::decoder::{decode_heart_rate, decode_motion, to_hex, DecodedSample};
use crate::device::discovery::{discover_channels, Channels};
use crate::device::movement::{MovementEvent, MovementHistory, MovementReading, MovementTracker};
use crate::device::pacing::{Pacer, StaleRun};
use crate::device::resolver::PeripheralResolver;
use crate::device::subscription::{Subscription, Ticker};
use crate::device::types::{SessionEvent, SessionState};
use crate::error::{readable_thread_panic_error, DeviceError, SessionError};
use crate::store::gateway::{sample_payload, timestamp, ChannelKind, PersistenceGateway, SessionId};
use crate::store::metrics::MetricsTrigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub user_id: i64,
    pub motion_interval: Duration,
    pub heart_rate_interval: Duration,
}

impl SessionSettings {
    fn validate(&self) -> Result<(), SessionError> {
        if self.motion_interval.is_zero() {
            return Err(SessionError::InvalidInterval { channel: "motion" });
        }
        if self.heart_rate_interval.is_zero() {
            return Err(SessionError::InvalidInterval { channel: "heart rate" });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadSource {
    Notification,
    ScheduledRead,
}

/// State changes and events, delivered without ever blocking the session.
#[derive(Clone)]
struct EventSink {
    state: Arc<watch::Sender<SessionState>>,
    senders: Vec<Sender<SessionEvent>>,
}

impl EventSink {
    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state.send_replace(state) != state {
            info!("Session state: {}", state);
            self.emit(SessionEvent::StateChange(state));
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        for sender in &mut self.senders {
            if let Err(err) = sender.try_send(event.clone()) {
                debug!("Dropped session event: {}", err);
            }
        }
    }
}

/// A freshly connected peripheral with everything armed on it, not yet owned by a session.
struct Link<P> {
    peripheral: P,
    channels: Channels,
    motion_notifications: PayloadStream,
    heart_rate_notifications: PayloadStream,
    disconnects: DisconnectStream,
}

struct LiveLink<P> {
    peripheral: P,
    channels: Channels,
}

async fn establish_link<A: LinkAdapter>(adapter: &A, peripheral: A::Peripheral) -> Result<Link<A::Peripheral>, DeviceError> {
    if !peripheral.is_connected().await? {
        info!("Connecting to peripheral {}...", peripheral.id());
        adapter.connect(&peripheral).await?;
    }

    let channels = discover_channels(&peripheral).await?;
    activate_motion(&peripheral, channels.motion_control.as_ref()).await;

    info!("Subscribing to motion and heart rate notifications");
    let motion_notifications = peripheral.monitor(&channels.motion_data).await?;
    let heart_rate_notifications = peripheral.monitor(&channels.heart_rate_data).await?;
    let disconnects = adapter.disconnects(&peripheral).await?;

    Ok(Link { peripheral, channels, motion_notifications, heart_rate_notifications, disconnects })
}

/// A sample accepted by the session, on its way to the store.
struct PendingSample {
    kind: ChannelKind,
    payload: serde_json::Value,
    captured_at: String,
}

async fn write_samples(
    gateway: Arc<dyn PersistenceGateway>,
    session_id: SessionId,
    mut queue: Receiver<PendingSample>,
    mut events: EventSink,
) {
    while let Some(sample) = queue.next().await {
        let kind = sample.kind;
        let request = gateway.append_sample(session_id, kind, &sample.payload, &sample.captured_at);

        match timeout(STORE_DEADLINE, request).await {
            Ok(Ok(())) => {
                trace!("Stored {} sample for session {}", kind, session_id);
                events.emit(SessionEvent::SampleStored(kind));
            },
            Ok(Err(err)) => warn!("Failed to store {} sample for session {}: {}", kind, session_id, err),
            Err(_) => warn!("Storing {} sample for session {} took longer than {:?}", kind, session_id, STORE_DEADLINE),
        }
    }
    debug!("Session {}: sample writer stopped", session_id);
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Handle to a running collection. Obtained from [`SamplingSession::start`], finalized by
/// [`SamplingSession::stop`].
pub struct SamplingSession {
    session_id: SessionId,
    gateway: Arc<dyn PersistenceGateway>,
    metrics: Arc<dyn MetricsTrigger>,
    events: EventSink,
    state: watch::Receiver<SessionState>,
    movements: MovementHistory,
    running: Option<Running>,
}

impl SamplingSession {
    /// Creates the remote session record, discovers the channels of `peripheral` and starts
    /// sampling. Anything that goes wrong after this returns is handled inside the session.
    ///
    /// A discovery failure leaves the already created session record open.
    pub async fn start<A: LinkAdapter>(
        adapter: Arc<A>,
        gateway: Arc<dyn PersistenceGateway>,
        metrics: Arc<dyn MetricsTrigger>,
        peripheral: A::Peripheral,
        settings: SessionSettings,
        senders: Vec<Sender<SessionEvent>>,
    ) -> Result<SamplingSession, SessionError> {
        settings.validate()?;

        let power = adapter.power_state().await;
        if power != PowerState::On {
            return Err(DeviceError::AdapterUnavailable { state: power }.into());
        }

        let (state_tx, state) = watch::channel(SessionState::Idle);
        let mut events = EventSink { state: Arc::new(state_tx), senders };
        events.set_state(SessionState::Discovering);

        let session_id = match gateway.create_session(settings.user_id, &timestamp(SystemTime::now())).await {
            Ok(session_id) => session_id,
            Err(err) => {
                events.set_state(SessionState::Idle);
                return Err(err.into());
            },
        };
        info!("Started session {} for user {}", session_id, settings.user_id);

        let link = match establish_link(&*adapter, peripheral).await {
            Ok(link) => link,
            Err(err) => {
                warn!("Discovery failed; session {} is left open: {}", session_id, err);
                events.set_state(SessionState::Idle);
                return Err(err.into());
            },
        };

        let (queue, pending) = mpsc::channel(SAMPLE_QUEUE_CAPACITY);
        let writer = spawn(write_samples(gateway.clone(), session_id, pending, events.clone()));

        let movements = MovementHistory::new(MOVEMENT_HISTORY_CAPACITY);
        let mut core = SessionCore::new(adapter, queue, session_id, &settings, movements.clone(), events.clone());
        core.arm(link);
        core.events.set_state(SessionState::Active);

        let cancel = CancellationToken::new();
        let task = spawn(core.run(cancel.clone()));

        Ok(SamplingSession {
            session_id,
            gateway,
            metrics,
            events,
            state,
            movements,
            running: Some(Running { cancel, task, writer }),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn recent_movements(&self) -> Vec<MovementEvent> {
        self.movements.snapshot()
    }

    /// Tears down every timer and subscription, gives queued samples a bounded amount of time to
    /// reach the store, then closes the session record and asks for metrics. Calling it again is a
    /// no-op.
    ///
    /// The metrics request runs detached; its handle is returned for callers that want to give it
    /// a chance to finish before exiting.
    pub async fn stop(&mut self) -> Option<JoinHandle<()>> {
        let running = match self.running.take() {
            Some(running) => running,
            None => {
                debug!("Session {} is already stopped", self.session_id);
                return None;
            },
        };

        self.events.set_state(SessionState::Stopping);
        running.cancel.cancel();

        info!("Waiting for sampling task of session {} to stop", self.session_id);
        if let Err(err) = running.task.await {
            if err.is_panic() {
                error!("Sampling task failed: {}", readable_thread_panic_error(&err.into_panic()));
            } else {
                warn!("Sampling task did not finish: {}", err);
            }
        }

        // the sampling task owned the queue, so the writer ends once it has drained it
        let mut writer = running.writer;
        match timeout(STORE_DEADLINE, &mut writer).await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => warn!("Sample writer did not finish: {}", err),
            Err(_) => {
                warn!("Store did not take the queued samples within {:?}; dropping them", STORE_DEADLINE);
                writer.abort();
            },
        }

        let ended_at = timestamp(SystemTime::now());
        match timeout(STORE_DEADLINE, self.gateway.close_session(self.session_id, &ended_at)).await {
            Ok(Ok(())) => info!("Closed session {} at {}", self.session_id, ended_at),
            Ok(Err(err)) => warn!("Failed to close session {}: {}", self.session_id, err),
            Err(_) => warn!("Closing session {} took longer than {:?}", self.session_id, STORE_DEADLINE),
        }

        let metrics = self.metrics.clone();
        let session_id = self.session_id;
        let metrics_request = spawn(async move {
            if let Err(err) = metrics.request_metrics(session_id).await {
                warn!("Metrics request for session {} failed: {}", session_id, err);
            }
        });

        self.events.set_state(SessionState::Idle);
        Some(metrics_request)
    }
}

impl Drop for SamplingSession {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            warn!("Session {} dropped without stop(); its record stays open", self.session_id);
            running.cancel.cancel();
        }
    }
}

struct SessionCore<A: LinkAdapter> {
    adapter: Arc<A>,
    queue: Sender<PendingSample>,
    session_id: SessionId,
    events: EventSink,

    link: Option<LiveLink<A::Peripheral>>,
    motion_notifications: Subscription<Vec<u8>>,
    heart_rate_notifications: Subscription<Vec<u8>>,
    disconnect_listener: Subscription<()>,
    motion_timer: Ticker,
    heart_rate_timer: Ticker,
    keep_alive_timer: Ticker,

    motion_period: Duration,
    heart_rate_period: Duration,
    motion_pacer: Pacer,
    heart_rate_pacer: Pacer,
    motion_errors: u32,
    heart_rate_errors: u32,
    stale_motion: StaleRun,
    // monotonic over the session, reset only by a successful reconnection
    reconnect_failures: u32,
    movement: MovementTracker,
}

impl<A: LinkAdapter> SessionCore<A> {
    fn new(
        adapter: Arc<A>,
        queue: Sender<PendingSample>,
        session_id: SessionId,
        settings: &SessionSettings,
        movements: MovementHistory,
        events: EventSink,
    ) -> Self {
        SessionCore {
            adapter,
            queue,
            session_id,
            events,
            link: None,
            motion_notifications: Subscription::inactive("motion notification"),
            heart_rate_notifications: Subscription::inactive("heart rate notification"),
            disconnect_listener: Subscription::inactive("disconnect"),
            motion_timer: Ticker::cleared("motion read"),
            heart_rate_timer: Ticker::cleared("heart rate read"),
            keep_alive_timer: Ticker::cleared("keep-alive"),
            motion_period: settings.motion_interval.max(READ_FLOOR),
            heart_rate_period: settings.heart_rate_interval.max(READ_FLOOR),
            motion_pacer: Pacer::new(settings.motion_interval),
            heart_rate_pacer: Pacer::new(settings.heart_rate_interval),
            motion_errors: 0,
            heart_rate_errors: 0,
            stale_motion: StaleRun::default(),
            reconnect_failures: 0,
            movement: MovementTracker::new(MOVEMENT_THRESHOLD, movements),
        }
    }

    async fn run(mut self, cancel: CancellationToken) {
        'mainloop: loop {
            match self.events.current() {
                SessionState::Recovering => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break 'mainloop,
                        _ = self.recover() => {},
                    }
                },
                SessionState::Halted => {
                    cancel.cancelled().await;
                    break 'mainloop;
                },
                _ => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break 'mainloop,
                        Some(()) = self.disconnect_listener.next() => {
                            self.begin_recovery("peripheral disconnected");
                        },
                        Some(payload) = self.motion_notifications.next() => {
                            self.on_motion_payload(payload, PayloadSource::Notification).await;
                        },
                        Some(payload) = self.heart_rate_notifications.next() => {
                            self.on_heart_rate_payload(payload, PayloadSource::Notification);
                        },
                        _ = self.motion_timer.tick() => self.scheduled_read(ChannelKind::Motion).await,
                        _ = self.heart_rate_timer.tick() => self.scheduled_read(ChannelKind::HeartRate).await,
                        _ = self.keep_alive_timer.tick() => self.keep_alive().await,
                    }
                },
            }
        }

        self.teardown().await;
    }

    /// Takes ownership of a new link; the previous one (if any) is replaced as a whole.
    fn arm(&mut self, link: Link<A::Peripheral>) {
        let Link { peripheral, channels, motion_notifications, heart_rate_notifications, disconnects } = link;

        self.motion_notifications.replace(motion_notifications);
        self.heart_rate_notifications.replace(heart_rate_notifications);
        self.disconnect_listener.replace(disconnects);
        self.motion_timer.arm(self.motion_period);
        self.heart_rate_timer.arm(self.heart_rate_period);
        self.keep_alive_timer.arm(KEEP_ALIVE_PERIOD);

        self.motion_errors = 0;
        self.heart_rate_errors = 0;
        self.stale_motion.reset();
        self.link = Some(LiveLink { peripheral, channels });
    }

    fn disarm(&mut self) {
        self.motion_timer.clear();
        self.heart_rate_timer.clear();
        self.keep_alive_timer.clear();
        self.motion_notifications.remove();
        self.heart_rate_notifications.remove();
        self.disconnect_listener.remove();
    }

    fn begin_recovery(&mut self, reason: &str) {
        warn!("Session {}: link lost ({})", self.session_id, reason);
        self.disarm();
        self.link = None;
        self.events.set_state(SessionState::Recovering);
    }

    async fn recover(&mut self) {
        loop {
            if self.reconnect_failures >= MAX_RECONNECT_ATTEMPTS {
                error!(
                    "Session {}: giving up after {} failed reconnection attempts; no more samples until stop()",
                    self.session_id, self.reconnect_failures,
                );
                self.events.set_state(SessionState::Halted);
                return;
            }

            sleep(RECONNECT_BACKOFF).await;
            info!(
                "Session {}: reconnection attempt {}/{}",
                self.session_id, self.reconnect_failures + 1, MAX_RECONNECT_ATTEMPTS,
            );

            let adapter = self.adapter.clone();
            let resolver = PeripheralResolver::new(&*adapter, &TARGET_NAME_FRAGMENTS, SCAN_DURATION);
            let result = match resolver.resolve().await {
                Ok(peripheral) => establish_link(&*adapter, peripheral).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(link) => {
                    info!("Session {}: reconnected to {}", self.session_id, link.peripheral.id());
                    self.reconnect_failures = 0;
                    self.arm(link);
                    self.events.set_state(SessionState::Active);
                    return;
                },
                Err(err) => {
                    self.reconnect_failures += 1;
                    warn!("Session {}: reconnection attempt failed: {}", self.session_id, err);
                },
            }
        }
    }

    async fn teardown(&mut self) {
        self.disarm();

        if let Some(link) = self.link.take() {
            for channel in [&link.channels.motion_data, &link.channels.heart_rate_data] {
                let result = with_deadline(
                    WRITE_DEADLINE,
                    "Unsubscribing from characteristic",
                    link.peripheral.unmonitor(channel),
                ).await;

                if let Err(err) = result {
                    debug!("Failed to unsubscribe from {}: {}", channel.uuid, err);
                }
            }
        }
        debug!("Session {}: sampling task stopped", self.session_id);
    }

    async fn scheduled_read(&mut self, kind: ChannelKind) {
        let (peripheral, channel) = match &self.link {
            Some(link) => {
                let channel = match kind {
                    ChannelKind::Motion => link.channels.motion_data.clone(),
                    ChannelKind::HeartRate => link.channels.heart_rate_data.clone(),
                };
                (link.peripheral.clone(), channel)
            },
            None => return,
        };

        match with_deadline(READ_DEADLINE, "Reading characteristic", peripheral.read(&channel)).await {
            Ok(payload) => {
                *self.read_errors(kind) = 0;
                match kind {
                    ChannelKind::Motion => self.on_motion_payload(payload, PayloadSource::ScheduledRead).await,
                    ChannelKind::HeartRate => self.on_heart_rate_payload(payload, PayloadSource::ScheduledRead),
                }
            },
            Err(err) => self.read_failed(kind, err),
        }
    }

    async fn keep_alive(&mut self) {
        let (peripheral, channel) = match &self.link {
            Some(link) => (link.peripheral.clone(), link.channels.heart_rate_data.clone()),
            None => return,
        };

        match with_deadline(READ_DEADLINE, "Keep-alive read", peripheral.read(&channel)).await {
            Ok(_) => trace!("Session {}: keep-alive ok", self.session_id),
            Err(err) => self.read_failed(ChannelKind::HeartRate, err),
        }
    }

    fn read_errors(&mut self, kind: ChannelKind) -> &mut u32 {
        match kind {
            ChannelKind::Motion => &mut self.motion_errors,
            ChannelKind::HeartRate => &mut self.heart_rate_errors,
        }
    }

    fn read_failed(&mut self, kind: ChannelKind, err: DeviceError) {
        let errors = self.read_errors(kind);
        *errors += 1;
        let count = *errors;

        warn!("Reading {} failed ({}/{}): {}", kind, count, IO_ERROR_THRESHOLD, err);
        if count >= IO_ERROR_THRESHOLD {
            self.begin_recovery("too many consecutive read errors");
        }
    }

    async fn on_motion_payload(&mut self, payload: Vec<u8>, source: PayloadSource) {
        let received = Instant::now();
        let captured_at = SystemTime::now();

        // counted before pacing, so notifications and reads both feed the same run
        let run = self.stale_motion.observe(&payload);
        if run >= STALE_RUN_THRESHOLD {
            warn!("Session {}: {} identical motion payloads ({})", self.session_id, run, to_hex(&payload));
            self.reactivate_motion().await;
            self.begin_recovery("stale motion data");
            return;
        }

        if !self.motion_pacer.accept(received) {
            trace!("Dropped motion payload from {:?}", source);
            return;
        }

        let sample = decode_motion(&payload);
        if !sample.is_valid || sample.is_suspect {
            debug!(
                "Motion payload {} decoded as {:?} (valid: {}, suspect: {})",
                sample.raw_hex, sample.parsing_method(), sample.is_valid, sample.is_suspect,
            );
        }

        let movement = match self.movement.observe(&sample, captured_at) {
            Some((reading, event)) => {
                if let Some(event) = event {
                    self.events.emit(SessionEvent::MovementDetected(event));
                }
                Some(reading)
            },
            None => None,
        };

        self.persist(DecodedSample::Motion(sample), movement, captured_at);
    }

    fn on_heart_rate_payload(&mut self, payload: Vec<u8>, source: PayloadSource) {
        let captured_at = SystemTime::now();

        let sample = match decode_heart_rate(&payload) {
            Ok(sample) => sample,
            Err(rejection) => {
                debug!("Rejected heart rate payload {} from {:?}: {}", to_hex(&payload), source, rejection);
                return;
            },
        };

        if !self.heart_rate_pacer.accept(Instant::now()) {
            trace!("Dropped heart rate payload from {:?}", source);
            return;
        }

        self.persist(DecodedSample::HeartRate(sample), None, captured_at);
    }

    async fn reactivate_motion(&mut self) {
        match &self.link {
            Some(LiveLink { peripheral, channels: Channels { motion_control: Some(control), .. } }) => {
                info!("Session {}: re-activating motion channel", self.session_id);
                activate_motion(peripheral, Some(control)).await;
            },
            Some(_) => debug!("No motion control channel to re-activate"),
            None => {},
        }
    }

    fn persist(&mut self, sample: DecodedSample, movement: Option<MovementReading>, captured_at: SystemTime) {
        let kind = sample.kind();
        let payload = match sample_payload(&sample, movement) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to encode {} sample: {}", kind, err);
                return;
            },
        };

        let pending = PendingSample { kind, payload, captured_at: timestamp(captured_at) };
        if let Err(err) = self.queue.try_send(pending) {
            warn!("Dropped {} sample for session {}: {}", kind, self.session_id, err);
        }
    }
}
