use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use clap::{Args, Parser, Subcommand};
use futures::channel::mpsc;
use futures::{future, StreamExt};
use log::{info, warn};
use tokio::signal;
use tokio::time::{sleep, timeout, Duration};

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::adapter::LinkPeripheral;
use crate::device::btle::BtleAdapter;
use crate::device::constants::{SCAN_DURATION, TARGET_NAME_FRAGMENTS};
use crate::device::resolver::PeripheralResolver;
use crate::device::session::{SamplingSession, SessionSettings};
use crate::device::types::SessionEvent;
use crate::error::{AppRunError, ConfigError, DeviceError, StoreError};
use crate::store::gateway::{ChannelKind, PersistenceGateway, SessionId};
use crate::store::metrics::{DisabledMetrics, HttpMetricsTrigger, MetricsTrigger};
use crate::store::rest::RestGateway;

/** How long `collect` waits for the detached metrics request before exiting */
const METRICS_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Collects motion and heart rate samples from a sleep wristband into a remote store", long_about = None)]
pub struct Cli {
    /// Use this config file instead of the portable or per-user one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the wristband and record a session until Ctrl-C
    Collect(CollectArgs),
    /// Find the wristband and print which peripheral would be used
    Resolve,
    /// Print the stored samples of a session as JSON lines
    Samples {
        #[arg(long)]
        session: SessionId,
    },
    /// Ask the metrics service to recompute one session, or every session with motion samples
    Recompute {
        #[arg(long)]
        session: Option<SessionId>,
    },
    /// Print the effective config
    Config {
        /// Overwrite the config file with the defaults
        #[arg(long)]
        write_default: bool,
    },
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Owner of the new session; defaults to `userId` from the config file
    #[arg(long)]
    pub user_id: Option<i64>,

    /// Seconds between stored motion samples
    #[arg(long)]
    pub motion_interval: Option<f64>,

    /// Seconds between stored heart rate samples
    #[arg(long)]
    pub heart_rate_interval: Option<f64>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration: Option<u64>,
}

fn metrics_trigger(config: &Config) -> Result<Arc<dyn MetricsTrigger>, StoreError> {
    Ok(match &config.metrics_url {
        Some(url) => Arc::new(HttpMetricsTrigger::new(url)?),
        None => Arc::new(DisabledMetrics),
    })
}

pub async fn execute(cli: Cli) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync(cli.config)?;

    match cli.command {
        Command::Collect(args) => collect(&config_io, args).await,
        Command::Resolve => resolve().await,
        Command::Samples { session } => samples(&config_io, session).await,
        Command::Recompute { session } => recompute(&config_io, session).await,
        Command::Config { write_default } => show_config(&config_io, write_default).await,
    }
}

async fn collect(config_io: &ConfigIO, args: CollectArgs) -> Result<(), AppRunError> {
    // only one collecting instance per config file
    let mut locker = config_io.locker()?;
    let _guard = locker.lock()?;

    let mut config = config_io.read().await?;
    if let Some(secs) = args.motion_interval {
        config.motion_interval_secs = secs;
    }
    if let Some(secs) = args.heart_rate_interval {
        config.heart_rate_interval_secs = secs;
    }
    let (motion_interval, heart_rate_interval) = config.sampling_intervals()?;
    let user_id = args.user_id.or(config.user_id).ok_or(AppRunError::MissingUserId)?;

    let adapter = Arc::new(BtleAdapter::new().await?);
    let peripheral = PeripheralResolver::new(&*adapter, &TARGET_NAME_FRAGMENTS, SCAN_DURATION).resolve().await?;

    let gateway: Arc<dyn PersistenceGateway> = Arc::new(RestGateway::new(&config.store_url, &config.store_api_key)?);
    let metrics = metrics_trigger(&config)?;
    let (sender, mut events) = mpsc::channel(64);
    let settings = SessionSettings { user_id, motion_interval, heart_rate_interval };

    let mut session = SamplingSession::start(
        adapter,
        gateway,
        metrics,
        peripheral,
        settings,
        vec![sender],
    ).await?;
    info!("Collecting session {}; press Ctrl-C to stop", session.session_id());

    let deadline = async {
        match args.duration {
            Some(secs) => sleep(Duration::from_secs(secs)).await,
            None => future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut stored: HashMap<ChannelKind, u64> = HashMap::new();
    'mainloop: loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                break 'mainloop;
            },
            _ = &mut deadline => {
                info!("Collection time is up");
                break 'mainloop;
            },
            Some(event) = events.next() => match event {
                SessionEvent::SampleStored(kind) => *stored.entry(kind).or_default() += 1,
                SessionEvent::MovementDetected(movement) => info!(
                    "Movement on {:?} axis (magnitude {:.1})", movement.dominant_axis, movement.magnitude,
                ),
                SessionEvent::StateChange(_) => {},
            },
        }
    }

    if let Some(metrics_request) = session.stop().await {
        if timeout(METRICS_GRACE, metrics_request).await.is_err() {
            warn!("Metrics request did not finish within {:?}", METRICS_GRACE);
        }
    }

    println!(
        "session {}: {} motion samples, {} heart rate samples",
        session.session_id(),
        stored.get(&ChannelKind::Motion).copied().unwrap_or(0),
        stored.get(&ChannelKind::HeartRate).copied().unwrap_or(0),
    );
    Ok(())
}

async fn resolve() -> Result<(), AppRunError> {
    let adapter = BtleAdapter::new().await?;

    match PeripheralResolver::new(&adapter, &TARGET_NAME_FRAGMENTS, SCAN_DURATION).resolve().await {
        Ok(peripheral) => {
            let name = peripheral.display_name().await.unwrap_or(String::from("NONE"));
            println!("{} {}", peripheral.id(), name);
            Ok(())
        },
        Err(DeviceError::PeripheralNotFound) | Err(DeviceError::AdapterUnavailable { .. }) => {
            println!("not found");
            Ok(())
        },
        Err(err) => Err(err.into()),
    }
}

async fn samples(config_io: &ConfigIO, session_id: SessionId) -> Result<(), AppRunError> {
    let config = config_io.read().await?;
    let gateway = RestGateway::new(&config.store_url, &config.store_api_key)?;

    for row in gateway.samples(session_id).await? {
        println!("{}", serde_json::to_string(&row).map_err(StoreError::from)?);
    }
    Ok(())
}

async fn recompute(config_io: &ConfigIO, session: Option<SessionId>) -> Result<(), AppRunError> {
    let config = config_io.read().await?;
    let metrics = metrics_trigger(&config)?;

    let sessions = match session {
        Some(session_id) => vec![session_id],
        None => {
            let gateway = RestGateway::new(&config.store_url, &config.store_api_key)?;
            gateway.sessions_with(ChannelKind::Motion).await?
        },
    };
    info!("Recomputing metrics for {} session(s)", sessions.len());

    let mut failed = 0;
    for session_id in &sessions {
        if let Err(err) = metrics.request_metrics(*session_id).await {
            warn!("Metrics request for session {} failed: {}", session_id, err);
            failed += 1;
        }
    }

    println!("{} of {} session(s) recomputed", sessions.len() - failed, sessions.len());
    Ok(())
}

async fn show_config(config_io: &ConfigIO, write_default: bool) -> Result<(), AppRunError> {
    let config = if write_default {
        let config = Config::default();
        config_io.save(&config).await?;
        config
    } else {
        config_io.read().await?
    };

    println!("# {}", config_io.path().to_string_lossy());
    println!("{}", serde_json::to_string_pretty(&config).map_err(ConfigError::from)?);
    Ok(())
}
