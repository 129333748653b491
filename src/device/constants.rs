use std::time::Duration;
use uuid::Uuid;

/**
 * Case-insensitive fragments of the display name advertised by supported wristbands
 * (InfiniTime firmware).
 */
pub const TARGET_NAME_FRAGMENTS: [&str; 3] = ["infinitime", "pinetime", "sleepband"];

/**
 * How long an active scan runs when no matching peripheral is already connected.
 */
pub const SCAN_DURATION: Duration = Duration::from_secs(5);

/**
 * Scheduled reads never run more often than this, regardless of the configured interval.
 */
pub const READ_FLOOR: Duration = Duration::from_millis(200);

/**
 * How often the heart rate characteristic is read purely to detect a silently dead link.
 */
pub const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(30);

/**
 * How long a read from a characteristic may take.
 */
pub const READ_DEADLINE: Duration = Duration::from_millis(2000);

/**
 * How long a write to (or unsubscribe from) a characteristic may take.
 */
pub const WRITE_DEADLINE: Duration = Duration::from_millis(2000);

/**
 * Pause after the activation sweep so the sensor can start producing data.
 */
pub const ACTIVATION_SETTLE_DELAY: Duration = Duration::from_millis(500);

/**
 * Consecutive failed scheduled reads on one channel before the link is considered lost.
 */
pub const IO_ERROR_THRESHOLD: u32 = 3;

/**
 * Identical motion payloads in a row before the motion data is considered stale.
 */
pub const STALE_RUN_THRESHOLD: u32 = 5;

/**
 * Failed reconnection attempts before the session stops trying. Reset on any success.
 */
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/**
 * Delay before every reconnection attempt.
 */
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/**
 * Change in acceleration magnitude (raw sensor units) that counts as a movement.
 */
pub const MOVEMENT_THRESHOLD: f64 = 8.0;

/**
 * Number of movement events retained per session.
 */
pub const MOVEMENT_HISTORY_CAPACITY: usize = 32;

/**
 * How long a single request to the remote store may take.
 */
pub const STORE_DEADLINE: Duration = Duration::from_secs(10);

/**
 * Accepted samples waiting to be written to the store. Newer samples are dropped while it is full.
 */
pub const SAMPLE_QUEUE_CAPACITY: usize = 256;

/// InfiniTime motion service
pub const MOTION_SERVICE: Uuid = Uuid::from_u128(0x00030000_78fc_48fe_8e23_433b3a1942d0);
/// Raw accelerometer values, readable and notifiable
pub const MOTION_DATA_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00030002_78fc_48fe_8e23_433b3a1942d0);
// Known motion control characteristics. The control channel is discovered heuristically;
// these only decide which writable sibling is preferred.
pub const MOTION_CONTROL_CANDIDATES: [Uuid; 3] = [
    Uuid::from_u128(0x0000fff2_0000_1000_8000_00805f9b34fb),
    Uuid::from_u128(0x0000fff3_0000_1000_8000_00805f9b34fb),
    Uuid::from_u128(0x0000fff5_0000_1000_8000_00805f9b34fb),
];

/// Standard heart rate service
pub const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
/// Standard heart rate measurement characteristic
pub const HEART_RATE_MEASUREMENT_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/**
 * Suffixes of the short (first group) identifier that mark a preferred motion control channel.
 */
pub const MOTION_CONTROL_SUFFIXES: [&str; 3] = ["fff2", "fff3", "fff5"];

/**
 * 4 byte motion payloads that a stuck accelerometer keeps sending.
 */
pub const STUCK_SENSOR_SIGNATURES: [[u8; 4]; 3] = [
    [0x00, 0x00, 0x00, 0x00],
    [0xFF, 0xFF, 0xFF, 0xFF],
    [0x80, 0x80, 0x80, 0x80],
];

/// Inclusive range of plausible heart rate values
pub const HEART_RATE_MIN_BPM: u16 = 1;
pub const HEART_RATE_MAX_BPM: u16 = 249;
