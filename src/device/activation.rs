use std::future::Future;
use log::{debug, info};
use tokio::time::{sleep, Duration};

use crate::device::adapter::{Channel, LinkPeripheral, WriteMode};
use crate::device::constants::{ACTIVATION_SETTLE_DELAY, WRITE_DEADLINE};
use crate::error::DeviceError;

/**
 * Written first, before the sweep.
 */
pub const RESET_COMMAND: [u8; 1] = [0x00];

/**
 * Candidate "start streaming" commands for the motion control channel. Nothing confirms which
 * of them the sensor understands, so each is tried with both write semantics and failures are
 * ignored.
 */
pub const ACTIVATION_SWEEP: [(&[u8], WriteMode); 12] = [
    (&[0x01], WriteMode::WithResponse),
    (&[0x01], WriteMode::WithoutResponse),
    (&[0x02], WriteMode::WithResponse),
    (&[0x02], WriteMode::WithoutResponse),
    (&[0x03], WriteMode::WithResponse),
    (&[0x03], WriteMode::WithoutResponse),
    (&[0x01, 0x00], WriteMode::WithResponse),
    (&[0x01, 0x00], WriteMode::WithoutResponse),
    (&[0x01, 0x01], WriteMode::WithResponse),
    (&[0x01, 0x01], WriteMode::WithoutResponse),
    (&[0x0A, 0x01], WriteMode::WithResponse),
    (&[0x0A, 0x01], WriteMode::WithoutResponse),
];

/// Number of writes a single activation attempts.
pub const ACTIVATION_WRITE_COUNT: usize = ACTIVATION_SWEEP.len() + 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub attempted: usize,
    pub accepted: usize,
}

/// Best-effort; never fails. Without a control channel this is a no-op.
pub async fn activate_motion<P: LinkPeripheral>(peripheral: &P, control: Option<&Channel>) -> ActivationReport {
    let mut report = ActivationReport::default();

    let control = match control {
        Some(control) => control,
        None => return report,
    };

    let reset: &[u8] = &RESET_COMMAND;
    let sweep: &[(&[u8], WriteMode)] = &ACTIVATION_SWEEP;
    let writes = std::iter::once((reset, WriteMode::WithResponse)).chain(sweep.iter().copied());

    for (command, mode) in writes {
        report.attempted += 1;
        let result = with_deadline(
            WRITE_DEADLINE,
            "Writing to motion control characteristic",
            peripheral.write(control, command, mode),
        ).await;

        match result {
            Ok(()) => report.accepted += 1,
            Err(err) => debug!("Activation write {:02x?} ({:?}) failed: {}", command, mode, err),
        }
    }

    sleep(ACTIVATION_SETTLE_DELAY).await;
    info!("Motion activation sweep: {}/{} writes accepted", report.accepted, report.attempted);
    report
}

pub async fn with_deadline<T, F>(deadline: Duration, operation: &'static str, fut: F) -> Result<T, DeviceError>
where
    F: Future<Output = Result<T, DeviceError>>,
{
    tokio::select! {
        _ = sleep(deadline) => Err(DeviceError::Deadline { operation }),
        result = fut => result,
    }
}
