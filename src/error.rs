use std::any::Any;
use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use uuid::Uuid;
use btleplug;
use serde_json;

use crate::device::adapter::PowerState;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("Sampling interval {name} must be a positive number of seconds")]
    InvalidInterval { name: &'static str },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("Bluetooth adapter is not available (state: {state:?})")]
    AdapterUnavailable { state: PowerState },

    #[error("No matching peripheral was found")]
    PeripheralNotFound,

    #[error("A required bluetooth service is not available: {uuid}")]
    MissingService { uuid: Uuid },

    #[error("A required bluetooth characteristic is not available: {uuid}")]
    MissingCharacteristic { uuid: Uuid },

    #[error("{operation} took too long")]
    Deadline { operation: &'static str },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Error communicating with remote store (reqwest): {source}")]
    Http { #[from] source: reqwest::Error },

    #[error("Remote store responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to encode/decode store payload: {source}")]
    Json { #[from] source: serde_json::Error },

    #[error("Remote store returned no rows")]
    EmptyResponse,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to start sampling session (device): {source}")]
    Device { #[from] source: DeviceError },

    #[error("Failed to start sampling session (store): {source}")]
    Store { #[from] source: StoreError },

    #[error("Sampling interval for {channel} must be greater than zero")]
    InvalidInterval { channel: &'static str },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (runtime): {source}")]
    Runtime { #[from] source: io::Error },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Device error: {source}")]
    Device { #[from] source: DeviceError },

    #[error("Session error: {source}")]
    Session { #[from] source: SessionError },

    #[error("Store error: {source}")]
    Store { #[from] source: StoreError },

    #[error("No user id given (use --user-id or set userId in the config file)")]
    MissingUserId,
}

pub fn readable_thread_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }
    let type_id = (**error).type_id();

    format!("panic from thread: [{:?}]: [{}]", type_id, stringified)
}
