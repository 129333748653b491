use std::env;
use std::str::FromStr;
use crate::cli::{execute, Cli};
use crate::error::AppRunError;

pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod store;

fn log_level() -> log::LevelFilter {
    match env::var("SLEEPBAND_LOG") {
        Ok(level) => log::LevelFilter::from_str(&level).unwrap_or_else(|_| {
            eprintln!("Invalid SLEEPBAND_LOG level {:?}; using info", level);
            log::LevelFilter::Info
        }),
        Err(_) => log::LevelFilter::Info,
    }
}

pub fn init_logging() {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level())
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

pub fn run(cli: Cli) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(execute(cli))
}
