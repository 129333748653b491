use clap::Parser;
use log::{error, info};
use sleepband::cli::Cli;
use sleepband::error::{AppRunError, ConfigError};
use sleepband::{init_logging, run};

fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("sleepband ", env!("CARGO_PKG_VERSION")));

    let cli = Cli::parse();

    match run(cli) {
        Err(err @ AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("Another sleepband instance is already collecting with this config file");
            Err(err)
        },
        Err(err) => {
            error!("{}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
