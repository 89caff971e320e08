use clap::Parser;
use log::{error, info};
use cometblue::cli::Cli;
use cometblue::{init_logging, run};
use cometblue::error::{AppRunError, ConfigError};

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    let cli = Cli::parse();
    init_logging(cli.log_level());
    info!(concat!("CometBlue ", env!("CARGO_PKG_VERSION")));

    match run(cli).await {
        Err(err @ AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("Another instance is already using this config file");
            Err(err)
        },
        Err(err) => {
            error!("{}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
