use std::env;
use log::LevelFilter;
use crate::app::run_application;
use crate::cli::Cli;
use crate::error::AppRunError;

pub mod app;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;

pub fn init_logging(level: LevelFilter) {
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
        .level(LevelFilter::Warn)
        .level_for("cometblue", level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

pub async fn run(cli: Cli) -> Result<(), AppRunError> {
    run_application(cli).await
}
