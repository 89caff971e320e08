use std::path::PathBuf;
use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;

/// Read and control CometBlue radiator thermostats over Bluetooth LE
#[derive(Parser, Debug)]
#[command(name = "cometblue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the config file, instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log more; repeat for trace output
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Keep every configured thermostat connected and log its readings
    Monitor {
        /// Time between readings
        #[arg(long, default_value = "1m")]
        interval: humantime::Duration,
    },
    /// Print the device information and temperatures of a thermostat
    Get {
        /// Thermostat to use, defaults to the first one in the config file
        #[arg(long)]
        name: Option<String>,

        /// How long to wait for the thermostat to become ready
        #[arg(long, default_value = "30s")]
        wait: humantime::Duration,
    },
    /// Set the target temperature of a thermostat
    Set {
        /// Thermostat to use, defaults to the first one in the config file
        #[arg(long)]
        name: Option<String>,

        /// How long to wait for the thermostat to become ready
        #[arg(long, default_value = "30s")]
        wait: humantime::Duration,

        /// Target temperature in °C
        #[arg(allow_negative_numbers = true)]
        temperature: f32,
    },
}
