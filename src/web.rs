#![cfg(not(tarpaulin_include))]

use structopt::StructOpt;
use unit_registry::{app, config::Config, logger::init_logger};

/// Main entry point for the registry web server
///
/// Reads the configuration from the command line and the environment, installs the
/// logger and serves the application until the process is stopped.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_args();
    init_logger(config.log_level)?;

    app::run(config).await
}
