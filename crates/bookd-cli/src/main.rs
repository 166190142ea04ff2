use bookd_core::logging;

mod cli_args;
mod commands;
mod http_client;
mod sources;

use crate::cli_args::CliCommand;

#[tokio::main]
async fn main() {
    // Initialize logging as early as possible.
    logging::init_logging().expect("failed to initialize logging");

    // Parse CLI and dispatch.
    if let Err(err) = CliCommand::run_from_args().await {
        eprintln!("bookd error: {:#}", err);
        std::process::exit(1);
    }
}
