mod args;

use args::process_cli_args;
use p2p_bridge::{logging::init_logging, BridgeProxy};
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match process_cli_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(config.log_dir()) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match BridgeProxy::new(config).start().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Bridge stopped: {e}");
            ExitCode::FAILURE
        }
    }
}
