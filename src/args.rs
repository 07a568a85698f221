//! Command-line arguments of the bridge binary.
use clap::Parser;
use ext_config::{Config, File, FileFormat};
use p2p_bridge::{
    config::BridgeConfig,
    error::{BridgeError, BridgeResult},
};
use std::path::PathBuf;
use tracing::error;

#[derive(Parser, Debug)]
#[command(author, version, about = "P2P dialect bridge", long_about = None)]
pub struct Args {
    #[arg(
        short = 'c',
        long = "config",
        help = "Path to the TOML configuration file",
        default_value = "bridge-config.toml"
    )]
    pub config_path: PathBuf,
    #[arg(
        short = 'f',
        long = "log-file",
        help = "Path to the log file. If not set, logs will only be written to stdout."
    )]
    pub log_file: Option<PathBuf>,
}

/// Parses the CLI and loads the configuration file it points to.
pub fn process_cli_args() -> BridgeResult<BridgeConfig> {
    let args = Args::parse();

    let config_path = args.config_path.to_str().ok_or_else(|| {
        error!("Invalid configuration path.");
        BridgeError::BadCliArgs
    })?;

    let settings = Config::builder()
        .add_source(File::new(config_path, FileFormat::Toml))
        .build()?;

    let mut config = settings.try_deserialize::<BridgeConfig>()?;
    config.set_log_dir(args.log_file);
    Ok(config)
}
