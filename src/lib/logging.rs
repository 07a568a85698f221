use std::{fs::OpenOptions, io, path::Path, str::FromStr, sync::Mutex};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, EnvFilter, Registry,
};

/// Installs the global tracing subscriber.
///
/// The level comes from `RUST_LOG` and defaults to `info`. Logs always go to stdout and, when
/// `log_file` is set, are also appended to that file.
pub fn init_logging(log_file: Option<&Path>) -> io::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_level_filter = LevelFilter::from_str(&rust_log).unwrap_or(LevelFilter::INFO);
    let env_filter = EnvFilter::new(log_level_filter.to_string());

    let stdout_layer = fmt::layer().with_writer(io::stdout);
    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let file_layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            Box::new(
                Registry::default()
                    .with(env_filter)
                    .with(stdout_layer)
                    .with(file_layer),
            )
        }
        None => Box::new(Registry::default().with(env_filter).with(stdout_layer)),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(io::Error::other)
}
