use log::LevelFilter;

/// Initializes `env_logger`.
///
/// `RUST_LOG` is read first, `level` then overrides the default filter so
/// `--log-level` wins. Noisy dependencies are capped at `info`.
///
/// # Errors
/// * `log::SetLoggerError` if a logger was already installed
pub fn init_logger(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    builder.filter_module("hyper", LevelFilter::Info);
    builder.filter_module("lettre", LevelFilter::Info);
    builder.format_timestamp_secs();
    builder.try_init()
}
