use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::utils::error::AppResult;

/// Initialize the logger with custom formatting.
///
/// When `log_file` is given, records are appended to it (its parent directory is
/// created if missing) instead of going to stderr.
pub fn init_logger(level: LevelFilter, log_file: Option<&Path>) -> AppResult<()> {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level);

    if let Some(path) = log_file {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    // A second init (tests, embedding) keeps the first logger
    let _ = builder.try_init();
    Ok(())
}

/// Get log level from string
pub fn get_log_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}
