//! Generic logger utility functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::{ColoredString, Colorize};
use fern;
use log::{self, info};

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, thiserror::Error)]
pub enum LoggerInitError {
    #[error("Could not open the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("Could not apply the logger: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// Every line carries the elapsed session time and a level tag, with the
/// record target appended for the verbose levels only, and is written to
/// both stdout and the session's log file.
///
/// # Safety
///
/// - This function must only be called once to prevent corrupting logs.
pub fn logger_init(
    min_level: LevelFilter,
    session: &session::Session,
) -> Result<(), LoggerInitError> {
    let log_file =
        fern::log_file(&session.log_file_path).map_err(LoggerInitError::LogFileInitError)?;

    fern::Dispatch::new()
        .format(|out, message, record| {
            // The target only earns its keep on the verbose levels
            let target = if record.level() >= log::Level::Debug {
                format!(" ({})", record.target())
            } else {
                String::new()
            };

            out.finish(format_args!(
                "{:9.3}s {}{} {}",
                session::get_elapsed_seconds(),
                level_tag(record.level()),
                target,
                message
            ))
        })
        .level(min_level)
        .chain(std::io::stdout())
        .chain(log_file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    info!("    Session epoch: {}", session::get_epoch());
    info!("    Log level: {:?}", min_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Colour a fixed-width word tag for the level.
fn level_tag(level: log::Level) -> ColoredString {
    let word = match level {
        log::Level::Trace => "trace",
        log::Level::Debug => "debug",
        log::Level::Info => "info ",
        log::Level::Warn => "warn ",
        log::Level::Error => "error",
    };

    match level {
        log::Level::Trace | log::Level::Debug => word.dimmed(),
        log::Level::Info => word.green(),
        log::Level::Warn => word.yellow(),
        log::Level::Error => word.red().bold(),
    }
}
