// logs.rs
use pmoconfig::get_config;

use std::sync::{Arc, RwLock};

use tracing::Level;
use tracing_subscriber::{
    Registry, filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Handle on the installed subscriber
///
/// Cloning is cheap; every clone drives the same reloadable filter.
#[derive(Clone)]
pub struct LogState {
    max_level: Arc<RwLock<Level>>,
    reload_handle: Arc<reload::Handle<LevelFilter, Registry>>,
}

impl LogState {
    pub fn new(level: Level, reload_handle: reload::Handle<LevelFilter, Registry>) -> Self {
        Self {
            max_level: Arc::new(RwLock::new(level)),
            reload_handle: Arc::new(reload_handle),
        }
    }

    /// Changes the active level without reinstalling the subscriber
    pub fn set_max_level(&self, level: Level) {
        match self.max_level.write() {
            Ok(mut guard) => *guard = level,
            Err(poisoned) => *poisoned.into_inner() = level,
        }

        if let Err(e) = self.reload_handle.reload(level_to_levelfilter(level)) {
            eprintln!("Failed to reload log level filter: {}", e);
        }
    }

    pub fn get_max_level(&self) -> Level {
        match self.max_level.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Logging initialization options
///
/// `None` fields fall back to the `host.logger` section of the configuration.
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Overrides `host.logger.min_level`
    pub min_level: Option<Level>,
    /// Overrides `host.logger.enable_console`
    pub enable_console: Option<bool>,
}

impl LoggingOptions {
    /// Options derived from the `--verbose` / `--quiet` flags
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        let min_level = if verbose {
            Some(Level::DEBUG)
        } else if quiet {
            Some(Level::ERROR)
        } else {
            None
        };
        Self {
            min_level,
            enable_console: None,
        }
    }
}

/// Installs the global tracing subscriber
///
/// The filter is placed first so that it applies to every layer after it.
/// Must be called once per process.
///
/// # Example
/// ```rust,no_run
/// use pmoserver::logs::{init_logging, LoggingOptions};
///
/// let log_state = init_logging(LoggingOptions::from_flags(true, false));
/// ```
pub fn init_logging(options: LoggingOptions) -> LogState {
    let config = get_config();

    let level = options.min_level.unwrap_or_else(|| {
        config
            .get_log_min_level()
            .ok()
            .and_then(|l| string_to_level(&l))
            .unwrap_or(Level::WARN)
    });

    let (filter, reload_handle) = reload::Layer::new(level_to_levelfilter(level));
    let log_state = LogState::new(level, reload_handle);

    let enable_console = options
        .enable_console
        .unwrap_or_else(|| config.get_log_enable_console().unwrap_or(true));

    let subscriber = Registry::default().with(filter);
    if enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    } else {
        subscriber.init();
    }

    log_state
}

pub fn string_to_level(s: &str) -> Option<Level> {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

fn level_to_levelfilter(level: Level) -> LevelFilter {
    match level {
        Level::ERROR => LevelFilter::ERROR,
        Level::WARN => LevelFilter::WARN,
        Level::INFO => LevelFilter::INFO,
        Level::DEBUG => LevelFilter::DEBUG,
        Level::TRACE => LevelFilter::TRACE,
    }
}
