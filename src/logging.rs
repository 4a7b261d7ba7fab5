/// Structured logging for the surveillance models
///
/// Provides context-rich logging with component and site identifiers,
/// timestamps, and severity levels. Supports both console output and
/// file-based logging for batch runs. The logger is installed behind the
/// `log` facade, so library code logs with `log::info!(target: "SITE", ...)`
/// and the target selects the component tag.

use crate::model::ModelError;
use chrono::Utc;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Dataset,
    Site,
    Spline,
    Aggregate,
    Config,
}

impl Component {
    /// Log target used by this component.
    pub fn target(self) -> &'static str {
        match self {
            Component::Dataset => "DATA",
            Component::Site => "SITE",
            Component::Spline => "SPLINE",
            Component::Aggregate => "AGG",
            Component::Config => "CFG",
        }
    }

    fn from_target(target: &str) -> Option<Self> {
        match target {
            "DATA" => Some(Component::Dataset),
            "SITE" => Some(Component::Site),
            "SPLINE" => Some(Component::Spline),
            "AGG" => Some(Component::Aggregate),
            "CFG" => Some(Component::Config),
            _ => None,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target())
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// The series itself is too thin or malformed to model
    DataQuality,
    /// Bad arguments or configuration, or the solver rejected the fit
    Unexpected,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::DataQuality => write!(f, "DATA QUALITY"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
        }
    }
}

/// Classify a model error by its stage-level kind
pub fn classify_failure(err: &ModelError) -> FailureType {
    match err.kind() {
        ModelError::InsufficientData { .. }
        | ModelError::DegenerateSeries { .. }
        | ModelError::InvalidDomain { .. } => FailureType::DataQuality,
        _ => FailureType::Unexpected,
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

pub struct Logger {
    /// Minimum level to emit
    min_level: LevelFilter,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    pub fn new(min_level: LevelFilter, log_file: Option<String>, console_timestamps: bool) -> Self {
        Self {
            min_level,
            log_file,
            console_timestamps,
        }
    }

    /// Render one log line as written to the log file
    fn format_entry(&self, record: &Record) -> String {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        format!(
            "{} {} {}: {}",
            timestamp,
            level_label(record.level()),
            component_label(record.target()),
            record.args()
        )
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.min_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let entry = self.format_entry(record);
        let source = component_label(record.target());

        // Console output
        if self.console_timestamps {
            match record.level() {
                Level::Error | Level::Warn => eprintln!("{}", entry),
                _ => println!("   {}", entry),
            }
        } else {
            match record.level() {
                Level::Error => eprintln!("   ✗ {}: {}", source, record.args()),
                Level::Warn => eprintln!("   ⚠ {}: {}", source, record.args()),
                Level::Info => println!("   {}", record.args()),
                Level::Debug | Level::Trace => {} // Skip debug in non-timestamp mode
            }
        }

        // File output
        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn flush(&self) {}
}

fn level_label(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug | Level::Trace => "DEBUG",
    }
}

fn component_label(target: &str) -> String {
    Component::from_target(target)
        .map(|c| c.to_string())
        .unwrap_or_else(|| target.to_string())
}

/// Parse a level name as written in configuration files
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Install the global logger. Only the first call takes effect; later calls
/// return `false`.
pub fn init_logger(min_level: LevelFilter, log_file: Option<&str>, console_timestamps: bool) -> bool {
    let logger = Logger::new(min_level, log_file.map(String::from), console_timestamps);
    match log::set_boxed_logger(Box::new(logger)) {
        Ok(()) => {
            log::set_max_level(min_level);
            true
        }
        Err(_) => false,
    }
}

/// Log a failed series build with automatic classification
pub fn log_series_failure(site_id: &str, operation: &str, err: &ModelError) {
    let failure_type = classify_failure(err);
    let message = format!("[{}] {} failed [{}]: {}", site_id, operation, failure_type, err);

    match failure_type {
        FailureType::DataQuality => log::warn!(target: Component::Site.target(), "{}", message),
        FailureType::Unexpected => log::error!(target: Component::Site.target(), "{}", message),
    }
}

/// Log a summary of an aggregate run
pub fn log_aggregate_summary(sites: usize, dates: usize, empty_dates: usize) {
    let message = format!(
        "Aggregate complete: {} sites over {} dates, {} dates with no site data",
        sites, dates, empty_dates
    );

    if empty_dates == 0 {
        log::info!(target: Component::Aggregate.target(), "{}", message);
    } else if empty_dates == dates {
        log::error!(target: Component::Aggregate.target(), "{}", message);
    } else {
        log::warn!(target: Component::Aggregate.target(), "{}", message);
    }
}
