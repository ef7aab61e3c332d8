//! File-based logging with per-component log files.
//!
//! Every component writes to its own daily rotated file next to the root file:
//!
//! | Log File          | Component                          | Target Prefixes      |
//! |-------------------|------------------------------------|----------------------|
//! | iotbox.log        | Root logger (all components)       | (all)                |
//! | acquisition.log   | Master polling and value bridge    | iotbox_master        |
//! | iodd.log          | IODD parsing and collection        | iotbox_iodd          |
//! | console.log       | Dashboard API and request log      | iotbox_console       |
//! | persistence.log   | Database persistence               | iotbox_persistence   |
//!
//! Log files are stored in `~/iotbox/logs` by default.
//! Override with `IOTBOX_LOG_DIR` or the `logs.path` config key.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub const ROOT_LOG_FILE: &str = "iotbox.log";

struct ComponentLogDef {
    file_name: &'static str,
    /// Target module prefixes routed to this file
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "acquisition.log",
        targets: &["iotbox_master"],
    },
    ComponentLogDef {
        file_name: "iodd.log",
        targets: &["iotbox_iodd"],
    },
    ComponentLogDef {
        file_name: "console.log",
        targets: &["iotbox_console", "actix_web::middleware::logger"],
    },
    ComponentLogDef {
        file_name: "persistence.log",
        targets: &["iotbox_persistence", "sqlx", "sea_orm"],
    },
];

/// Log rotation policy
#[derive(Debug, Clone, Copy)]
pub enum LogRotation {
    Daily,
    Hourly,
    /// Single file
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

fn default_log_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("IOTBOX_LOG_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{}/iotbox/logs", home))
}

/// Logging configuration for the entire application.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub console_level: Level,
    pub file_logging: bool,
    pub file_level: Level,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            console_level: Level::INFO,
            file_logging: true,
            file_level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    pub fn from_config(
        log_dir: Option<String>,
        console_output: bool,
        file_logging: bool,
        level: String,
    ) -> Self {
        let log_dir = log_dir.map(PathBuf::from).unwrap_or_else(default_log_dir);
        let level = level.parse().unwrap_or(Level::INFO);

        Self {
            log_dir,
            console_output,
            console_level: level,
            file_logging,
            file_level: level,
            rotation: LogRotation::Daily,
        }
    }
}

/// Keeps the non-blocking file writers alive. Dropping it flushes buffered output.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

/// Initialize console output, the root log file and the component log files.
///
/// `RUST_LOG` overrides the configured level of the console and the root file.
/// Component files capture everything emitted by their targets.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, Box<dyn std::error::Error>> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_appender =
            RollingFileAppender::new(config.rotation.into(), &config.log_dir, ROOT_LOG_FILE);
        let (root_nb, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);

        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        let root_layer = fmt::layer()
            .with_writer(root_nb)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_filter(root_filter);
        layers.push(Box::new(root_layer));

        for component in COMPONENT_LOGS {
            let appender = RollingFileAppender::new(
                config.rotation.into(),
                &config.log_dir,
                component.file_name,
            );
            let (nb, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let mut targets = Targets::new();
            for target in component.targets {
                targets = targets.with_target(*target, LevelFilter::TRACE);
            }

            let layer = fmt::layer()
                .with_writer(nb)
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_filter(targets);
            layers.push(Box::new(layer));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            "File logging initialized: {} (root) + {} component log files",
            ROOT_LOG_FILE,
            COMPONENT_LOGS.len()
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_from_config() {
        let config = LoggingConfig::from_config(
            Some("/tmp/iotbox-logs".to_string()),
            false,
            true,
            "debug".to_string(),
        );
        assert_eq!(config.log_dir, PathBuf::from("/tmp/iotbox-logs"));
        assert!(!config.console_output);
        assert!(config.file_logging);
        assert_eq!(config.file_level, Level::DEBUG);

        let config = LoggingConfig::from_config(None, true, false, "loud".to_string());
        assert_eq!(config.console_level, Level::INFO);
    }

    #[test]
    fn test_log_rotation_conversion() {
        assert!(matches!(Rotation::from(LogRotation::Daily), Rotation::DAILY));
        assert!(matches!(Rotation::from(LogRotation::Hourly), Rotation::HOURLY));
        assert!(matches!(Rotation::from(LogRotation::Never), Rotation::NEVER));
    }

    #[test]
    fn test_component_log_definitions() {
        for component in COMPONENT_LOGS {
            assert!(component.file_name.ends_with(".log"));
            assert_ne!(component.file_name, ROOT_LOG_FILE);
            assert!(!component.targets.is_empty());
        }
        assert_eq!(COMPONENT_LOGS.len(), 4);
    }
}
