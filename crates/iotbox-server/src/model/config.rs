//! Configuration management for the IoT Box server
//!
//! Values come from `conf/application.yml`, then `IOTBOX`-prefixed environment
//! variables, then command line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment};

use iotbox_common::{IotBoxError, MasterKind, PORT_COUNT, PortId, UNIT_DEFINITIONS_FILE};
use iotbox_console::Settings;
use iotbox_master::BridgeMapping;
use iotbox_persistence::DbPoolOptions;

use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_MASTER_URL: &str = "opc.tcp://192.168.1.250:4840";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://dashboard.db?mode=rwc";
pub const DEFAULT_COLLECTION_DIR: &str = "iodd/collection";

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "iotbox-server", version, about)]
struct Cli {
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,
    #[arg(long = "master-url")]
    master_url: Option<String>,
    #[arg(long = "db-url", env = "DATABASE_URL")]
    database_url: Option<String>,
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    #[arg(long = "collection-dir")]
    collection_dir: Option<String>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new() -> anyhow::Result<Self> {
        let args = Cli::parse();
        let mut config_builder = Config::builder()
            .add_source(config::File::with_name(&args.config_file).required(false))
            .add_source(
                Environment::with_prefix("iotbox")
                    .separator(".")
                    .try_parsing(true),
            );

        if let Some(v) = args.master_url {
            config_builder = config_builder.set_override("master.url", v)?;
        }
        if let Some(v) = args.database_url {
            config_builder = config_builder.set_override("db.url", v)?;
        }
        if let Some(v) = args.port {
            config_builder = config_builder.set_override("server.port", i64::from(v))?;
        }
        if let Some(v) = args.collection_dir {
            config_builder = config_builder.set_override("iodd.collection_dir", v)?;
        }

        let app_config = config_builder.build().map_err(|e| {
            IotBoxError::ConfigError(format!("check {}: {}", args.config_file, e))
        })?;

        Ok(Configuration { config: app_config })
    }

    pub fn from_config(config: Config) -> Self {
        Configuration { config }
    }

    pub fn version(&self) -> String {
        self.config
            .get_string("iotbox.version")
            .unwrap_or(env!("CARGO_PKG_VERSION").to_string())
    }

    // ========================================================================
    // Server Configuration
    // ========================================================================

    pub fn server_address(&self) -> String {
        self.config
            .get_string("server.address")
            .unwrap_or("0.0.0.0".to_string())
    }

    pub fn server_port(&self) -> anyhow::Result<u16> {
        match self.config.get_int("server.port") {
            Ok(port) => Ok(u16::try_from(port).map_err(|_| {
                IotBoxError::ConfigError(format!("server.port out of range: {}", port))
            })?),
            Err(_) => Ok(DEFAULT_SERVER_PORT),
        }
    }

    /// Seconds in-flight requests get to finish on shutdown
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(
            self.config
                .get_int("server.shutdown_timeout_secs")
                .unwrap_or(5) as u64,
        )
    }

    // ========================================================================
    // Master Configuration
    // ========================================================================

    pub fn master_kind(&self) -> anyhow::Result<MasterKind> {
        match self.config.get_string("master.kind") {
            Ok(v) => Ok(v.parse().map_err(IotBoxError::ConfigError)?),
            Err(_) => Ok(MasterKind::default()),
        }
    }

    pub fn master_url(&self) -> String {
        self.config
            .get_string("master.url")
            .unwrap_or(DEFAULT_MASTER_URL.to_string())
    }

    pub fn master_timeout(&self) -> Duration {
        Duration::from_millis(self.config.get_int("master.timeout_ms").unwrap_or(5000) as u64)
    }

    pub fn port_count(&self) -> u8 {
        self.config
            .get_int("master.port_count")
            .unwrap_or(PORT_COUNT.into())
            .clamp(1, PORT_COUNT.into()) as u8
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.config
                .get_int("master.poll_interval_ms")
                .unwrap_or(1000)
                .max(1) as u64,
        )
    }

    // ========================================================================
    // Database Configuration
    // ========================================================================

    pub fn database_url(&self) -> String {
        self.config
            .get_string("db.url")
            .unwrap_or(DEFAULT_DATABASE_URL.to_string())
    }

    pub fn db_pool_options(&self) -> DbPoolOptions {
        let defaults = DbPoolOptions::default();
        let secs = |key: &str, default: Duration| {
            self.config
                .get_int(key)
                .map(|v| Duration::from_secs(v as u64))
                .unwrap_or(default)
        };

        DbPoolOptions {
            max_connections: self
                .config
                .get_int("db.pool.max_connections")
                .map(|v| v as u32)
                .unwrap_or(defaults.max_connections),
            min_connections: self
                .config
                .get_int("db.pool.min_connections")
                .map(|v| v as u32)
                .unwrap_or(defaults.min_connections),
            connect_timeout: secs("db.pool.connect_timeout", defaults.connect_timeout),
            acquire_timeout: secs("db.pool.acquire_timeout", defaults.acquire_timeout),
            idle_timeout: secs("db.pool.idle_timeout", defaults.idle_timeout),
            max_lifetime: secs("db.pool.max_lifetime", defaults.max_lifetime),
            sqlx_logging: self
                .config
                .get_bool("db.pool.sqlx_logging")
                .unwrap_or(defaults.sqlx_logging),
        }
    }

    /// Mark every port as disconnected at startup
    pub fn reset_connections(&self) -> bool {
        self.config.get_bool("db.reset.connections").unwrap_or(true)
    }

    /// Ports whose readings are deleted at startup
    pub fn reset_readings_for(&self) -> anyhow::Result<Vec<PortId>> {
        let Ok(values) = self.config.get_array("db.reset.readings") else {
            return Ok(Vec::new());
        };
        values
            .into_iter()
            .map(|v| -> anyhow::Result<PortId> {
                let port = v.into_int()?;
                let port = u8::try_from(port).map_err(|_| {
                    IotBoxError::ConfigError(format!("db.reset.readings: invalid port {}", port))
                })?;
                Ok(PortId::new(port)?)
            })
            .collect()
    }

    // ========================================================================
    // IODD Configuration
    // ========================================================================

    pub fn collection_dir(&self) -> PathBuf {
        PathBuf::from(
            self.config
                .get_string("iodd.collection_dir")
                .unwrap_or(DEFAULT_COLLECTION_DIR.to_string()),
        )
    }

    /// Defaults to the definitions file inside the collection directory
    pub fn unit_definitions_path(&self) -> PathBuf {
        self.config
            .get_string("iodd.unit_definitions")
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.collection_dir().join(UNIT_DEFINITIONS_FILE))
    }

    pub fn fetch_url_template(&self) -> Option<String> {
        self.config
            .get_string("iodd.fetch.url_template")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.config.get_int("iodd.fetch.timeout_secs").unwrap_or(30) as u64)
    }

    /// Fetch IODDs of newly attached sensors without user interaction
    pub fn auto_fetch(&self) -> bool {
        self.config.get_bool("iodd.fetch.auto").unwrap_or(false)
    }

    // ========================================================================
    // Bridge Configuration
    // ========================================================================

    pub fn bridge_enabled(&self) -> bool {
        self.config.get_bool("bridge.enabled").unwrap_or(false)
    }

    pub fn bridge_source_url(&self) -> String {
        self.config
            .get_string("bridge.source_url")
            .unwrap_or_else(|_| self.master_url())
    }

    pub fn bridge_target_url(&self) -> Option<String> {
        self.config.get_string("bridge.target_url").ok()
    }

    pub fn bridge_interval(&self) -> Duration {
        Duration::from_millis(
            self.config
                .get_int("bridge.interval_ms")
                .unwrap_or(10_000)
                .max(1) as u64,
        )
    }

    pub fn bridge_mappings_file(&self) -> Option<PathBuf> {
        self.config
            .get_string("bridge.mappings_file")
            .ok()
            .map(PathBuf::from)
    }

    /// Mappings from the YAML mappings file, empty when none is configured.
    pub fn bridge_mappings(&self) -> anyhow::Result<Vec<BridgeMapping>> {
        match self.bridge_mappings_file() {
            Some(path) => load_bridge_mappings(&path),
            None => Ok(Vec::new()),
        }
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string("logs.path").ok(),
            self.config.get_bool("logs.console").unwrap_or(true),
            self.config.get_bool("logs.file").unwrap_or(true),
            self.config
                .get_string("logs.level")
                .unwrap_or("info".to_string()),
        )
    }

    /// Effective settings for the dashboard settings view
    pub fn settings(&self, bridge_mappings: usize) -> anyhow::Result<Settings> {
        Ok(Settings {
            version: self.version(),
            master_kind: self.master_kind()?.to_string(),
            master_url: self.master_url(),
            port_count: self.port_count(),
            poll_interval_ms: self.poll_interval().as_millis() as u64,
            database_url: self.database_url(),
            collection_dir: self.collection_dir().display().to_string(),
            unit_definitions: self.unit_definitions_path().display().to_string(),
            fetch_url_template: self.fetch_url_template(),
            bridge_enabled: self.bridge_enabled(),
            bridge_mappings,
        })
    }
}

fn load_bridge_mappings(path: &Path) -> anyhow::Result<Vec<BridgeMapping>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        IotBoxError::ConfigError(format!("reading {}: {}", path.display(), e))
    })?;
    let mappings: Vec<BridgeMapping> = serde_yaml::from_str(&content).map_err(|e| {
        IotBoxError::ConfigError(format!("parsing {}: {}", path.display(), e))
    })?;
    Ok(mappings)
}
