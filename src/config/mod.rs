//! Configuration management.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default number of pooled connections.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Default busy timeout applied to each connection, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// SQLite `synchronous` pragma level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// No syncing; fastest, least durable.
    Off,
    /// Sync at critical moments; the WAL-mode sweet spot.
    #[default]
    Normal,
    /// Sync on every write; most durable.
    Full,
}

impl SyncMode {
    /// Parses a sync mode string, defaulting to `Normal`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "off" => Self::Off,
            "full" => Self::Full,
            _ => Self::Normal,
        }
    }

    /// Returns the pragma value for this mode.
    #[must_use]
    pub const fn as_pragma(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// SQLite `temp_store` pragma location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TempStore {
    /// Let SQLite decide.
    #[default]
    Default,
    /// Temporary tables and indexes kept in memory.
    Memory,
    /// Temporary tables and indexes kept in files.
    File,
}

impl TempStore {
    /// Parses a temp store string, defaulting to `Default`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" => Self::Memory,
            "file" => Self::File,
            _ => Self::Default,
        }
    }

    /// Returns the pragma value for this location.
    #[must_use]
    pub const fn as_pragma(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Memory => "MEMORY",
            Self::File => "FILE",
        }
    }
}

/// Main configuration for a statehouse store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub storage_path: PathBuf,
    /// Maximum number of pooled connections.
    pub pool_size: usize,
    /// Busy timeout applied to each connection.
    pub connect_timeout: Duration,
    /// Whether to enable WAL journaling (durability mode).
    pub durability_mode: bool,
    /// Whether to enforce foreign keys on each connection.
    pub enforce_referential_integrity: bool,
    /// SQLite page cache size (pragma `cache_size`), if overridden.
    pub cache_size: Option<i64>,
    /// Where SQLite keeps temporary tables and indexes.
    pub temp_store: TempStore,
    /// SQLite synchronous level.
    pub sync_mode: SyncMode,
    /// Whether records without an explicit expiry get the default TTL.
    pub enable_ttl: bool,
    /// Default TTL in seconds, applied when `enable_ttl` is on.
    pub default_ttl_seconds: Option<f64>,
    /// Directory where default-named backups are written.
    pub backup_path: PathBuf,
    /// How many rotated backups to keep.
    pub max_backup_files: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("statehouse.db"),
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            durability_mode: true,
            enforce_referential_integrity: true,
            cache_size: None,
            temp_store: TempStore::Default,
            sync_mode: SyncMode::Normal,
            enable_ttl: false,
            default_ttl_seconds: None,
            backup_path: PathBuf::from("backups"),
            max_backup_files: 5,
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Database path.
    pub storage_path: Option<String>,
    /// Pool size.
    pub pool_size: Option<usize>,
    /// Busy timeout in seconds.
    pub connect_timeout_seconds: Option<u64>,
    /// WAL journaling on/off.
    pub durability_mode: Option<bool>,
    /// Foreign key enforcement.
    pub enforce_referential_integrity: Option<bool>,
    /// Page cache size.
    pub cache_size: Option<i64>,
    /// Temp store location: "memory", "file", "default".
    pub temp_store: Option<String>,
    /// Sync mode: "off", "normal", "full".
    pub sync_mode: Option<String>,
    /// TTL section.
    pub ttl: Option<ConfigFileTtl>,
    /// Backup section.
    pub backup: Option<ConfigFileBackup>,
}

/// TTL section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileTtl {
    /// Whether TTL stamping is enabled.
    pub enabled: Option<bool>,
    /// Default TTL in seconds.
    pub default_seconds: Option<f64>,
}

/// Backup section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileBackup {
    /// Backup directory.
    pub path: Option<String>,
    /// How many backups to keep.
    pub max_files: Option<usize>,
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &std::path::Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| crate::Error::Operation {
            operation: "read_config_file".to_string(),
            cause: e.to_string(),
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| crate::Error::Operation {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/statehouse/` on macOS)
    /// 2. XDG config dir (`~/.config/statehouse/` for Unix compatibility)
    ///
    /// Returns default configuration if no config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let platform_config = base_dirs
            .config_dir()
            .join("statehouse")
            .join("config.toml");
        if platform_config.exists() {
            if let Ok(config) = Self::load_from_file(&platform_config) {
                return config;
            }
        }

        let xdg_config = base_dirs
            .home_dir()
            .join(".config")
            .join("statehouse")
            .join("config.toml");
        if xdg_config.exists() {
            if let Ok(config) = Self::load_from_file(&xdg_config) {
                return config;
            }
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `StoreConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(path) = file.storage_path {
            config.storage_path = PathBuf::from(path);
        }
        if let Some(size) = file.pool_size {
            config.pool_size = size.max(1);
        }
        if let Some(secs) = file.connect_timeout_seconds {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = file.durability_mode {
            config.durability_mode = v;
        }
        if let Some(v) = file.enforce_referential_integrity {
            config.enforce_referential_integrity = v;
        }
        if let Some(v) = file.cache_size {
            config.cache_size = Some(v);
        }
        if let Some(v) = file.temp_store {
            config.temp_store = TempStore::parse(&v);
        }
        if let Some(v) = file.sync_mode {
            config.sync_mode = SyncMode::parse(&v);
        }
        if let Some(ttl) = file.ttl {
            if let Some(enabled) = ttl.enabled {
                config.enable_ttl = enabled;
            }
            config.default_ttl_seconds = ttl.default_seconds.or(config.default_ttl_seconds);
        }
        if let Some(backup) = file.backup {
            if let Some(path) = backup.path {
                config.backup_path = PathBuf::from(path);
            }
            if let Some(max) = backup.max_files {
                config.max_backup_files = max;
            }
        }

        config
    }

    /// Sets the database path.
    #[must_use]
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    /// Sets the pool size (clamped to at least 1).
    #[must_use]
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Sets the per-connection busy timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enables or disables WAL journaling.
    #[must_use]
    pub const fn with_durability_mode(mut self, enabled: bool) -> Self {
        self.durability_mode = enabled;
        self
    }

    /// Sets the page cache size.
    #[must_use]
    pub const fn with_cache_size(mut self, pages: i64) -> Self {
        self.cache_size = Some(pages);
        self
    }

    /// Sets the temp store location.
    #[must_use]
    pub const fn with_temp_store(mut self, temp_store: TempStore) -> Self {
        self.temp_store = temp_store;
        self
    }

    /// Sets the synchronous level.
    #[must_use]
    pub const fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Enables TTL stamping with the given default TTL in seconds.
    #[must_use]
    pub const fn with_default_ttl(mut self, seconds: f64) -> Self {
        self.enable_ttl = true;
        self.default_ttl_seconds = Some(seconds);
        self
    }

    /// Sets the backup directory.
    #[must_use]
    pub fn with_backup_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_path = path.into();
        self
    }

    /// Sets how many rotated backups to keep.
    #[must_use]
    pub const fn with_max_backup_files(mut self, max: usize) -> Self {
        self.max_backup_files = max;
        self
    }
}
