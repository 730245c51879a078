//! Filesystem path constants.

/// Default config file path for the unidler daemon.
pub const DEFAULT_CONFIG: &str = "/etc/unidler/config.yaml";

/// Default data directory for the state store.
pub const DEFAULT_DATA_DIR: &str = "/tmp/unidler-data";
