//! Connection configuration.
//!
//! Provides the connection parameters consumed when a native session is
//! opened, plus the pooling options recognized by the pool layer.

use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on the size of a connection pool.
pub const MAX_POOL_SIZE: usize = 64;

/// Upper bound on the length of a pool name.
pub const MAX_POOL_NAME_LEN: usize = 64;

/// TLS settings for a connection.
#[derive(Debug, Clone, Default)]
pub struct SslConfig {
    /// Path to the client private key file
    pub key: Option<PathBuf>,
    /// Path to the client certificate file
    pub cert: Option<PathBuf>,
    /// Path to the CA certificate file
    pub ca: Option<PathBuf>,
    /// Directory containing trusted CA certificates
    pub capath: Option<PathBuf>,
    /// Permitted cipher list
    pub cipher: Option<String>,
    /// Path to the certificate revocation list
    pub crlpath: Option<PathBuf>,
    /// Verify the server certificate
    pub verify_cert: bool,
}

/// Connection configuration.
///
/// All fields are plain data; they are handed verbatim to the session
/// connector when a connection is opened.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Database to select after connecting
    pub database: Option<String>,
    /// Unix domain socket path (takes precedence over host/port)
    pub unix_socket: Option<String>,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Read timeout on the session socket
    pub read_timeout: Option<Duration>,
    /// Write timeout on the session socket
    pub write_timeout: Option<Duration>,
    /// Permit LOAD DATA LOCAL INFILE (disabled by default)
    pub local_infile: bool,
    /// Enable protocol compression
    pub compress: bool,
    /// Statement to execute immediately after connecting
    pub init_command: Option<String>,
    /// Option file to read client defaults from
    pub default_file: Option<PathBuf>,
    /// Option-file group to read
    pub default_group: Option<String>,
    /// Directory holding client authentication plugins
    pub plugin_dir: Option<PathBuf>,
    /// TLS settings; `None` disables TLS
    pub ssl: Option<SslConfig>,
    /// Autocommit mode to establish after connecting; `None` keeps the
    /// server default
    pub autocommit: Option<bool>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            unix_socket: None,
            connect_timeout: Duration::from_secs(30),
            read_timeout: None,
            write_timeout: None,
            local_infile: false,
            compress: false,
            init_command: None,
            default_file: None,
            default_group: None,
            plugin_dir: None,
            ssl: None,
            autocommit: None,
        }
    }
}

impl ConnectConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Connect through a Unix domain socket instead of TCP.
    pub fn unix_socket(mut self, path: impl Into<String>) -> Self {
        self.unix_socket = Some(path.into());
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the socket read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the socket write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Enable or disable LOAD DATA LOCAL INFILE.
    pub fn local_infile(mut self, enabled: bool) -> Self {
        self.local_infile = enabled;
        self
    }

    /// Enable or disable protocol compression.
    pub fn compress(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    /// Statement to run right after the session is established.
    pub fn init_command(mut self, statement: impl Into<String>) -> Self {
        self.init_command = Some(statement.into());
        self
    }

    /// Read client defaults from the given option file.
    pub fn default_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_file = Some(path.into());
        self
    }

    /// Option-file group to read defaults from.
    pub fn default_group(mut self, group: impl Into<String>) -> Self {
        self.default_group = Some(group.into());
        self
    }

    /// Directory holding client authentication plugins.
    pub fn plugin_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugin_dir = Some(path.into());
        self
    }

    /// Enable TLS with the given settings.
    pub fn ssl(mut self, ssl: SslConfig) -> Self {
        self.ssl = Some(ssl);
        self
    }

    /// Autocommit mode to establish after connecting.
    pub fn autocommit(mut self, enabled: bool) -> Self {
        self.autocommit = Some(enabled);
        self
    }

    /// Get the socket address string for TCP connections.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Pooling options recognized alongside connection configuration.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Pool name, unique within a registry
    pub name: String,
    /// Number of pooled connections (1..=64)
    pub size: usize,
    /// Reset session state when a connection is returned to the pool
    pub reset_connection: bool,
}

impl PoolOptions {
    /// Create pooling options with the default size of 5.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 5,
            reset_connection: true,
        }
    }

    /// Set the pool size.
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Enable or disable reset-on-release.
    pub fn reset_connection(mut self, enabled: bool) -> Self {
        self.reset_connection = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = ConnectConfig::new()
            .host("db.example.com")
            .port(3307)
            .user("app")
            .password("secret")
            .database("inventory")
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(30))
            .compress(true)
            .init_command("SET sql_mode='STRICT_ALL_TABLES'")
            .autocommit(true);

        assert_eq!(config.host, "db.example.com");
        assert_eq!(config.port, 3307);
        assert_eq!(config.user, "app");
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.database.as_deref(), Some("inventory"));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Some(Duration::from_secs(30)));
        assert!(config.compress);
        assert_eq!(config.autocommit, Some(true));
        assert_eq!(config.socket_addr(), "db.example.com:3307");
    }

    #[test]
    fn default_config() {
        let config = ConnectConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 3306);
        assert!(config.ssl.is_none());
        assert!(!config.local_infile);
        assert!(config.autocommit.is_none());
    }

    #[test]
    fn pool_options_defaults() {
        let opts = PoolOptions::new("app_pool");
        assert_eq!(opts.name, "app_pool");
        assert_eq!(opts.size, 5);
        assert!(opts.reset_connection);

        let opts = PoolOptions::new("small").size(1).reset_connection(false);
        assert_eq!(opts.size, 1);
        assert!(!opts.reset_connection);
    }
}
