use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: DatabaseConfig,
    #[serde(default)]
    pub health: HealthCheckConfig,
}

// ============================================================================
// Listener Configuration
// ============================================================================

/// Addresses of the two HTTP check listeners
///
/// Bare ":PORT" addresses are accepted and bind all interfaces.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listener answering "is this node a healthy master"
    #[serde(default = "default_master_listen")]
    pub master_listen: String,
    /// Listener answering "is this node a healthy slave"
    #[serde(default = "default_slave_listen")]
    pub slave_listen: String,
}

fn default_master_listen() -> String {
    ":7555".to_string()
}

fn default_slave_listen() -> String {
    ":7556".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            master_listen: default_master_listen(),
            slave_listen: default_slave_listen(),
        }
    }
}

// ============================================================================
// Backend Configuration
// ============================================================================

/// Database to probe, as a single connection URL
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "root:@tcp(127.0.0.1:3306)/information_schema".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

/// Connection parameters resolved from the database URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
}

// ============================================================================
// Health Rules
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    /// Maximum tolerated Seconds_Behind_Master for a healthy slave
    #[serde(default = "default_slave_lag_secs")]
    pub slave_lag_secs: i64,
}

fn default_slave_lag_secs() -> i64 {
    30
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            slave_lag_secs: default_slave_lag_secs(),
        }
    }
}
