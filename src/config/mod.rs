use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub certification: CertificationConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let verify_base_url = env::var("APP_VERIFY_BASE_URL")
            .unwrap_or_else(|_| "https://gacp-certify.go.th".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            certification: CertificationConfig {
                verify_base_url,
                ..CertificationConfig::default()
            },
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Business parameters of the certification lifecycle.
///
/// Fee amounts and review/payment windows mirror the published DTAM fee
/// schedule; the scoring thresholds belong to the field-audit checklist.
#[derive(Debug, Clone)]
pub struct CertificationConfig {
    /// Document-review fee (THB), billed when the review approves the dossier.
    pub phase1_fee_thb: u32,
    /// Field-inspection fee (THB), billed after a passing on-site audit.
    pub phase2_fee_thb: u32,
    /// Days the farmer has to settle the phase 1 invoice.
    pub phase1_due_days: i64,
    /// Days the farmer has to settle the phase 2 invoice.
    pub phase2_due_days: i64,
    /// Revision requests allowed before an application is auto-rejected.
    pub max_revision_attempts: u32,
    /// Default certificate validity.
    pub validity_months: u32,
    /// Base URL embedded in certificate QR payloads.
    pub verify_base_url: String,
}

impl Default for CertificationConfig {
    fn default() -> Self {
        Self {
            phase1_fee_thb: 5_000,
            phase2_fee_thb: 25_000,
            phase1_due_days: 7,
            phase2_due_days: 14,
            max_revision_attempts: 3,
            validity_months: 36,
            verify_base_url: "https://gacp-certify.go.th".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
