use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

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

/// Top-level configuration for the registry service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub registration: RegistrationConfig,
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

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            registration: RegistrationConfig::from_env()?,
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

/// Per-phase retry budgets, expressed as the maximum number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudgets {
    pub identity: u32,
    pub credentials: u32,
    pub policy: u32,
}

impl Default for RetryBudgets {
    fn default() -> Self {
        Self {
            identity: 5,
            credentials: 5,
            policy: 5,
        }
    }
}

/// Exponential backoff curve applied after transient failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub multiplier: f64,
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            cap: Duration::from_secs(300),
        }
    }
}

/// Tuning surface of the registration state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub workers: usize,
    pub retry_budgets: RetryBudgets,
    pub backoff: BackoffConfig,
    pub call_timeout: Duration,
    pub stall_threshold: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 50,
            workers: 1,
            retry_budgets: RetryBudgets::default(),
            backoff: BackoffConfig::default(),
            call_timeout: Duration::from_secs(10),
            stall_threshold: Duration::from_secs(15 * 60),
        }
    }
}

/// Upper bound for `REGISTRY_BACKOFF_CAP_MS`.
pub const MAX_BACKOFF_CAP: Duration = Duration::from_secs(24 * 60 * 60);

impl RegistrationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let batch_size = positive(
            env_or("REGISTRY_BATCH_SIZE", defaults.batch_size)?,
            "REGISTRY_BATCH_SIZE",
        )?;
        let workers = positive(
            env_or("REGISTRY_WORKERS", defaults.workers)?,
            "REGISTRY_WORKERS",
        )?;

        let retry_budgets = RetryBudgets {
            identity: positive(
                env_or("REGISTRY_IDENTITY_MAX_ATTEMPTS", defaults.retry_budgets.identity)?,
                "REGISTRY_IDENTITY_MAX_ATTEMPTS",
            )?,
            credentials: positive(
                env_or(
                    "REGISTRY_CREDENTIALS_MAX_ATTEMPTS",
                    defaults.retry_budgets.credentials,
                )?,
                "REGISTRY_CREDENTIALS_MAX_ATTEMPTS",
            )?,
            policy: positive(
                env_or("REGISTRY_POLICY_MAX_ATTEMPTS", defaults.retry_budgets.policy)?,
                "REGISTRY_POLICY_MAX_ATTEMPTS",
            )?,
        };

        let multiplier: f64 = env_or("REGISTRY_BACKOFF_MULTIPLIER", defaults.backoff.multiplier)?;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "REGISTRY_BACKOFF_MULTIPLIER",
                value: multiplier.to_string(),
            });
        }

        let backoff = BackoffConfig {
            base: millis_or("REGISTRY_BACKOFF_BASE_MS", defaults.backoff.base)?,
            multiplier,
            cap: millis_or("REGISTRY_BACKOFF_CAP_MS", defaults.backoff.cap)?,
        };
        if backoff.cap < backoff.base || backoff.cap > MAX_BACKOFF_CAP {
            return Err(ConfigError::InvalidValue {
                key: "REGISTRY_BACKOFF_CAP_MS",
                value: backoff.cap.as_millis().to_string(),
            });
        }

        let stall_threshold = Duration::from_secs(env_or(
            "REGISTRY_STALL_THRESHOLD_SECS",
            defaults.stall_threshold.as_secs(),
        )?);

        Ok(Self {
            poll_interval: positive_millis("REGISTRY_POLL_INTERVAL_MS", defaults.poll_interval)?,
            batch_size,
            workers,
            retry_budgets,
            backoff,
            call_timeout: positive_millis("REGISTRY_CALL_TIMEOUT_MS", defaults.call_timeout)?,
            stall_threshold,
        })
    }
}

fn env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn millis_or(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = env_or(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

fn positive_millis(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = positive(env_or(key, default.as_millis() as u64)?, key)?;
    Ok(Duration::from_millis(millis))
}

fn positive<T>(value: T, key: &'static str) -> Result<T, ConfigError>
where
    T: PartialOrd + Default + ToString,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "{key} has an invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
