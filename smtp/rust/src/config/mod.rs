//! Configuration types for the SMTP client.
//!
//! The TLS mode follows the port: 465 negotiates TLS before the greeting,
//! every other port must upgrade with STARTTLS. Durations (de)serialize in
//! humantime form (`"25s"`).

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::auth::Credentials;
use crate::errors::{SmtpError, SmtpResult};
use crate::types::Address;

/// Default submission port (STARTTLS).
pub const DEFAULT_PORT: u16 = 587;

/// Conventional implicit-TLS submission port.
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Default timeout for the TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the server greeting.
pub const DEFAULT_GREETING_TIMEOUT: Duration = Duration::from_secs(30);

/// Default socket timeout for each command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on a whole `verify()` handshake.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(25);

/// Default maximum message size (10 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// TLS mode for SMTP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Plaintext. Only for local test relays.
    None,
    /// STARTTLS must succeed; a server without it fails verification.
    StartTlsRequired,
    /// TLS from the first byte.
    Implicit,
}

impl TlsMode {
    /// Mode implied by the port.
    pub fn for_port(port: u16) -> Self {
        if port == IMPLICIT_TLS_PORT {
            TlsMode::Implicit
        } else {
            TlsMode::StartTlsRequired
        }
    }
}

impl Default for TlsMode {
    fn default() -> Self {
        Self::for_port(DEFAULT_PORT)
    }
}

/// Minimum TLS version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsVersion {
    /// TLS 1.2 (default).
    #[default]
    Tls12,
    /// TLS 1.3.
    Tls13,
}

/// TLS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// TLS mode. `None` in a config file means "derive from the port".
    #[serde(default)]
    pub mode: Option<TlsMode>,
    /// Minimum TLS version; there is no maximum.
    #[serde(default)]
    pub min_version: TlsVersion,
    /// Accept self-signed and otherwise invalid certificates.
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    /// Server Name Indication override.
    #[serde(default)]
    pub sni_override: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            mode: None,
            min_version: TlsVersion::default(),
            accept_invalid_certs: true,
            sni_override: None,
        }
    }
}

impl TlsConfig {
    /// Effective mode for `port`.
    pub fn mode_for(&self, port: u16) -> TlsMode {
        self.mode.unwrap_or_else(|| TlsMode::for_port(port))
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Time to wait for a free session.
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

fn default_max_connections() -> usize {
    5
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

/// Retry configuration for transient send failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial retry delay.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Maximum retry delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Randomize delays.
    #[serde(default = "default_true")]
    pub jitter: bool,
    /// Enable retries.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: true,
            enabled: true,
        }
    }
}

/// SMTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS configuration.
    #[serde(default)]
    pub tls: TlsConfig,
    /// Authentication username.
    #[serde(default)]
    pub username: Option<String>,
    /// Authentication password (never serialized).
    #[serde(skip)]
    pub password: Option<SecretString>,
    /// Sender identity.
    pub from: Address,
    /// Connect timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Greeting timeout.
    #[serde(default = "default_greeting_timeout", with = "humantime_serde")]
    pub greeting_timeout: Duration,
    /// Per-command socket timeout.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Bound on `verify()`.
    #[serde(default = "default_verify_timeout", with = "humantime_serde")]
    pub verify_timeout: Duration,
    /// Maximum message size.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Retry configuration.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Client identifier for EHLO.
    #[serde(default)]
    pub client_id: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_greeting_timeout() -> Duration {
    DEFAULT_GREETING_TIMEOUT
}

fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

fn default_verify_timeout() -> Duration {
    DEFAULT_VERIFY_TIMEOUT
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl SmtpConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> SmtpConfigBuilder {
        SmtpConfigBuilder::default()
    }

    /// Builds a configuration from `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`,
    /// `SMTP_PASSWORD`, `SMTP_FROM` and `SMTP_FROM_NAME`.
    pub fn from_env() -> SmtpResult<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let mut builder = Self::builder();
        if let Some(host) = var("SMTP_HOST") {
            builder = builder.host(host);
        }
        if let Some(port) = var("SMTP_PORT") {
            let port = port
                .trim()
                .parse()
                .map_err(|_| SmtpError::configuration(format!("Invalid SMTP_PORT {:?}", port)))?;
            builder = builder.port(port);
        }
        if let (Some(user), Some(pass)) = (var("SMTP_USERNAME"), var("SMTP_PASSWORD")) {
            builder = builder.credentials(user, pass);
        }
        let from = var("SMTP_FROM").or_else(|| var("SMTP_USERNAME"));
        if let Some(from) = from {
            builder = match var("SMTP_FROM_NAME") {
                Some(name) => builder.from_name(name, from),
                None => builder.from(from),
            };
        }
        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SmtpResult<()> {
        if self.host.trim().is_empty() {
            return Err(SmtpError::configuration("Host is required"));
        }
        if self.port == 0 {
            return Err(SmtpError::configuration("Port must be non-zero"));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(SmtpError::configuration(
                "Username and password must be set together",
            ));
        }
        if self.pool.max_connections == 0 {
            return Err(SmtpError::configuration("max_connections must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(SmtpError::configuration("max_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Returns the `host:port` pair.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Effective TLS mode.
    pub fn tls_mode(&self) -> TlsMode {
        self.tls.mode_for(self.port)
    }

    /// Credentials, if configured.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some(Credentials::from_secret(user.clone(), pass.clone())),
            _ => None,
        }
    }

    /// Returns the client identifier for EHLO.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("localhost")
    }

    /// Name presented for SNI and certificate checks.
    pub fn server_name(&self) -> &str {
        self.tls.sni_override.as_deref().unwrap_or(&self.host)
    }
}

/// Builder for SMTP configuration.
#[derive(Debug, Default)]
pub struct SmtpConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    tls: TlsConfig,
    username: Option<String>,
    password: Option<SecretString>,
    from: Option<String>,
    from_name: Option<String>,
    connect_timeout: Option<Duration>,
    greeting_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    verify_timeout: Option<Duration>,
    max_message_size: Option<usize>,
    pool: PoolConfig,
    retry: RetryConfig,
    client_id: Option<String>,
}

impl SmtpConfigBuilder {
    /// Sets the SMTP server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the SMTP server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets username and password.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the sender address.
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Sets the sender address with a display name.
    pub fn from_name(mut self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self.from = Some(address.into());
        self
    }

    /// Forces a TLS mode instead of deriving it from the port.
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls.mode = Some(mode);
        self
    }

    /// Sets the TLS configuration.
    pub fn tls(mut self, config: TlsConfig) -> Self {
        self.tls = config;
        self
    }

    /// Sets connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets greeting timeout.
    pub fn greeting_timeout(mut self, timeout: Duration) -> Self {
        self.greeting_timeout = Some(timeout);
        self
    }

    /// Sets command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Sets verify timeout.
    pub fn verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = Some(timeout);
        self
    }

    /// Sets maximum message size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Sets pool configuration.
    pub fn pool(mut self, config: PoolConfig) -> Self {
        self.pool = config;
        self
    }

    /// Sets the pool size.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.pool.max_connections = max;
        self
    }

    /// Sets retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Disables retries.
    pub fn no_retry(mut self) -> Self {
        self.retry.enabled = false;
        self
    }

    /// Sets the client identifier for EHLO.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SmtpResult<SmtpConfig> {
        let host = self
            .host
            .ok_or_else(|| SmtpError::configuration("Host is required"))?;
        let from = self
            .from
            .ok_or_else(|| SmtpError::configuration("Sender address is required"))?;
        let from = match self.from_name {
            Some(name) => Address::with_name(name, from),
            None => Address::parse(&from),
        }
        .map_err(|e| SmtpError::configuration(format!("Invalid sender: {}", e.message())))?;

        let config = SmtpConfig {
            host,
            port: self.port.unwrap_or(DEFAULT_PORT),
            tls: self.tls,
            username: self.username,
            password: self.password,
            from,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            greeting_timeout: self.greeting_timeout.unwrap_or(DEFAULT_GREETING_TIMEOUT),
            command_timeout: self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            verify_timeout: self.verify_timeout.unwrap_or(DEFAULT_VERIFY_TIMEOUT),
            max_message_size: self.max_message_size.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE),
            pool: self.pool,
            retry: self.retry,
            client_id: self.client_id,
        };

        config.validate()?;
        Ok(config)
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
