use clap::Parser;

const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
const DEFAULT_SERVER_PORT: u16 = 3000;
const DEFAULT_MGMT_PORT: u16 = 3001;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TRUSTED_PROXIES: &str = "10.0.0.0/8,172.16.0.0/12,192.168.0.0/16,127.0.0.1/32";

const DEFAULT_RATE_LIMIT_REQUESTER_PER_MIN: u32 = 10;
const DEFAULT_RATE_LIMIT_TARGET_PER_MIN: u32 = 50;
const DEFAULT_RATE_LIMIT_IP_PER_MIN: u32 = 100;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

const DEFAULT_MAX_ONE_TIME_PREKEYS: i64 = 100;
const DEFAULT_ONE_TIME_PREKEY_REFILL_THRESHOLD: i64 = 10;
const DEFAULT_SIGNED_PREKEY_TTL_DAYS: i64 = 7;

const DEFAULT_SEAL_INTERVAL_SECS: u64 = 60;
const DEFAULT_SEAL_BATCH_THRESHOLD: usize = 1024;

const DEFAULT_DB_READY_TIMEOUT_MS: u64 = 500;
const DEFAULT_COUNTER_STORE_READY_TIMEOUT_MS: u64 = 500;

const DEFAULT_REQUEST_TIMEOUT_READ_SECS: u64 = 15;
const DEFAULT_REQUEST_TIMEOUT_WRITE_SECS: u64 = 30;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub database: DatabaseConfig,

    #[command(flatten)]
    pub counter_store: CounterStoreConfig,

    #[command(flatten)]
    pub signing: SigningConfig,

    #[command(flatten)]
    pub sealing: SealingConfig,

    #[command(flatten)]
    pub rate_limit: RateLimitConfig,

    #[command(flatten)]
    pub keys: KeysConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,

    #[command(flatten)]
    pub health: HealthConfig,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}

#[derive(Clone, Debug, Parser)]
pub struct ServerConfig {
    #[arg(long, env, default_value = DEFAULT_SERVER_HOST)]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = DEFAULT_SERVER_PORT)]
    pub port: u16,

    #[arg(long, env, default_value_t = DEFAULT_MGMT_PORT)]
    pub mgmt_port: u16,

    #[arg(long, env, default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout_secs: u64,

    /// Comma-separated list of CIDRs to trust for X-Forwarded-For IP extraction.
    #[arg(long, env, default_value = DEFAULT_TRUSTED_PROXIES)]
    pub trusted_proxies: String,

    #[arg(long, env, default_value_t = DEFAULT_REQUEST_TIMEOUT_READ_SECS)]
    pub request_timeout_read_secs: u64,

    #[arg(long, env, default_value_t = DEFAULT_REQUEST_TIMEOUT_WRITE_SECS)]
    pub request_timeout_write_secs: u64,
}

#[derive(Clone, Debug, Parser)]
pub struct DatabaseConfig {
    #[arg(long, env)]
    pub database_url: String,

    #[arg(long, env, default_value_t = DEFAULT_DB_READY_TIMEOUT_MS)]
    pub ready_timeout_ms: u64,
}

#[derive(Clone, Debug, Parser)]
pub struct CounterStoreConfig {
    #[arg(long, env)]
    pub counter_store_url: String,

    #[arg(long, env, default_value_t = DEFAULT_COUNTER_STORE_READY_TIMEOUT_MS)]
    pub ready_timeout_ms: u64,
}

/// Material for the active tree-head signing key. The key itself is provisioned
/// out-of-band (e.g. a mounted secret); this only carries the algorithm tag and the
/// base64-encoded key bytes.
#[derive(Clone, Debug, Parser)]
pub struct SigningConfig {
    #[arg(long, env, value_enum, default_value = "ed25519")]
    pub algorithm: SigningAlgorithmArg,

    /// Base64-encoded signing key material (format depends on `algorithm`).
    #[arg(long, env)]
    pub signing_key_b64: String,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum SigningAlgorithmArg {
    Ed25519,
    P256Ecdsa,
}

#[derive(Clone, Debug, Parser)]
pub struct SealingConfig {
    #[arg(long, env, default_value_t = DEFAULT_SEAL_INTERVAL_SECS)]
    pub interval_secs: u64,

    #[arg(long, env, default_value_t = DEFAULT_SEAL_BATCH_THRESHOLD)]
    pub batch_threshold: usize,
}

#[derive(Clone, Debug, Parser)]
pub struct RateLimitConfig {
    #[arg(long, env, default_value_t = DEFAULT_RATE_LIMIT_REQUESTER_PER_MIN)]
    pub requester_per_min: u32,

    #[arg(long, env, default_value_t = DEFAULT_RATE_LIMIT_TARGET_PER_MIN)]
    pub target_per_min: u32,

    #[arg(long, env, default_value_t = DEFAULT_RATE_LIMIT_IP_PER_MIN)]
    pub ip_per_min: u32,

    #[arg(long, env, default_value_t = DEFAULT_RATE_LIMIT_WINDOW_SECS)]
    pub window_secs: u64,
}

#[derive(Clone, Debug, Parser)]
pub struct KeysConfig {
    #[arg(long, env, default_value_t = DEFAULT_MAX_ONE_TIME_PREKEYS)]
    pub max_one_time_prekeys: i64,

    #[arg(long, env, default_value_t = DEFAULT_ONE_TIME_PREKEY_REFILL_THRESHOLD)]
    pub one_time_prekey_refill_threshold: i64,

    #[arg(long, env, default_value_t = DEFAULT_SIGNED_PREKEY_TTL_DAYS)]
    pub signed_prekey_ttl_days: i64,
}

#[derive(Clone, Debug, Parser)]
pub struct AuthConfig {
    #[arg(long, env)]
    pub jwt_secret: String,

    #[arg(long, env)]
    pub jwt_audience: Option<String>,
}

#[derive(Clone, Debug, Parser)]
pub struct TelemetryConfig {
    #[arg(long, env)]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env, default_value_t = 1.0)]
    pub trace_sampling_ratio: f64,

    #[arg(long, env, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug, Parser)]
pub struct HealthConfig {
    #[arg(long, env, default_value_t = 500)]
    pub db_timeout_ms: u64,

    #[arg(long, env, default_value_t = 500)]
    pub counter_store_timeout_ms: u64,
}
