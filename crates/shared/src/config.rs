//! Application configuration management.
//!
//! Values are layered from `config/default`, `config/{RUN_MODE}` and
//! `MOEDA__*` environment variables (double underscore separates sections).

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration. The in-memory ledger is used when absent.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Ledger runtime tuning.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Initial policy snapshot loaded at startup.
    #[serde(default)]
    pub policies: PolicyConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log output format: `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_format: default_log_format(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Ledger runtime tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Retry policy applied to `StaleVersion` conflicts.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Interval between background expiration sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Interval between outbox redelivery attempts.
    #[serde(default = "default_outbox_interval")]
    pub outbox_retry_secs: u64,
    /// Capacity of the notification broadcast channel.
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
    /// Page size used when streaming account history.
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            sweep_interval_secs: default_sweep_interval(),
            outbox_retry_secs: default_outbox_interval(),
            notification_buffer: default_notification_buffer(),
            history_page_size: default_history_page_size(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    3600 // 1 hour
}

fn default_outbox_interval() -> u64 {
    30
}

fn default_notification_buffer() -> usize {
    1024
}

fn default_history_page_size() -> u64 {
    100
}

/// Bounded exponential backoff for optimistic-concurrency conflicts.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Upper bound for a single delay.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    10
}

fn default_max_delay() -> u64 {
    500
}

/// Initial policy snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Distribution rules, one per event type.
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,
    /// Global expiration policy. `None` disables lots entirely.
    #[serde(default = "default_expiration")]
    pub expiration: Option<ExpirationConfig>,
    /// Per-discipline expiration overrides.
    #[serde(default)]
    pub expiration_overrides: Vec<DisciplineExpirationConfig>,
    /// Transfer policy.
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            expiration: default_expiration(),
            expiration_overrides: Vec::new(),
            transfer: TransferConfig::default(),
        }
    }
}

/// A distribution rule as written in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    /// Event type name (`activity_delivered`, `max_grade`, `summary_posted`, `quiz_completed`).
    pub event_type: String,
    /// Coins awarded per qualifying event.
    pub base_amount: i64,
    /// Maximum coins a student may earn inside the period window.
    pub per_period_cap: i64,
    /// Length of the trailing window, in days.
    pub period_days: u32,
    /// Coins per grade point, if the event carries a grade.
    #[serde(default)]
    pub grade_multiplier: Option<Decimal>,
    /// Extra coins when the grade is the maximum.
    #[serde(default)]
    pub perfect_score_bonus: i64,
}

fn default_rules() -> Vec<RuleConfig> {
    let rule = |event_type: &str, base_amount| RuleConfig {
        event_type: event_type.to_string(),
        base_amount,
        per_period_cap: 500,
        period_days: 30,
        grade_multiplier: None,
        perfect_score_bonus: 0,
    };
    vec![
        rule("activity_delivered", 10),
        rule("max_grade", 20),
        rule("summary_posted", 5),
        rule("quiz_completed", 5),
    ]
}

/// Expiration policy as written in configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ExpirationConfig {
    /// How long an earned lot stays spendable.
    pub validity_days: u32,
    /// How long before expiry the student is warned.
    pub notice_days: u32,
}

fn default_expiration() -> Option<ExpirationConfig> {
    Some(ExpirationConfig {
        validity_days: 180,
        notice_days: 15,
    })
}

/// Expiration override for one discipline.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DisciplineExpirationConfig {
    /// The discipline the override applies to.
    pub discipline_id: Uuid,
    /// How long an earned lot stays spendable.
    pub validity_days: u32,
    /// How long before expiry the student is warned.
    pub notice_days: u32,
}

/// Transfer policy as written in configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TransferConfig {
    /// Whether discipline balances are isolated.
    #[serde(default = "default_separation")]
    pub separation_enabled: bool,
    /// Fee charged on transfers, in percent (0..100).
    #[serde(default = "default_fee_percent")]
    pub fee_percent: u8,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            separation_enabled: default_separation(),
            fee_percent: default_fee_percent(),
        }
    }
}

fn default_separation() -> bool {
    true
}

fn default_fee_percent() -> u8 {
    10
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                config::Environment::with_prefix("MOEDA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
