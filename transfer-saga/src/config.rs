//! Configuration for the transfer saga

use crate::fees::FeeSchedule;
use message_bus::SubscriberConfig;
use risk_engine::{LimitConfig, RiskConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Transfer saga configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Bank code of this bank (source of inter-bank transfers)
    pub home_bank_code: String,

    /// Support line shown in smart OTP guidance
    pub support_contact: String,

    /// Ledger configuration
    pub ledger: ledger_core::Config,

    /// OTP challenge configuration
    pub otp: OtpConfig,

    /// Outbox relay configuration
    pub outbox: OutboxConfig,

    /// Stale transfer detection
    pub reconciliation: ReconciliationConfig,

    /// Risk scoring
    pub risk: RiskConfig,

    /// Daily / monthly limits
    pub limits: LimitConfig,

    /// Fees
    pub fees: FeeConfig,

    /// Bus consumer redelivery
    pub consumer: ConsumerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "transfer-saga".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            home_bank_code: "FTB".to_string(),
            support_contact: "1900 6060".to_string(),
            ledger: ledger_core::Config::default(),
            otp: OtpConfig::default(),
            outbox: OutboxConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            risk: RiskConfig::default(),
            limits: LimitConfig::default(),
            fees: FeeConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

/// OTP challenge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpConfig {
    /// Challenge lifetime (seconds)
    pub ttl_seconds: u64,

    /// Minimum gap between two codes for one challenge (seconds)
    pub resend_cooldown_seconds: u64,

    /// Expiry sweep interval (seconds)
    pub sweep_interval_seconds: u64,

    /// Extra age past the TTL before a transfer whose challenge is missing
    /// from the store is expired (seconds)
    pub orphan_grace_seconds: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300, // 5 minutes
            resend_cooldown_seconds: 3,
            sweep_interval_seconds: 30,
            orphan_grace_seconds: 60,
        }
    }
}

/// Outbox relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Poll interval (milliseconds)
    pub poll_interval_ms: u64,

    /// Max events read per poll
    pub batch_size: usize,

    /// Publish attempts before an event is flagged FAILED
    pub max_attempts: u32,

    /// Delay after the first failed attempt (milliseconds)
    pub backoff_base_ms: u64,

    /// Backoff ceiling (milliseconds)
    pub backoff_max_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            batch_size: 100,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000, // 30s
        }
    }
}

/// Stale transfer detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Age after which a PENDING transfer with moved funds is flagged (seconds)
    pub timeout_seconds: u64,

    /// Scan interval (seconds)
    pub scan_interval_seconds: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 1800, // 30 minutes
            scan_interval_seconds: 60,
        }
    }
}

/// Fee configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Account credited with collected fees; fees stay with no one when unset
    pub fee_account: Option<String>,

    /// Schedules per transaction type; missing types are free
    pub schedules: Vec<FeeSchedule>,
}

/// Bus consumer redelivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Deliveries before a message is dead-lettered
    pub max_deliver: u32,

    /// First redelivery delay (milliseconds)
    pub retry_delay_ms: u64,

    /// Redelivery delay ceiling (milliseconds)
    pub max_retry_delay_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_deliver: 3,
            retry_delay_ms: 100,
            max_retry_delay_ms: 2_000,
        }
    }
}

impl ConsumerConfig {
    /// Subscriber settings for the message bus
    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig {
            max_deliver: self.max_deliver,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(dir) = std::env::var("LEDGER_DATA_DIR") {
            config.ledger.data_dir = PathBuf::from(dir);
        }

        if let Ok(code) = std::env::var("SAGA_HOME_BANK_CODE") {
            config.home_bank_code = code;
        }

        if let Ok(account) = std::env::var("SAGA_FEE_ACCOUNT") {
            config.fees.fee_account = Some(account);
        }

        if let Ok(ttl) = std::env::var("SAGA_OTP_TTL_SECS") {
            config.otp.ttl_seconds = parse_env("SAGA_OTP_TTL_SECS", &ttl)?;
        }

        if let Ok(timeout) = std::env::var("SAGA_RECONCILIATION_TIMEOUT_SECS") {
            config.reconciliation.timeout_seconds =
                parse_env("SAGA_RECONCILIATION_TIMEOUT_SECS", &timeout)?;
        }

        Ok(config)
    }
}

fn parse_env<T>(name: &str, value: &str) -> crate::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", name, e)))
}
