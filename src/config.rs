use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::warn;

use crate::model::BoundaryPolicy;
use crate::pricing::TierLengths;

/// Runtime configuration, read from `HIRELINE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub boundary_policy: BoundaryPolicy,
    pub tiers: TierLengths,
    /// Fallback when the customer has no currency of its own.
    pub currency: String,
    /// Default tax rate in percent.
    pub tax_rate: Decimal,
    pub sync: SyncConfig,
    pub ledger: LedgerConfig,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound on one external call; elapsed means `Failed`.
    pub timeout: Duration,
    /// External calls in flight at once during a bulk retry.
    pub concurrency: usize,
    /// Attempts kept per record.
    pub history_limit: usize,
    pub retry_interval: Duration,
}

/// Fixed values stamped on every ledger invoice line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub account_code: String,
    pub tax_type: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            boundary_policy: BoundaryPolicy::Strict,
            tiers: TierLengths::default(),
            currency: "USD".into(),
            tax_rate: Decimal::ZERO,
            sync: SyncConfig::default(),
            ledger: LedgerConfig::default(),
            metrics_port: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            concurrency: 4,
            history_limit: 10,
            retry_interval: Duration::from_secs(3600),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            account_code: "200".into(),
            tax_type: "OUTPUT".into(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to the default
    /// with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let boundary_policy = match get("HIRELINE_BOUNDARY_POLICY").as_deref() {
            None => defaults.boundary_policy,
            Some(v) => parse_policy(v).unwrap_or_else(|| {
                warn!("HIRELINE_BOUNDARY_POLICY={v:?} not recognised, using strict");
                BoundaryPolicy::Strict
            }),
        };

        let month_days = parse_or(
            "HIRELINE_MONTH_DAYS",
            get("HIRELINE_MONTH_DAYS"),
            defaults.tiers.month_days,
        );
        let week_days = parse_or(
            "HIRELINE_WEEK_DAYS",
            get("HIRELINE_WEEK_DAYS"),
            defaults.tiers.week_days,
        );
        let tiers = TierLengths::new(month_days, week_days).unwrap_or_else(|| {
            warn!("tier lengths {month_days}/{week_days} invalid, using defaults");
            TierLengths::default()
        });

        let sync = SyncConfig {
            timeout: Duration::from_secs(parse_or(
                "HIRELINE_SYNC_TIMEOUT_SECS",
                get("HIRELINE_SYNC_TIMEOUT_SECS"),
                defaults.sync.timeout.as_secs(),
            )),
            concurrency: parse_or(
                "HIRELINE_SYNC_CONCURRENCY",
                get("HIRELINE_SYNC_CONCURRENCY"),
                defaults.sync.concurrency,
            )
            .max(1),
            history_limit: parse_or(
                "HIRELINE_SYNC_HISTORY",
                get("HIRELINE_SYNC_HISTORY"),
                defaults.sync.history_limit,
            ),
            retry_interval: Duration::from_secs(
                parse_or(
                    "HIRELINE_SYNC_RETRY_INTERVAL_SECS",
                    get("HIRELINE_SYNC_RETRY_INTERVAL_SECS"),
                    defaults.sync.retry_interval.as_secs(),
                )
                .max(1),
            ),
        };

        Self {
            boundary_policy,
            tiers,
            currency: get("HIRELINE_CURRENCY")
                .map(|c| c.to_uppercase())
                .unwrap_or(defaults.currency),
            tax_rate: parse_or("HIRELINE_TAX_RATE", get("HIRELINE_TAX_RATE"), defaults.tax_rate),
            sync,
            ledger: LedgerConfig {
                account_code: get("HIRELINE_LEDGER_ACCOUNT_CODE")
                    .unwrap_or(defaults.ledger.account_code),
                tax_type: get("HIRELINE_LEDGER_TAX_TYPE").unwrap_or(defaults.ledger.tax_type),
            },
            metrics_port: get("HIRELINE_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }
}

fn parse_policy(value: &str) -> Option<BoundaryPolicy> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Some(BoundaryPolicy::Strict),
        "turnaround" => Some(BoundaryPolicy::Turnaround),
        _ => None,
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> T {
    match value {
        None => default,
        Some(v) => v.parse().unwrap_or_else(|_| {
            warn!("{key}={v:?} is not valid, using default");
            default
        }),
    }
}
