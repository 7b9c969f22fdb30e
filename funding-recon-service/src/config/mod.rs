//! Configuration module for funding-recon-service.

use crate::sources::payments_api::PaymentsApiSettings;
use service_core::config as core_config;
use service_core::error::AppError;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct FundingReconConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub inbox: InboxConfig,
    pub tenant_db: TenantDbConfig,
    pub payments_api: PaymentsApiSettings,
    /// Canonical payer name -> known aliases, for the funding matcher.
    pub payer_aliases: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub lookback_days: i64,
}

#[derive(Debug, Clone)]
pub struct InboxConfig {
    pub drop_dir: PathBuf,
    pub source_tag: String,
}

#[derive(Debug, Clone)]
pub struct TenantDbConfig {
    pub url: String,
    pub tenants: Vec<String>,
    pub max_connections: u32,
}

impl FundingReconConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "funding-recon-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::Config(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
            },
            sync: SyncConfig {
                interval_secs: env_parse("SYNC_INTERVAL_SECS", 300),
                lookback_days: env_parse("SYNC_LOOKBACK_DAYS", 60),
            },
            inbox: InboxConfig {
                drop_dir: env::var("REMITTANCE_DROP_DIR")
                    .unwrap_or_else(|_| "data/remittances".to_string())
                    .into(),
                source_tag: env::var("REMITTANCE_SOURCE_TAG")
                    .unwrap_or_else(|_| "remittance_csv".to_string()),
            },
            tenant_db: TenantDbConfig {
                url: env::var("TENANT_DB_URL")
                    .unwrap_or_else(|_| "postgres://localhost:5432/ledger".to_string()),
                tenants: env::var("TENANT_ALLOWLIST")
                    .map(|raw| {
                        raw.split(',')
                            .map(str::trim)
                            .filter(|t| !t.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                max_connections: env_parse("TENANT_DB_MAX_CONNECTIONS", 4),
            },
            payments_api: PaymentsApiSettings {
                base_url: env::var("PAYMENTS_API_URL")
                    .unwrap_or_else(|_| "https://corpapi.example.com".to_string()),
                login_id: env::var("PAYMENTS_API_LOGIN_ID")
                    .unwrap_or_else(|_| "funding-recon".to_string()),
                api_key: env::var("PAYMENTS_API_KEY").unwrap_or_default(),
                timeout_secs: env_parse("PAYMENTS_API_TIMEOUT_SECS", 30),
                account_filter: env::var("PAYMENTS_ACCOUNT_FILTER").ok(),
            },
            payer_aliases: parse_aliases(env::var("PAYER_ALIASES").ok())?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// `PAYER_ALIASES` is a JSON object: canonical name -> list of aliases.
fn parse_aliases(raw: Option<String>) -> Result<HashMap<String, Vec<String>>, AppError> {
    match raw {
        None => Ok(HashMap::new()),
        Some(raw) => serde_json::from_str(&raw).map_err(|e| {
            AppError::Config(anyhow::anyhow!("PAYER_ALIASES is not a valid JSON map: {e}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_map_parses_from_json() {
        let parsed = parse_aliases(Some(
            r#"{"Precision Marketing": ["Precision Mktg Group"]}"#.to_string(),
        ))
        .unwrap();
        assert_eq!(
            parsed.get("Precision Marketing"),
            Some(&vec!["Precision Mktg Group".to_string()])
        );
    }

    #[test]
    fn missing_alias_map_is_empty() {
        assert!(parse_aliases(None).unwrap().is_empty());
    }

    #[test]
    fn invalid_alias_map_is_a_config_error() {
        let result = parse_aliases(Some("not json".to_string()));
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
