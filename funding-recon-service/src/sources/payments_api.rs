//! Payments provider API client.
//!
//! Serves both payment-side feeds: outbound disbursements
//! (`PaymentSource`) and inbound received payments (`FundingSource`).
//! The client owns its bearer token and refreshes it on expiry; nothing
//! about authentication leaks past this module. All calls carry bounded
//! timeouts and capped exponential backoff.

use super::{FundingSource, InboundPayment, OutboundPayment, PaymentSource};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use service_core::error::AppError;
use service_core::retry::{retry_upstream, RetryConfig};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

// Provider tokens expire after 900 s; refresh with 100 s of slack.
const TOKEN_TTL: Duration = Duration::from_secs(800);

/// Connection settings for the payments provider.
#[derive(Debug, Clone)]
pub struct PaymentsApiSettings {
    pub base_url: String,
    pub login_id: String,
    pub api_key: String,
    pub timeout_secs: u64,
    /// Case-insensitive substring filter on settlement account names;
    /// `None` takes every account.
    pub account_filter: Option<String>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct PaymentsApiClient {
    http: reqwest::Client,
    base_url: String,
    login_id: String,
    api_key: String,
    account_filter: Option<String>,
    token: Mutex<Option<CachedToken>>,
    retry: RetryConfig,
}

impl PaymentsApiClient {
    pub fn new(settings: PaymentsApiSettings, retry: RetryConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(anyhow::Error::new(e)))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            login_id: settings.login_id,
            api_key: settings.api_key,
            account_filter: settings.account_filter,
            token: Mutex::new(None),
            retry,
        })
    }

    /// Current bearer token, re-authenticating when the cached one has
    /// expired.
    async fn bearer(&self) -> Result<String, AppError> {
        let mut slot = self.token.lock().await;
        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let token = self.login().await?;
        *slot = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + TOKEN_TTL,
        });
        Ok(token)
    }

    async fn login(&self) -> Result<String, AppError> {
        info!(base_url = %self.base_url, login_id = %self.login_id, "Authenticating with payments provider");

        let resp = self
            .http
            .post(format!("{}/login", self.base_url))
            .json(&serde_json::json!({
                "loginId": self.login_id,
                "apiKey": self.api_key,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: LoginResponse = resp.json().await?;
        body.token()
            .ok_or_else(|| AppError::UpstreamProtocol(anyhow::anyhow!("login response carried no token")))
    }

    async fn try_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Expired token, not a protocol error: drop the cache so the
            // retry path re-authenticates.
            self.token.lock().await.take();
            return Err(AppError::Upstream(anyhow::anyhow!(
                "{path}: bearer token rejected"
            )));
        }

        let resp = resp.error_for_status()?;
        Ok(resp.json::<T>().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        retry_upstream(&self.retry, path, || self.try_get::<T>(path)).await
    }

    /// Settlement accounts, optionally filtered by name.
    async fn list_accounts(&self) -> Result<Vec<(String, String)>, AppError> {
        let envelope: Envelope<AccountAttrs> = self.get_json("/accounts").await?;
        let accounts = envelope
            .data
            .into_iter()
            .map(|r| (r.id, r.attributes.account_name.unwrap_or_default()))
            .filter(|(_, name)| match &self.account_filter {
                Some(filter) => name.to_lowercase().contains(&filter.to_lowercase()),
                None => true,
            })
            .collect();
        Ok(accounts)
    }
}

#[async_trait]
impl PaymentSource for PaymentsApiClient {
    async fn fetch(&self) -> Result<Vec<OutboundPayment>, AppError> {
        let accounts = self.list_accounts().await?;
        let mut payments = Vec::new();
        let mut skipped = 0usize;

        for (account_id, account_name) in &accounts {
            let envelope: Envelope<PaymentAttrs> = match self
                .get_json(&format!("/accounts/{account_id}/payments"))
                .await
            {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(account_id = %account_id, account = %account_name, error = %e, "failed to fetch outbound payments for account");
                    continue;
                }
            };

            for resource in envelope.data {
                let attrs = resource.attributes;
                let reference = attrs.payment_reference.unwrap_or_default();
                // References are `<tenant>.<code>`; anything without a
                // parseable correlation code cannot be reconciled here.
                let Some(code) = parse_correlation_code(&reference) else {
                    skipped += 1;
                    continue;
                };

                let recipient = attrs.recipient_details.unwrap_or_default();
                payments.push(OutboundPayment {
                    correlation_code: code,
                    payment_id: resource.id,
                    account_id: account_id.clone(),
                    amount: attrs.payment_amount.unwrap_or_default(),
                    currency: attrs.payment_currency.unwrap_or_default(),
                    status: attrs.payment_status.unwrap_or_default(),
                    date: attrs.payment_date.as_deref().and_then(parse_iso_date),
                    recipient: recipient.bank_account_name.unwrap_or_default(),
                    recipient_country: recipient.bank_account_country.unwrap_or_default(),
                });
            }
        }

        info!(
            accounts = accounts.len(),
            payments = payments.len(),
            skipped,
            "fetched outbound payments"
        );
        Ok(payments)
    }
}

#[async_trait]
impl FundingSource for PaymentsApiClient {
    async fn fetch(&self) -> Result<Vec<InboundPayment>, AppError> {
        let accounts = self.list_accounts().await?;
        let mut payments = Vec::new();

        for (account_id, account_name) in &accounts {
            let envelope: Envelope<ReceivedAttrs> = match self
                .get_json(&format!("/accounts/{account_id}/receivedPayments"))
                .await
            {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(account_id = %account_id, account = %account_name, error = %e, "failed to fetch received payments for account");
                    continue;
                }
            };

            for resource in envelope.data {
                let attrs = resource.attributes;
                let raw_info = attrs
                    .reference
                    .or(attrs.msl_reference1)
                    .unwrap_or_default();

                payments.push(InboundPayment {
                    payment_id: resource.id,
                    account_id: account_id.clone(),
                    account_name: account_name.clone(),
                    amount: attrs.amount.unwrap_or_default(),
                    currency: attrs.currency.unwrap_or_else(|| "USD".to_string()),
                    date: attrs.payment_date.as_deref().and_then(parse_iso_date),
                    status: attrs.payment_status.unwrap_or_default(),
                    payer_name: parse_payer_name(&raw_info),
                    raw_payer_info: raw_info,
                });
            }
        }

        info!(
            accounts = accounts.len(),
            payments = payments.len(),
            "fetched received payments"
        );
        Ok(payments)
    }
}

/// Extract a correlation code from a `<tenant>.<code>` payment reference.
pub fn parse_correlation_code(reference: &str) -> Option<String> {
    reference
        .split_once('.')
        .map(|(_, code)| code.trim())
        .filter(|code| !code.is_empty())
        .map(str::to_string)
}

/// Parse the date portion of a provider timestamp (`YYYY-MM-DD...`).
fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    let prefix = value.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Pull a payer name out of a bank narrative: drop reference numbers and
/// the usual transfer boilerplate, keep the words.
pub fn parse_payer_name(raw: &str) -> String {
    const NOISE: [&str; 12] = [
        "ACH", "WIRE", "CREDIT", "TRANSFER", "PAYMENT", "PMT", "REF", "TRN", "CCD", "CTX",
        "PPD", "ORIG",
    ];

    raw.split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|token| !token.is_empty())
        .filter(|token| !token.chars().any(|c| c.is_ascii_digit()))
        .filter(|token| !NOISE.contains(&token.to_ascii_uppercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

// JSON:API envelope shapes used by the provider.

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<Resource<T>>,
}

#[derive(Debug, Deserialize)]
struct Resource<T> {
    id: String,
    attributes: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountAttrs {
    account_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentAttrs {
    payment_amount: Option<f64>,
    payment_currency: Option<String>,
    payment_status: Option<String>,
    payment_date: Option<String>,
    payment_reference: Option<String>,
    recipient_details: Option<RecipientDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecipientDetails {
    bank_account_name: Option<String>,
    bank_account_country: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedAttrs {
    amount: Option<f64>,
    currency: Option<String>,
    payment_status: Option<String>,
    payment_date: Option<String>,
    reference: Option<String>,
    msl_reference1: Option<String>,
}

// Providers have shipped the token under several names; accept all of them.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
    access_token: Option<String>,
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    access_token: Option<String>,
}

impl LoginResponse {
    fn token(self) -> Option<String> {
        self.token
            .or(self.access_token)
            .or(self.data.and_then(|d| d.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_code_comes_after_the_tenant_prefix() {
        assert_eq!(
            parse_correlation_code("acmeeast.NVC7KVAR66CR"),
            Some("NVC7KVAR66CR".to_string())
        );
        assert_eq!(parse_correlation_code("no-separator"), None);
        assert_eq!(parse_correlation_code("tenant."), None);
        assert_eq!(parse_correlation_code(""), None);
    }

    #[test]
    fn payer_name_drops_reference_numbers_and_boilerplate() {
        assert_eq!(
            parse_payer_name("ACH CREDIT BBDO USA LLC REF 0012345"),
            "BBDO USA LLC"
        );
        assert_eq!(parse_payer_name("TRN 20260115 0042"), "");
        assert_eq!(parse_payer_name(""), "");
    }

    #[test]
    fn iso_date_parsing_tolerates_timestamps() {
        assert_eq!(
            parse_iso_date("2026-02-08T00:00:00Z"),
            NaiveDate::from_ymd_opt(2026, 2, 8)
        );
        assert_eq!(parse_iso_date("02/08/2026"), None);
        assert_eq!(parse_iso_date("bad"), None);
    }

    #[test]
    fn envelope_deserializes_provider_payload() {
        let json = r#"{
            "data": [{
                "id": "pay-1",
                "attributes": {
                    "paymentAmount": 1000.5,
                    "paymentCurrency": "USD",
                    "paymentStatus": "Cleared",
                    "paymentDate": "2026-02-08",
                    "paymentReference": "acmewest.NVC123",
                    "recipientDetails": {"bankAccountName": "Jane Doe", "bankAccountCountry": "US"}
                }
            }]
        }"#;
        let envelope: Envelope<PaymentAttrs> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.data.len(), 1);
        let attrs = &envelope.data[0].attributes;
        assert_eq!(attrs.payment_amount, Some(1000.5));
        assert_eq!(attrs.payment_reference.as_deref(), Some("acmewest.NVC123"));
    }

    #[test]
    fn empty_envelope_defaults_to_no_data() {
        let envelope: Envelope<ReceivedAttrs> = serde_json::from_str("{}").unwrap();
        assert!(envelope.data.is_empty());
    }

    #[test]
    fn login_response_accepts_every_token_shape() {
        let flat: LoginResponse = serde_json::from_str(r#"{"token": "t1"}"#).unwrap();
        assert_eq!(flat.token(), Some("t1".to_string()));

        let snake: LoginResponse = serde_json::from_str(r#"{"access_token": "t2"}"#).unwrap();
        assert_eq!(snake.token(), Some("t2".to_string()));

        let nested: LoginResponse =
            serde_json::from_str(r#"{"data": {"accessToken": "t3"}}"#).unwrap();
        assert_eq!(nested.token(), Some("t3".to_string()));

        let empty: LoginResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.token(), None);
    }
}
