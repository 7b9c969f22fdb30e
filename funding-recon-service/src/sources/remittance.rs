//! Remittance notice normalizer and the file-drop inbox source.
//!
//! Notices arrive as CSV exports: a few `Key: value` metadata lines
//! (account, payment date, payment total), then a tab-separated line-item
//! table carrying one correlation code per row. A single unparseable line
//! is skipped and counted; it never fails the notice, and a notice that
//! fails to parse never fails the batch.

use super::{RemittanceLine, RemittanceNotice, RemittanceSource};
use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::error::AppError;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Parse one remittance CSV export into a normalized notice.
pub fn parse_remittance_csv(
    text: &str,
    message_id: &str,
    source: &str,
) -> Result<RemittanceNotice, AppError> {
    let text = text.trim_start_matches('\u{feff}');

    let mut account_number = None;
    let mut payment_date = None;
    let mut payment_amount = None;
    let mut data_start = None;

    let lines: Vec<&str> = text.lines().collect();
    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if let Some(value) = line.strip_prefix("Account Number:") {
            account_number = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("Payment date:") {
            payment_date = parse_date(value.trim());
        } else if line.starts_with("Payment Amount") {
            payment_amount = line
                .split_once(':')
                .and_then(|(_, value)| parse_amount(value));
        } else if line.starts_with("Ref Number") {
            data_start = Some(i);
            break;
        }
    }

    let Some(data_start) = data_start else {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "remittance {message_id}: no line-item header found"
        )));
    };

    let data_section = lines[data_start..].join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(data_section.as_bytes());

    let mut items = Vec::new();
    let mut payer = String::new();
    let mut skipped = 0usize;

    for result in reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                skipped += 1;
                debug!(message_id, error = %e, "skipping unreadable remittance line");
                continue;
            }
        };

        let code = record.get(1).unwrap_or("").trim();
        let amount = record.get(6).and_then(parse_amount);
        let (Some(amount), false) = (amount, code.is_empty()) else {
            skipped += 1;
            continue;
        };

        if payer.is_empty() {
            if let Some(company) = record.get(3) {
                payer = company.trim().to_string();
            }
        }

        items.push(RemittanceLine {
            correlation_code: code.to_string(),
            description: record.get(2).unwrap_or("").trim().to_string(),
            amount,
        });
    }

    if skipped > 0 {
        warn!(
            message_id,
            skipped,
            parsed = items.len(),
            "remittance contained unparseable line items"
        );
    }

    debug!(
        message_id,
        account = account_number.as_deref().unwrap_or(""),
        lines = items.len(),
        "parsed remittance notice"
    );

    Ok(RemittanceNotice {
        message_id: message_id.to_string(),
        source: source.to_string(),
        payer,
        payment_date,
        payment_amount,
        lines: items,
    })
}

fn parse_amount(value: &str) -> Option<f64> {
    let cleaned = value.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
}

/// Remittance source reading CSV exports from a drop directory.
///
/// The directory stands at the mailbox boundary: whatever delivers the
/// exports (mail pipe, SFTP drop, manual download) is outside this
/// service. Files are not consumed; re-reading a file re-upserts the same
/// legs, which is a no-op.
pub struct FileDropInbox {
    dir: PathBuf,
    source: String,
}

impl FileDropInbox {
    pub fn new(dir: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            source: source.into(),
        }
    }
}

#[async_trait]
impl RemittanceSource for FileDropInbox {
    async fn fetch(&self) -> Result<Vec<RemittanceNotice>, AppError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                return Err(AppError::Upstream(anyhow::anyhow!(
                    "remittance drop directory {}: {e}",
                    self.dir.display()
                )));
            }
        };

        let mut notices = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Upstream(anyhow::Error::new(e)))?
        {
            let path = entry.path();
            let is_csv = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if !is_csv {
                continue;
            }

            let message_id = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();

            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable remittance file");
                    continue;
                }
            };

            match parse_remittance_csv(&text, &message_id, &self.source) {
                Ok(notice) => notices.push(notice),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparseable remittance file");
                }
            }
        }

        info!(
            dir = %self.dir.display(),
            notices = notices.len(),
            "fetched remittance notices"
        );
        Ok(notices)
    }
}
