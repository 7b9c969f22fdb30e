//! Funding matcher: probabilistic linkage of received payments to
//! remittance groups.
//!
//! Received payments carry no correlation code. Each unmatched payment is
//! scored against every remittance group on amount proximity (0.5), date
//! proximity (0.2) and payer-name similarity (0.3). A score of 0.8 or
//! more commits the link and cascades the funding leg across the whole
//! group; 0.5–0.8 records a suggestion for an operator; anything lower is
//! left alone. Already-matched payments are excluded from candidate
//! selection, so reruns are idempotent.

use crate::models::{MatchMethod, ReceivedPayment, RemittanceGroup};
use crate::services::database::Database;
use crate::services::embedding::{cosine_similarity, TextEmbedding};
use crate::services::engine::ReconEngine;
use crate::services::metrics;
use once_cell::sync::Lazy;
use regex::Regex;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

pub const AUTO_MATCH_THRESHOLD: f64 = 0.8;
pub const SUGGEST_THRESHOLD: f64 = 0.5;

const AMOUNT_WEIGHT: f64 = 0.5;
const DATE_WEIGHT: f64 = 0.2;
const PAYER_WEIGHT: f64 = 0.3;

/// Outcome of one matcher pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOutcome {
    pub scanned: usize,
    pub matched: usize,
    pub suggested: usize,
}

/// A scored remittance-group candidate for one received payment.
#[derive(Debug, Clone)]
pub struct GroupScore {
    pub group_id: String,
    pub total_amount: f64,
    pub description: String,
    pub code_count: i64,
    pub score: f64,
}

pub struct FundingMatcher {
    engine: ReconEngine,
    db: Arc<Database>,
    /// Canonical payer name -> known aliases.
    aliases: HashMap<String, Vec<String>>,
    /// Optional semantic annotator; consulted only for suggestion notes,
    /// never for the commit decision.
    embedding: Option<Arc<dyn TextEmbedding>>,
}

impl FundingMatcher {
    pub fn new(
        engine: ReconEngine,
        db: Arc<Database>,
        aliases: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            engine,
            db,
            aliases,
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Arc<dyn TextEmbedding>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Run one matcher pass over all unmatched received payments.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<MatchOutcome, AppError> {
        let unmatched = self.db.unmatched_received_payments().await?;
        if unmatched.is_empty() {
            info!("funding matcher: no unmatched received payments");
            return Ok(MatchOutcome::default());
        }

        let groups = self.db.remittance_groups().await?;
        let mut outcome = MatchOutcome {
            scanned: unmatched.len(),
            ..Default::default()
        };

        for payment in &unmatched {
            let Some((group, score)) = self.best_group(payment, &groups) else {
                continue;
            };

            if score >= AUTO_MATCH_THRESHOLD {
                self.commit(payment, group, score).await?;
                outcome.matched += 1;
            } else if score >= SUGGEST_THRESHOLD {
                let note = self.suggestion_note(payment, group, score);
                self.db
                    .mark_received_payment_suggested(&payment.payment_id, &note)
                    .await?;
                metrics::record_funding_match("suggested");
                outcome.suggested += 1;
            }
        }

        info!(
            scanned = outcome.scanned,
            matched = outcome.matched,
            suggested = outcome.suggested,
            "funding matcher pass complete"
        );
        Ok(outcome)
    }

    /// Per-group scores for one received payment, best first. Read-side
    /// view of the same scorer, for operator triage.
    #[instrument(skip(self))]
    pub async fn funding_suggestions(
        &self,
        payment_id: &str,
    ) -> Result<Vec<GroupScore>, AppError> {
        let payment = self
            .db
            .get_received_payment(payment_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("received payment {payment_id} not found"))
            })?;

        let groups = self.db.remittance_groups().await?;
        let mut scores: Vec<GroupScore> = groups
            .iter()
            .map(|group| GroupScore {
                group_id: group.group_id.clone(),
                total_amount: group.total_amount,
                description: group.description.clone(),
                code_count: group.code_count,
                score: score_candidate(&payment, group, &self.aliases),
            })
            .filter(|s| s.score > 0.0)
            .collect();

        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scores.truncate(10);
        Ok(scores)
    }

    fn best_group<'g>(
        &self,
        payment: &ReceivedPayment,
        groups: &'g [RemittanceGroup],
    ) -> Option<(&'g RemittanceGroup, f64)> {
        let mut best: Option<(&RemittanceGroup, f64)> = None;
        for group in groups {
            let score = score_candidate(payment, group, &self.aliases);
            if score <= 0.0 {
                continue;
            }
            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => best = Some((group, score)),
            }
        }
        best
    }

    async fn commit(
        &self,
        payment: &ReceivedPayment,
        group: &RemittanceGroup,
        score: f64,
    ) -> Result<(), AppError> {
        self.db
            .mark_received_payment_matched(
                &payment.payment_id,
                &group.group_id,
                score,
                MatchMethod::AutoAmountDatePayer.as_str(),
            )
            .await?;

        let codes = self.db.codes_in_group(&group.group_id).await?;
        self.engine.cascade_funding_leg(payment, &codes).await?;
        metrics::record_funding_match(MatchMethod::AutoAmountDatePayer.as_str());

        info!(
            payment_id = %payment.payment_id,
            amount = payment.amount,
            group_id = %group.group_id,
            score,
            linked = codes.len(),
            "received payment auto-matched"
        );
        Ok(())
    }

    fn suggestion_note(
        &self,
        payment: &ReceivedPayment,
        group: &RemittanceGroup,
        score: f64,
    ) -> String {
        let mut note = format!(
            "Suggested: group {} ({}, {:.2}) score {:.2}",
            group.group_id, group.description, group.total_amount, score
        );
        if let Some(embedding) = &self.embedding {
            if let Some(payer) = payment.payer_name.as_deref().filter(|p| !p.is_empty()) {
                let sim = cosine_similarity(
                    &embedding.embed(payer),
                    &embedding.embed(&group.description),
                );
                note.push_str(&format!(", semantic payer similarity {sim:.2}"));
            }
        }
        note
    }
}

/// Deterministic candidate score: amount proximity + date proximity +
/// payer-name similarity, weighted 0.5 / 0.2 / 0.3.
pub fn score_candidate(
    payment: &ReceivedPayment,
    group: &RemittanceGroup,
    aliases: &HashMap<String, Vec<String>>,
) -> f64 {
    let amount = amount_score(payment.amount, group.total_amount);
    let date = date_score(payment, group);
    let payer = PAYER_WEIGHT
        * payer_similarity(
            payment.payer_name.as_deref().unwrap_or(""),
            &group.description,
            aliases,
        );
    amount + date + payer
}

fn amount_score(payment_amount: f64, group_amount: f64) -> f64 {
    if payment_amount <= 0.0 || group_amount <= 0.0 {
        return 0.0;
    }
    let rel = (payment_amount - group_amount).abs() / payment_amount.max(group_amount);
    if rel <= 0.0001 {
        AMOUNT_WEIGHT
    } else if rel <= 0.01 {
        0.35
    } else if rel <= 0.05 {
        0.15
    } else {
        0.0
    }
}

fn date_score(payment: &ReceivedPayment, group: &RemittanceGroup) -> f64 {
    let (Some(payment_date), Some(group_date)) = (payment.payment_date, group.date) else {
        return 0.0;
    };
    let days = (payment_date - group_date).num_days().abs();
    if days == 0 {
        DATE_WEIGHT
    } else if days <= 1 {
        0.16
    } else if days <= 3 {
        0.10
    } else if days <= 7 {
        0.04
    } else {
        0.0
    }
}

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Z0-9 ]").expect("valid regex"));

const CORPORATE_SUFFIXES: [&str; 12] = [
    " LLC", " L.L.C.", " INC", " INC.", " LTD", " LTD.", " CORP", " CORP.", " CO", " CO.",
    " PLC", " LLP",
];

/// Normalize a company name for comparison: uppercase, strip corporate
/// suffixes, strip non-alphanumerics, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let mut name = name.trim().to_uppercase();
    loop {
        let mut stripped = false;
        for suffix in CORPORATE_SUFFIXES {
            if let Some(rest) = name.strip_suffix(suffix) {
                name = rest.trim_end().to_string();
                stripped = true;
            }
        }
        if !stripped {
            break;
        }
    }
    let name = NON_ALNUM.replace_all(&name, "");
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity of a payer name to a group description, in [0, 1].
///
/// Exact normalized match 1.0; alias-table match 0.9; substring
/// containment 0.6; otherwise word-overlap ratio scaled by 0.7 once it
/// clears one half.
pub fn payer_similarity(
    payer: &str,
    description: &str,
    aliases: &HashMap<String, Vec<String>>,
) -> f64 {
    if payer.trim().is_empty() || description.trim().is_empty() {
        return 0.0;
    }

    let p = normalize_name(payer);
    let d = normalize_name(description);
    if p.is_empty() || d.is_empty() {
        return 0.0;
    }

    if p == d {
        return 1.0;
    }

    for (canonical, alias_list) in aliases {
        let canon = normalize_name(canonical);
        let names: Vec<String> = std::iter::once(canon)
            .chain(alias_list.iter().map(|a| normalize_name(a)))
            .collect();
        if names.contains(&p) && names.contains(&d) {
            return 0.9;
        }
    }

    if p.contains(&d) || d.contains(&p) {
        return 0.6;
    }

    let p_words: std::collections::HashSet<&str> = p.split_whitespace().collect();
    let d_words: std::collections::HashSet<&str> = d.split_whitespace().collect();
    if p_words.is_empty() || d_words.is_empty() {
        return 0.0;
    }
    let overlap =
        p_words.intersection(&d_words).count() as f64 / p_words.len().max(d_words.len()) as f64;
    if overlap > 0.5 {
        overlap * 0.7
    } else {
        0.0
    }
}
