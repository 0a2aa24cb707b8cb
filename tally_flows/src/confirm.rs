//! Document import, commit half: a standalone flow that takes the
//! staged batch and posts it to the ledger. Standalone because the
//! staging flow has already terminated by the time the user confirms;
//! the router starts this one from a fresh rule match.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use tally_core::{Flow, FlowBlueprint, InboundEvent, Seed, StageCache, Turn, UserKey};
use tally_ledger::{LedgerApi, NewTransaction};
use tally_providers::ExtractedRow;
use tracing::{info, warn};

use crate::document::StagedBatch;

static RULE_PATTERN: OnceLock<Regex> = OnceLock::new();
static CONFIRM_PATTERN: OnceLock<Regex> = OnceLock::new();
static DISCARD_PATTERN: OnceLock<Regex> = OnceLock::new();

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn rule_pattern() -> &'static Regex {
    RULE_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:confirm|discard)\b|^\s*import them\b")
            .expect("Static regex pattern is guaranteed to be valid")
    })
}

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn confirm_pattern() -> &'static Regex {
    CONFIRM_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:confirm|yes|import(?:\s+them)?|go ahead)\s*[.!]?\s*$")
            .expect("Static regex pattern is guaranteed to be valid")
    })
}

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn discard_pattern() -> &'static Regex {
    DISCARD_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:discard|drop(?:\s+(?:it|them))?)\s*[.!]?\s*$")
            .expect("Static regex pattern is guaranteed to be valid")
    })
}

/// Rows without a parseable date are booked on the day of the import.
fn row_date(row: &ExtractedRow) -> NaiveDate {
    row.date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .unwrap_or_else(|| Utc::now().date_naive())
}

pub struct ImportConfirmFlow {
    ledger: Arc<dyn LedgerApi>,
    stage: Arc<StageCache<StagedBatch>>,
}

impl ImportConfirmFlow {
    /// Post the batch row by row. On a ledger failure the unposted tail
    /// goes back into the stage, so the next 'confirm' picks up where
    /// this one stopped instead of double-booking the head.
    async fn commit(&self, user: &UserKey, batch: StagedBatch) -> anyhow::Result<Turn> {
        let total = batch.rows.len();
        for (posted, row) in batch.rows.iter().enumerate() {
            let new = NewTransaction {
                account_id: None,
                date: row_date(row),
                payee: row.payee.clone(),
                amount_minor: row.amount_minor,
                category_id: None,
                note: row.note.clone(),
            };
            if let Err(err) = self.ledger.create_transaction(&new).await {
                warn!(
                    user = %user,
                    batch = %batch.batch_id,
                    posted,
                    total,
                    %err,
                    "import interrupted, re-staging the remainder"
                );
                let remainder = StagedBatch {
                    batch_id: batch.batch_id,
                    rows: batch.rows[posted..].to_vec(),
                    file_name: batch.file_name,
                };
                self.stage.put(user.clone(), remainder);
                return Ok(Turn::reply(format!(
                    "Imported {posted} of {total} transaction(s), then the ledger stopped answering. Reply 'confirm' to retry the rest."
                )));
            }
        }
        info!(user = %user, batch = %batch.batch_id, total, "import committed");
        Ok(Turn::done(format!("Imported {total} transaction(s).")))
    }
}

#[async_trait]
impl Flow for ImportConfirmFlow {
    fn name(&self) -> &'static str {
        "import_confirm"
    }

    async fn on_turn(&mut self, event: &InboundEvent) -> anyhow::Result<Turn> {
        let text = event.trimmed();

        if discard_pattern().is_match(text) {
            return Ok(if self.stage.remove(&event.user) {
                Turn::done("Discarded the staged import.")
            } else {
                Turn::done("There's nothing staged to discard.")
            });
        }

        if confirm_pattern().is_match(text) {
            return match self.stage.take(&event.user) {
                Some(batch) => self.commit(&event.user, batch).await,
                None => Ok(Turn::done(
                    "That import batch has expired. Please resend the document.",
                )),
            };
        }

        // Rule-matched but ambiguous ("confirm tomorrow"); ask again.
        Ok(Turn::reply(
            "Reply 'confirm' to import the staged transactions, or 'discard' to drop them.",
        ))
    }
}

pub struct ImportConfirmBlueprint {
    ledger: Arc<dyn LedgerApi>,
    stage: Arc<StageCache<StagedBatch>>,
}

impl ImportConfirmBlueprint {
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerApi>, stage: Arc<StageCache<StagedBatch>>) -> Self {
        Self { ledger, stage }
    }
}

impl FlowBlueprint for ImportConfirmBlueprint {
    fn name(&self) -> &'static str {
        "import_confirm"
    }

    fn rule_matches(&self, text: &str) -> bool {
        rule_pattern().is_match(text)
    }

    fn build(&self, _seed: Seed) -> Box<dyn Flow> {
        Box::new(ImportConfirmFlow {
            ledger: Arc::clone(&self.ledger),
            stage: Arc::clone(&self.stage),
        })
    }
}
