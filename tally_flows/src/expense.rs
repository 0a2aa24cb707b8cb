//! Records a one-off expense or income transaction from chat phrasings
//! like "spent $12 at Cafe", "paid 8.50 for lunch", or "+45 refund".
//!
//! Slot-filling order: amount, then payee, then a delegated category
//! pick. Amounts are minor units; money spent is negative, money
//! received positive.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::{Value, json};
use tally_core::{ChildOutcome, Flow, FlowBlueprint, InboundEvent, Seed, Turn};
use tally_ledger::{Category, LedgerApi, NewTransaction, format_minor};
use tracing::info;

use crate::category_picker::CategoryPickerFlow;

static RULE_PATTERN: OnceLock<Regex> = OnceLock::new();
static SPEND_PATTERN: OnceLock<Regex> = OnceLock::new();
static INCOME_PATTERN: OnceLock<Regex> = OnceLock::new();
static BARE_AMOUNT_PATTERN: OnceLock<Regex> = OnceLock::new();

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn rule_pattern() -> &'static Regex {
    RULE_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:spent|paid|bought)\b|^\s*\+\s*\$?\d")
            .expect("Static regex pattern is guaranteed to be valid")
    })
}

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn spend_pattern() -> &'static Regex {
    SPEND_PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:spent|paid|bought)\s+\$?(?P<amount>\d+(?:\.\d{1,2})?)(?:\s+(?:at|on|for|to|from)\s+(?P<payee>.+?))?\s*$",
        )
        .expect("Static regex pattern is guaranteed to be valid")
    })
}

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn income_pattern() -> &'static Regex {
    INCOME_PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*\+\s*\$?(?P<amount>\d+(?:\.\d{1,2})?)(?:\s+(?:refund|income|salary))?(?:\s+from\s+(?P<payee>.+?))?\s*$",
        )
        .expect("Static regex pattern is guaranteed to be valid")
    })
}

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn bare_amount_pattern() -> &'static Regex {
    BARE_AMOUNT_PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(?P<sign>[+-])?\s*\$?(?P<amount>\d+(?:\.\d{1,2})?)\s*$")
            .expect("Static regex pattern is guaranteed to be valid")
    })
}

/// "12", "12.5", "12.50" -> minor units (1200, 1250, 1250).
fn parse_minor(text: &str) -> Option<i64> {
    let (whole, frac) = match text.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (text, ""),
    };
    let mut minor = whole.parse::<i64>().ok()?.checked_mul(100)?;
    if !frac.is_empty() {
        let cents = frac.parse::<i64>().ok()?;
        minor += if frac.len() == 1 { cents * 10 } else { cents };
    }
    Some(minor)
}

/// Parse a full expense/income phrasing into a signed amount and an
/// optional payee.
fn extract_phrase(text: &str) -> Option<(i64, Option<String>)> {
    if let Some(caps) = spend_pattern().captures(text) {
        let minor = parse_minor(caps.name("amount")?.as_str())?;
        let payee = caps.name("payee").map(|m| m.as_str().trim().to_string());
        return Some((-minor, payee));
    }
    if let Some(caps) = income_pattern().captures(text) {
        let minor = parse_minor(caps.name("amount")?.as_str())?;
        let payee = caps.name("payee").map(|m| m.as_str().trim().to_string());
        return Some((minor, payee));
    }
    None
}

/// Parse a bare amount answer; unsigned means money spent.
fn parse_bare_amount(text: &str) -> Option<i64> {
    let caps = bare_amount_pattern().captures(text)?;
    let minor = parse_minor(caps.name("amount")?.as_str())?;
    match caps.name("sign").map(|m| m.as_str()) {
        Some("+") => Some(minor),
        _ => Some(-minor),
    }
}

fn describe(amount_minor: i64, payee: &str) -> String {
    if amount_minor < 0 {
        format!("{} spent at {payee}", format_minor(-amount_minor))
    } else {
        format!("{} received from {payee}", format_minor(amount_minor))
    }
}

pub struct ExpenseFlow {
    ledger: Arc<dyn LedgerApi>,
    amount_minor: Option<i64>,
    payee: Option<String>,
    category: Option<Category>,
    awaiting_post: bool,
}

impl ExpenseFlow {
    fn new(ledger: Arc<dyn LedgerApi>, seed: &Seed) -> Self {
        Self {
            ledger,
            amount_minor: seed.get("amount_minor").and_then(Value::as_i64),
            payee: seed
                .get("payee")
                .and_then(Value::as_str)
                .map(str::to_string),
            category: None,
            awaiting_post: false,
        }
    }

    /// Post the collected transaction. Failures bubble up so the turn
    /// boundary apologizes and the next message retries right here.
    async fn post(&mut self) -> anyhow::Result<Turn> {
        let amount_minor = self
            .amount_minor
            .ok_or_else(|| anyhow::anyhow!("expense posted before the amount was collected"))?;
        let payee = self
            .payee
            .clone()
            .ok_or_else(|| anyhow::anyhow!("expense posted before the payee was collected"))?;

        let new = NewTransaction {
            account_id: None,
            date: Utc::now().date_naive(),
            payee: payee.clone(),
            amount_minor,
            category_id: self.category.as_ref().map(|c| c.id.clone()),
            note: None,
        };
        let recorded = self.ledger.create_transaction(&new).await?;
        info!(id = %recorded.id, amount_minor, "transaction recorded");

        let category_note = self
            .category
            .as_ref()
            .map_or_else(|| "uncategorized".to_string(), |c| c.name.clone());
        Ok(Turn::done(format!(
            "Recorded {} ({category_note}).",
            describe(amount_minor, &payee)
        )))
    }
}

#[async_trait]
impl Flow for ExpenseFlow {
    fn name(&self) -> &'static str {
        "expense"
    }

    fn step(&self) -> &'static str {
        if self.awaiting_post {
            "record"
        } else if self.amount_minor.is_none() {
            "collect_amount"
        } else if self.payee.is_none() {
            "collect_payee"
        } else {
            "pick_category"
        }
    }

    async fn on_turn(&mut self, event: &InboundEvent) -> anyhow::Result<Turn> {
        if self.awaiting_post {
            return self.post().await;
        }

        let text = event.trimmed();
        let mut consumed = false;

        if self.amount_minor.is_none() {
            if let Some((minor, payee)) = extract_phrase(text) {
                self.amount_minor = Some(minor);
                if self.payee.is_none() {
                    self.payee = payee;
                }
                consumed = true;
            } else if let Some(minor) = parse_bare_amount(text) {
                self.amount_minor = Some(minor);
                consumed = true;
            } else {
                return Ok(Turn::reply(
                    "How much was it? Something like 12.50, or +45 for money received.",
                ));
            }
        } else if let Some((minor, payee)) = extract_phrase(text) {
            // a full phrasing is the seeding message arriving as the
            // first turn, or a restatement; never a payee answer
            self.amount_minor = Some(minor);
            if payee.is_some() {
                self.payee = payee;
            }
            consumed = true;
        }

        if self.payee.is_none() {
            if consumed || text.is_empty() {
                return Ok(Turn::reply("Who was that to?"));
            }
            self.payee = Some(text.to_string());
        }

        Ok(Turn::delegate(CategoryPickerFlow::new(Arc::clone(
            &self.ledger,
        ))))
    }

    async fn on_child_complete(&mut self, outcome: ChildOutcome) -> anyhow::Result<Turn> {
        self.category = match outcome {
            ChildOutcome::Completed { value, .. } => serde_json::from_value(value).ok(),
            // picker bowed out; record the transaction uncategorized
            ChildOutcome::Cancelled { .. } => None,
        };
        self.awaiting_post = true;
        self.post().await
    }
}

pub struct ExpenseBlueprint {
    ledger: Arc<dyn LedgerApi>,
}

impl ExpenseBlueprint {
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerApi>) -> Self {
        Self { ledger }
    }
}

impl FlowBlueprint for ExpenseBlueprint {
    fn name(&self) -> &'static str {
        "expense"
    }

    fn label(&self) -> Option<&'static str> {
        Some("add_expense")
    }

    fn rule_matches(&self, text: &str) -> bool {
        rule_pattern().is_match(text)
    }

    fn extract(&self, text: &str) -> Option<Seed> {
        let (amount_minor, payee) = extract_phrase(text)?;
        let mut seed = Seed::new();
        seed.insert("amount_minor".to_string(), json!(amount_minor));
        if let Some(payee) = payee {
            seed.insert("payee".to_string(), json!(payee));
        }
        Some(seed)
    }

    fn build(&self, seed: Seed) -> Box<dyn Flow> {
        Box::new(ExpenseFlow::new(Arc::clone(&self.ledger), &seed))
    }
}
