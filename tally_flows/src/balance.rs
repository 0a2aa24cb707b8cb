//! Single-turn account balance report. Finishes on its first turn, so
//! it never leaves a session behind.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tally_core::{Flow, FlowBlueprint, InboundEvent, Seed, Turn};
use tally_ledger::{Account, LedgerApi, format_minor};

static RULE_PATTERN: OnceLock<Regex> = OnceLock::new();

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn rule_pattern() -> &'static Regex {
    RULE_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\bbalances?\b").expect("Static regex pattern is guaranteed to be valid")
    })
}

fn render(accounts: &[Account]) -> String {
    let open: Vec<&Account> = accounts.iter().filter(|a| !a.closed).collect();
    if open.is_empty() {
        return "No accounts in the budget yet.".to_string();
    }
    let mut lines: Vec<String> = open
        .iter()
        .map(|a| format!("• {}: {}", a.name, format_minor(a.balance_minor)))
        .collect();
    let total: i64 = open.iter().map(|a| a.balance_minor).sum();
    lines.push(format!("Total: {}", format_minor(total)));
    lines.join("\n")
}

pub struct BalanceFlow {
    ledger: Arc<dyn LedgerApi>,
}

#[async_trait]
impl Flow for BalanceFlow {
    fn name(&self) -> &'static str {
        "balance"
    }

    async fn on_turn(&mut self, _event: &InboundEvent) -> anyhow::Result<Turn> {
        let accounts = self.ledger.accounts().await?;
        Ok(Turn::done(render(&accounts)))
    }
}

pub struct BalanceBlueprint {
    ledger: Arc<dyn LedgerApi>,
}

impl BalanceBlueprint {
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerApi>) -> Self {
        Self { ledger }
    }
}

impl FlowBlueprint for BalanceBlueprint {
    fn name(&self) -> &'static str {
        "balance"
    }

    fn label(&self) -> Option<&'static str> {
        Some("show_balance")
    }

    fn rule_matches(&self, text: &str) -> bool {
        rule_pattern().is_match(text)
    }

    fn build(&self, _seed: Seed) -> Box<dyn Flow> {
        Box::new(BalanceFlow {
            ledger: Arc::clone(&self.ledger),
        })
    }
}
