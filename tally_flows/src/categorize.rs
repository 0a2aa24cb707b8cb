//! Bulk categorization: draft category suggestions for uncategorized
//! transactions, stage them, and apply on approval.
//!
//! The proposal outlives the conversation: it sits in a staged
//! namespace with a long TTL, so "apply the categories" still works
//! after the chat session itself has expired.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tally_core::{Flow, FlowBlueprint, InboundEvent, Seed, StageCache, Turn, UserKey};
use tally_ledger::{Category, LedgerApi, Transaction, format_minor};
use tally_providers::ChatModel;
use tracing::{debug, info, warn};

/// How many uncategorized transactions one proposal covers at most.
const PROPOSAL_LIMIT: usize = 20;

static RULE_PATTERN: OnceLock<Regex> = OnceLock::new();
static APPLY_PATTERN: OnceLock<Regex> = OnceLock::new();
static APPLY_ENTRY_PATTERN: OnceLock<Regex> = OnceLock::new();
static CANCEL_PATTERN: OnceLock<Regex> = OnceLock::new();

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn rule_pattern() -> &'static Regex {
    RULE_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*categori[sz]e\b|\buncategori[sz]ed\b")
            .expect("Static regex pattern is guaranteed to be valid")
    })
}

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn apply_pattern() -> &'static Regex {
    APPLY_PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:apply|accept|yes)(?:\s+(?:the\s+|my\s+)?(?:categor(?:y|ies)|suggestions?))?\s*[.!]?\s*$",
        )
        .expect("Static regex pattern is guaranteed to be valid")
    })
}

// Entering from scratch needs the object spelled out; a bare "apply"
// only counts inside an ongoing categorize conversation.
#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn apply_entry_pattern() -> &'static Regex {
    APPLY_ENTRY_PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:apply|accept)\s+(?:the\s+|my\s+)?(?:categor(?:y|ies)|suggestions?)\s*[.!]?\s*$",
        )
        .expect("Static regex pattern is guaranteed to be valid")
    })
}

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn cancel_pattern() -> &'static Regex {
    CANCEL_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:cancel|no|leave\s+(?:it|them))\s*[.!]?\s*$")
            .expect("Static regex pattern is guaranteed to be valid")
    })
}

/// One transaction-to-category pairing inside a proposal.
#[derive(Debug, Clone)]
pub struct CategorySuggestion {
    pub transaction_id: String,
    pub payee: String,
    pub amount_minor: i64,
    pub category_id: String,
    pub category_name: String,
}

/// A staged set of suggestions awaiting approval.
#[derive(Debug, Clone)]
pub struct CategoryProposal {
    pub suggestions: Vec<CategorySuggestion>,
}

/// Produces transaction-to-category pairings. The flow only trusts
/// pairs whose ids it can resolve against the ledger's own lists.
#[async_trait]
pub trait CategorySuggester: Send + Sync {
    /// Returns `(transaction_id, category_id)` pairs; unknown or
    /// unsure transactions are simply left out.
    async fn suggest(
        &self,
        transactions: &[Transaction],
        categories: &[Category],
    ) -> anyhow::Result<Vec<(String, String)>>;
}

/// Resolve suggested pairs against the fetched lists, dropping any the
/// model hallucinated.
fn join_suggestions(
    pairs: &[(String, String)],
    transactions: &[Transaction],
    categories: &[Category],
) -> Vec<CategorySuggestion> {
    pairs
        .iter()
        .filter_map(|(transaction_id, category_id)| {
            let transaction = transactions.iter().find(|t| &t.id == transaction_id)?;
            let category = categories.iter().find(|c| &c.id == category_id)?;
            Some(CategorySuggestion {
                transaction_id: transaction.id.clone(),
                payee: transaction
                    .payee
                    .clone()
                    .unwrap_or_else(|| "(no payee)".to_string()),
                amount_minor: transaction.amount_minor,
                category_id: category.id.clone(),
                category_name: category.name.clone(),
            })
        })
        .collect()
}

fn render(proposal: &CategoryProposal) -> String {
    let mut lines = vec!["Here's what I'd file them under:".to_string()];
    for s in &proposal.suggestions {
        lines.push(format!(
            "• {} ({}): {}",
            s.payee,
            format_minor(s.amount_minor),
            s.category_name
        ));
    }
    lines.push("Reply 'apply' to accept, or 'cancel' to leave things as they are.".to_string());
    lines.join("\n")
}

pub struct CategorizeFlow {
    ledger: Arc<dyn LedgerApi>,
    suggester: Arc<dyn CategorySuggester>,
    stage: Arc<StageCache<CategoryProposal>>,
    proposal_shown: bool,
}

impl CategorizeFlow {
    async fn draft(&mut self, user: &UserKey) -> anyhow::Result<Turn> {
        let transactions = self.ledger.uncategorized(PROPOSAL_LIMIT).await?;
        if transactions.is_empty() {
            return Ok(Turn::done("Everything is categorized already."));
        }
        let categories = self.ledger.categories().await?;
        if categories.is_empty() {
            return Ok(Turn::done(
                "No categories set up yet, so there's nothing to file them under.",
            ));
        }
        let pairs = self.suggester.suggest(&transactions, &categories).await?;
        let suggestions = join_suggestions(&pairs, &transactions, &categories);
        if suggestions.is_empty() {
            return Ok(Turn::done(
                "I couldn't come up with confident suggestions this time.",
            ));
        }
        info!(user = %user, count = suggestions.len(), "category proposal drafted");
        let proposal = CategoryProposal { suggestions };
        let listing = render(&proposal);
        self.stage.put(user.clone(), proposal);
        self.proposal_shown = true;
        Ok(Turn::reply(listing))
    }

    /// Apply row by row; on a ledger failure the unapplied tail is
    /// re-staged so a later 'apply' resumes instead of re-doing the head.
    async fn apply(&mut self, user: &UserKey, proposal: CategoryProposal) -> anyhow::Result<Turn> {
        let total = proposal.suggestions.len();
        for (applied, s) in proposal.suggestions.iter().enumerate() {
            if let Err(err) = self
                .ledger
                .set_category(&s.transaction_id, &s.category_id)
                .await
            {
                warn!(
                    user = %user,
                    applied,
                    total,
                    %err,
                    "categorization interrupted, re-staging the remainder"
                );
                self.stage.put(
                    user.clone(),
                    CategoryProposal {
                        suggestions: proposal.suggestions[applied..].to_vec(),
                    },
                );
                self.proposal_shown = true;
                return Ok(Turn::reply(format!(
                    "Categorized {applied} of {total} transaction(s), then the ledger stopped answering. Reply 'apply' to retry the rest."
                )));
            }
        }
        info!(user = %user, total, "category proposal applied");
        Ok(Turn::done(format!("Categorized {total} transaction(s).")))
    }
}

#[async_trait]
impl Flow for CategorizeFlow {
    fn name(&self) -> &'static str {
        "categorize"
    }

    fn step(&self) -> &'static str {
        if self.proposal_shown {
            "awaiting_approval"
        } else {
            "drafting"
        }
    }

    async fn on_turn(&mut self, event: &InboundEvent) -> anyhow::Result<Turn> {
        let text = event.trimmed();

        if !self.proposal_shown {
            // "apply the categories" with no ongoing conversation means
            // the user is coming back for an earlier proposal.
            if apply_pattern().is_match(text) {
                return match self.stage.take(&event.user) {
                    Some(proposal) => self.apply(&event.user, proposal).await,
                    None => Ok(Turn::done(
                        "No category proposal on hand anymore. Say 'categorize' and I'll draft a fresh one.",
                    )),
                };
            }
            return self.draft(&event.user).await;
        }

        if cancel_pattern().is_match(text) {
            let _ = self.stage.remove(&event.user);
            return Ok(Turn::cancel("Okay, leaving them as they are."));
        }
        if apply_pattern().is_match(text) {
            return match self.stage.take(&event.user) {
                Some(proposal) => self.apply(&event.user, proposal).await,
                None => Ok(Turn::done(
                    "That proposal has expired. Say 'categorize' and I'll draft a fresh one.",
                )),
            };
        }
        Ok(Turn::reply(
            "Reply 'apply' to accept the suggestions, or 'cancel' to leave things as they are.",
        ))
    }
}

pub struct CategorizeBlueprint {
    ledger: Arc<dyn LedgerApi>,
    suggester: Arc<dyn CategorySuggester>,
    stage: Arc<StageCache<CategoryProposal>>,
}

impl CategorizeBlueprint {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerApi>,
        suggester: Arc<dyn CategorySuggester>,
        stage: Arc<StageCache<CategoryProposal>>,
    ) -> Self {
        Self {
            ledger,
            suggester,
            stage,
        }
    }
}

impl FlowBlueprint for CategorizeBlueprint {
    fn name(&self) -> &'static str {
        "categorize"
    }

    fn label(&self) -> Option<&'static str> {
        Some("categorize_transactions")
    }

    fn rule_matches(&self, text: &str) -> bool {
        rule_pattern().is_match(text) || apply_entry_pattern().is_match(text)
    }

    fn build(&self, _seed: Seed) -> Box<dyn Flow> {
        Box::new(CategorizeFlow {
            ledger: Arc::clone(&self.ledger),
            suggester: Arc::clone(&self.suggester),
            stage: Arc::clone(&self.stage),
            proposal_shown: false,
        })
    }
}

const SUGGESTION_PROMPT: &str = "You label bank transactions with budget categories. \
Reply with only a JSON array of objects shaped like \
{\"transaction_id\": \"...\", \"category_id\": \"...\"}. \
Leave out any transaction you are unsure about.";

#[derive(Deserialize)]
struct SuggestedPair {
    transaction_id: String,
    category_id: String,
}

fn parse_pairs(reply: &str) -> anyhow::Result<Vec<(String, String)>> {
    let start = reply
        .find('[')
        .ok_or_else(|| anyhow::anyhow!("suggester reply carries no JSON array"))?;
    let end = reply
        .rfind(']')
        .ok_or_else(|| anyhow::anyhow!("suggester reply carries no JSON array"))?;
    let pairs: Vec<SuggestedPair> = serde_json::from_str(&reply[start..=end])?;
    Ok(pairs
        .into_iter()
        .map(|p| (p.transaction_id, p.category_id))
        .collect())
}

/// Chat-model-backed suggester.
pub struct LlmCategorySuggester {
    chat: Arc<ChatModel>,
    model: String,
}

impl LlmCategorySuggester {
    #[must_use]
    pub fn new(chat: Arc<ChatModel>, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }

    fn describe(transactions: &[Transaction], categories: &[Category]) -> String {
        let mut lines = vec!["Categories:".to_string()];
        for c in categories {
            lines.push(format!("{}: {}", c.id, c.name));
        }
        lines.push("Transactions:".to_string());
        for t in transactions {
            lines.push(format!(
                "{}: {} {}",
                t.id,
                t.payee.as_deref().unwrap_or("(no payee)"),
                format_minor(t.amount_minor)
            ));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl CategorySuggester for LlmCategorySuggester {
    async fn suggest(
        &self,
        transactions: &[Transaction],
        categories: &[Category],
    ) -> anyhow::Result<Vec<(String, String)>> {
        let listing = Self::describe(transactions, categories);
        let reply = self
            .chat
            .complete(&self.model, SUGGESTION_PROMPT, json!(listing))
            .await?;
        let pairs = parse_pairs(&reply)?;
        debug!(suggested = pairs.len(), "suggester answered");
        Ok(pairs)
    }
}
