//! Delegated helper that asks the user to pick one budget category.
//!
//! Completes with a `{"id", "name"}` value for the parent, or cancels
//! when the user skips so the parent can record without a category.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tally_core::{Flow, InboundEvent, Turn};
use tally_ledger::{Category, LedgerApi};

pub struct CategoryPickerFlow {
    ledger: Arc<dyn LedgerApi>,
    // None until the list was fetched and shown; the event that created
    // this flow is consumed by that first listing turn.
    options: Option<Vec<Category>>,
}

impl CategoryPickerFlow {
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerApi>) -> Self {
        Self {
            ledger,
            options: None,
        }
    }

    fn render(options: &[Category]) -> String {
        let mut lines = vec!["Which category?".to_string()];
        for (index, category) in options.iter().enumerate() {
            lines.push(format!("{}. {}", index + 1, category.name));
        }
        lines.push("Reply with a number or a name, or 'skip'.".to_string());
        lines.join("\n")
    }

    fn pick<'a>(options: &'a [Category], answer: &str) -> Option<&'a Category> {
        if let Ok(index) = answer.parse::<usize>() {
            return index.checked_sub(1).and_then(|i| options.get(i));
        }
        options
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(answer))
    }
}

#[async_trait]
impl Flow for CategoryPickerFlow {
    fn name(&self) -> &'static str {
        "category_picker"
    }

    fn step(&self) -> &'static str {
        if self.options.is_none() {
            "fetch_options"
        } else {
            "awaiting_choice"
        }
    }

    async fn on_turn(&mut self, event: &InboundEvent) -> anyhow::Result<Turn> {
        let Some(options) = self.options.as_deref() else {
            // Fetch errors leave `options` unset, so the next message
            // lands back here and refetches.
            let categories = self.ledger.categories().await?;
            if categories.is_empty() {
                return Ok(Turn::cancel("No categories set up yet."));
            }
            let listing = Self::render(&categories);
            self.options = Some(categories);
            return Ok(Turn::reply(listing));
        };

        let answer = event.trimmed();
        if matches!(
            answer.to_lowercase().as_str(),
            "skip" | "none" | "cancel" | "no"
        ) {
            return Ok(Turn::cancel("Okay, leaving it uncategorized."));
        }

        match Self::pick(options, answer) {
            Some(category) => Ok(Turn::done_with(
                format!("{} it is.", category.name),
                json!({ "id": category.id, "name": category.name }),
            )),
            None => Ok(Turn::reply(
                "I don't know that category. Reply with a number or a name from the list, or 'skip'.",
            )),
        }
    }
}
