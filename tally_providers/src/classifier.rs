use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tally_core::IntentClassifier;
use tracing::debug;

use crate::chat::ChatModel;

/// Last-resort intent router: asks the chat model which catalog label a
/// free-form message belongs to.
///
/// Parsing is deliberately tolerant; anything the model says that is not
/// a known label comes back as `None` and the caller treats it as a
/// routing miss.
pub struct LlmClassifier {
    chat: Arc<ChatModel>,
    model: String,
    labels: Vec<String>,
}

impl LlmClassifier {
    #[must_use]
    pub fn new(chat: Arc<ChatModel>, model: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            chat,
            model: model.into(),
            labels,
        }
    }

    fn prompt(&self) -> String {
        format!(
            "You label short messages sent to a budget assistant. \
             Reply with exactly one of: {}. \
             Reply with the single word none when nothing fits.",
            self.labels.join(", ")
        )
    }
}

/// Pick the label the model meant, tolerating case, punctuation, and a
/// chatty sentence around it.
fn parse_label(reply: &str, labels: &[String]) -> Option<String> {
    let normalized = reply.trim().to_lowercase();
    let bare = normalized.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_');
    if bare == "none" {
        return None;
    }
    if let Some(hit) = labels.iter().find(|label| label.as_str() == bare) {
        return Some(hit.clone());
    }
    labels
        .iter()
        .find(|label| normalized.contains(label.as_str()))
        .cloned()
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(&self, text: &str) -> anyhow::Result<Option<String>> {
        let reply = self
            .chat
            .complete(&self.model, &self.prompt(), json!(text))
            .await?;
        let label = parse_label(&reply, &self.labels);
        debug!(reply = %reply.trim(), ?label, "classifier verdict");
        Ok(label)
    }
}
