use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tally_core::{Attachment, AttachmentKind};
use tracing::info;

use crate::chat::ChatModel;

/// One transaction row pulled out of a receipt or statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRow {
    /// ISO date as printed on the document, when legible.
    #[serde(default)]
    pub date: Option<String>,
    pub payee: String,
    /// Minor units; negative for money spent.
    pub amount_minor: i64,
    #[serde(default)]
    pub note: Option<String>,
}

/// Turns an uploaded document into candidate transaction rows.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(&self, attachment: &Attachment) -> anyhow::Result<Vec<ExtractedRow>>;
}

const EXTRACTION_PROMPT: &str = "You read receipts and bank statements. \
    Reply with a JSON array only. One object per transaction with fields: \
    date (ISO 8601 string or null), payee (string), amount_minor (integer \
    minor units, negative for money spent), note (string or null). \
    Reply [] when the document carries no transactions.";

/// Vision-model implementation: ships the document to the multimodal
/// completions endpoint and reads rows back out of the reply.
pub struct LlmDocumentAnalyzer {
    chat: Arc<ChatModel>,
    model: String,
}

impl LlmDocumentAnalyzer {
    #[must_use]
    pub fn new(chat: Arc<ChatModel>, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }
}

/// Pull the JSON array out of a possibly chatty model reply.
fn parse_rows(reply: &str) -> anyhow::Result<Vec<ExtractedRow>> {
    let start = reply
        .find('[')
        .ok_or_else(|| anyhow::anyhow!("analyzer reply carries no JSON array"))?;
    let end = reply
        .rfind(']')
        .ok_or_else(|| anyhow::anyhow!("analyzer reply carries no JSON array"))?;
    if end < start {
        anyhow::bail!("analyzer reply carries no JSON array");
    }
    Ok(serde_json::from_str(&reply[start..=end])?)
}

#[async_trait]
impl DocumentAnalyzer for LlmDocumentAnalyzer {
    async fn analyze(&self, attachment: &Attachment) -> anyhow::Result<Vec<ExtractedRow>> {
        let mime = attachment.kind.mime();
        let part = match attachment.kind {
            AttachmentKind::Photo => ChatModel::image_part(mime, &attachment.payload),
            AttachmentKind::Pdf => {
                let name = attachment.file_name.as_deref().unwrap_or("statement.pdf");
                ChatModel::file_part(name, mime, &attachment.payload)
            }
        };
        let content = json!([
            ChatModel::text_part("Extract the transactions from this document."),
            part,
        ]);

        info!(
            kind = attachment.kind.as_str(),
            bytes = attachment.payload.len(),
            "analyzing document"
        );
        let reply = self.chat.complete(&self.model, EXTRACTION_PROMPT, content).await?;
        let rows = parse_rows(&reply)?;
        info!(rows = rows.len(), "document analysis finished");
        Ok(rows)
    }
}
