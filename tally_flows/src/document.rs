//! Document import, stage half: run the analyzer over an attached
//! statement, stage the extracted rows, and terminate. The commit half
//! lives in [`crate::confirm`], reached by a fresh routing decision.

use std::sync::Arc;

use async_trait::async_trait;
use tally_core::{
    AttachmentKind, Flow, FlowBlueprint, InboundEvent, Seed, StageCache, Turn, UserKey,
};
use tally_ledger::format_minor;
use tally_providers::{DocumentAnalyzer, ExtractedRow};
use tracing::info;
use uuid::Uuid;

const PREVIEW_ROWS: usize = 5;

/// Extracted rows parked between the analysis turn and the confirm turn.
#[derive(Debug, Clone)]
pub struct StagedBatch {
    pub batch_id: Uuid,
    pub rows: Vec<ExtractedRow>,
    pub file_name: Option<String>,
}

impl StagedBatch {
    #[must_use]
    pub fn new(rows: Vec<ExtractedRow>, file_name: Option<String>) -> Self {
        Self {
            batch_id: Uuid::now_v7(),
            rows,
            file_name,
        }
    }
}

fn preview(rows: &[ExtractedRow]) -> String {
    let mut lines: Vec<String> = rows
        .iter()
        .take(PREVIEW_ROWS)
        .map(|row| match &row.date {
            Some(date) => format!("• {date} {}: {}", row.payee, format_minor(row.amount_minor)),
            None => format!("• {}: {}", row.payee, format_minor(row.amount_minor)),
        })
        .collect();
    if rows.len() > PREVIEW_ROWS {
        lines.push(format!("…and {} more", rows.len() - PREVIEW_ROWS));
    }
    lines.join("\n")
}

pub struct DocumentImportFlow {
    analyzer: Arc<dyn DocumentAnalyzer>,
    stage: Arc<StageCache<StagedBatch>>,
}

impl DocumentImportFlow {
    fn stage_batch(&self, user: &UserKey, batch: StagedBatch) -> Turn {
        let count = batch.rows.len();
        let listing = preview(&batch.rows);
        info!(user = %user, batch = %batch.batch_id, rows = count, "staged document batch");
        self.stage.put(user.clone(), batch);
        Turn::done(format!(
            "Found {count} transaction(s):\n{listing}\nReply 'confirm' to import them, or 'discard' to drop them."
        ))
    }
}

#[async_trait]
impl Flow for DocumentImportFlow {
    fn name(&self) -> &'static str {
        "document_import"
    }

    fn step(&self) -> &'static str {
        "awaiting_document"
    }

    async fn on_turn(&mut self, event: &InboundEvent) -> anyhow::Result<Turn> {
        let Some(attachment) = event.attachment.as_ref() else {
            // Routed here by text alone; the flow stays until a document
            // arrives or the user cancels.
            return Ok(Turn::reply(
                "Send me the statement as a photo or a PDF and I'll read it.",
            ));
        };

        // Analyzer errors bubble to the turn boundary; a resend retries.
        let rows = self.analyzer.analyze(attachment).await?;
        if rows.is_empty() {
            return Ok(Turn::done(
                "I couldn't find any transactions in that document.",
            ));
        }
        Ok(self.stage_batch(&event.user, StagedBatch::new(rows, attachment.file_name.clone())))
    }
}

pub struct DocumentImportBlueprint {
    analyzer: Arc<dyn DocumentAnalyzer>,
    stage: Arc<StageCache<StagedBatch>>,
}

impl DocumentImportBlueprint {
    #[must_use]
    pub fn new(analyzer: Arc<dyn DocumentAnalyzer>, stage: Arc<StageCache<StagedBatch>>) -> Self {
        Self { analyzer, stage }
    }
}

impl FlowBlueprint for DocumentImportBlueprint {
    fn name(&self) -> &'static str {
        "document_import"
    }

    fn label(&self) -> Option<&'static str> {
        Some("import_document")
    }

    fn claims_attachment(&self, kind: AttachmentKind) -> bool {
        matches!(kind, AttachmentKind::Photo | AttachmentKind::Pdf)
    }

    fn build(&self, _seed: Seed) -> Box<dyn Flow> {
        Box::new(DocumentImportFlow {
            analyzer: Arc::clone(&self.analyzer),
            stage: Arc::clone(&self.stage),
        })
    }
}
