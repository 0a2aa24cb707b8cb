//! Wires every blueprint into one catalog, in routing priority order,
//! together with the staged namespaces the flows share.

use std::sync::Arc;
use std::time::Duration;

use tally_core::{FlowCatalog, StageCache, StagedNamespace};
use tally_ledger::LedgerApi;
use tally_providers::DocumentAnalyzer;

use crate::balance::BalanceBlueprint;
use crate::categorize::{CategorizeBlueprint, CategoryProposal, CategorySuggester};
use crate::confirm::ImportConfirmBlueprint;
use crate::document::{DocumentImportBlueprint, StagedBatch};
use crate::expense::ExpenseBlueprint;

/// Staged document batches go stale quickly; a confirm minutes later
/// should re-read the statement, not trust old numbers.
pub const DOCUMENT_TTL: Duration = Duration::from_secs(5 * 60);

/// Category proposals stay actionable as long as a chat session would.
pub const CATEGORIZATION_TTL: Duration = Duration::from_secs(30 * 60);

/// The assembled catalog plus the staged namespaces it writes to.
///
/// The namespaces are exposed so the orchestrator can register them for
/// reset, status, and sweeping.
pub struct FlowSet {
    pub catalog: FlowCatalog,
    pub documents: Arc<StageCache<StagedBatch>>,
    pub proposals: Arc<StageCache<CategoryProposal>>,
}

impl FlowSet {
    /// Type-erased views of every staged namespace, for orchestrator
    /// registration.
    #[must_use]
    pub fn stages(&self) -> Vec<Arc<dyn StagedNamespace>> {
        let documents: Arc<dyn StagedNamespace> = self.documents.clone();
        let proposals: Arc<dyn StagedNamespace> = self.proposals.clone();
        vec![documents, proposals]
    }
}

/// Build the full flow catalog.
///
/// Registration order is routing priority: attachments and concrete
/// phrasings before the broad matchers, the confirm flow last so
/// 'confirm' never shadows anything more specific.
#[must_use]
pub fn flow_set(
    ledger: Arc<dyn LedgerApi>,
    analyzer: Arc<dyn DocumentAnalyzer>,
    suggester: Arc<dyn CategorySuggester>,
    document_ttl: Duration,
    categorization_ttl: Duration,
) -> FlowSet {
    let documents = Arc::new(StageCache::new("document_import", document_ttl));
    let proposals = Arc::new(StageCache::new("category_proposal", categorization_ttl));

    let mut catalog = FlowCatalog::new();
    catalog.register(Arc::new(DocumentImportBlueprint::new(
        Arc::clone(&analyzer),
        Arc::clone(&documents),
    )));
    catalog.register(Arc::new(ExpenseBlueprint::new(Arc::clone(&ledger))));
    catalog.register(Arc::new(BalanceBlueprint::new(Arc::clone(&ledger))));
    catalog.register(Arc::new(CategorizeBlueprint::new(
        Arc::clone(&ledger),
        suggester,
        Arc::clone(&proposals),
    )));
    catalog.register(Arc::new(ImportConfirmBlueprint::new(
        ledger,
        Arc::clone(&documents),
    )));

    FlowSet {
        catalog,
        documents,
        proposals,
    }
}
