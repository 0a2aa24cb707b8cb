//! Static strategy pattern for CLI commands.
//!
//! Each command is a separate strategy with its own input type, so
//! dispatch stays static and `main` is nothing but argument plumbing.

use std::sync::Arc;
use tally_config::Config;
use tally_core::{IntentClassifier, Orchestrator};
use tally_flows::{CategorySuggester, FlowSet, LlmCategorySuggester, flow_set};
use tally_ledger::{LedgerApi, LedgerClient};
use tally_providers::{ChatModel, DocumentAnalyzer, LlmClassifier, LlmDocumentAnalyzer};
use tracing::info;

mod chat;
mod info;
mod init;
mod telegram;
mod version;

pub use chat::{ChatInput, ChatStrategy};
pub use info::InfoStrategy;
pub use init::InitStrategy;
pub use telegram::{TelegramInput, TelegramStrategy};
pub use version::VersionStrategy;

/// Assemble the orchestrator from config: one chat model shared by the
/// classifier, the analyzer, and the suggester, one ledger client, and
/// the full flow catalog with its staged namespaces.
fn build_orchestrator(config: &Config) -> Arc<Orchestrator> {
    let chat = Arc::new(
        ChatModel::new(config.providers.api_key.clone())
            .with_base_url(config.providers.base_url.clone()),
    );
    let ledger: Arc<dyn LedgerApi> = Arc::new(LedgerClient::new(
        config.ledger.base_url.clone(),
        config.ledger.api_key.clone(),
        config.ledger.budget.clone(),
    ));
    let analyzer: Arc<dyn DocumentAnalyzer> = Arc::new(LlmDocumentAnalyzer::new(
        Arc::clone(&chat),
        config.providers.vision_model.clone(),
    ));
    let suggester: Arc<dyn CategorySuggester> = Arc::new(LlmCategorySuggester::new(
        Arc::clone(&chat),
        config.providers.chat_model.clone(),
    ));

    let flows: FlowSet = flow_set(
        ledger,
        analyzer,
        suggester,
        config.orchestration.document_ttl(),
        config.orchestration.categorization_ttl(),
    );
    let stages = flows.stages();

    let labels: Vec<String> = flows
        .catalog
        .labels()
        .iter()
        .map(ToString::to_string)
        .collect();
    info!(flows = ?flows.catalog.names(), "flow catalog assembled");
    let classifier: Arc<dyn IntentClassifier> = Arc::new(LlmClassifier::new(
        Arc::clone(&chat),
        config.providers.chat_model.clone(),
        labels,
    ));

    let mut orchestrator = Orchestrator::new(Arc::new(flows.catalog))
        .with_classifier(classifier)
        .with_session_timeout(config.orchestration.session_timeout());
    for stage in stages {
        orchestrator = orchestrator.with_stage(stage);
    }
    Arc::new(orchestrator)
}

/// Core trait defining the contract for all command strategies.
///
/// Each strategy defines its own input type via an associated type, so
/// parameter passing stays type-safe with no boxing and no runtime
/// casting; every call is monomorphized.
pub trait CommandStrategy: Send + Sync + 'static {
    /// The input type this strategy accepts.
    type Input;

    /// Execute the command with the given input.
    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}
