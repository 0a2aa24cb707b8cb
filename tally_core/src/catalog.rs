//! Flow catalog: the set of flows the router can start.
//!
//! Registration order is routing priority: the rule and extractor scans
//! walk blueprints in the order they were registered and the first claim
//! wins.

use std::sync::Arc;
use tracing::info;

use crate::AttachmentKind;
use crate::flow::Flow;

/// Pre-parsed data handed to a freshly built flow. Produced by
/// [`FlowBlueprint::extract`]; opaque to everything outside the flow.
pub type Seed = serde_json::Map<String, serde_json::Value>;

/// Describes one flow to the router and builds instances of it.
///
/// All hooks are cheap and synchronous; anything that talks to the
/// outside world belongs in the flow itself.
pub trait FlowBlueprint: Send + Sync {
    /// Stable flow name; instances must report the same one.
    fn name(&self) -> &'static str;

    /// Label the intent classifier may answer with, if this flow takes
    /// part in the classifier fallback.
    fn label(&self) -> Option<&'static str> {
        None
    }

    /// Cheap textual trigger, checked before any extraction happens.
    fn rule_matches(&self, _text: &str) -> bool {
        false
    }

    /// Try to pre-parse structured data out of the text. Returning `Some`
    /// claims the event even when no rule fired.
    fn extract(&self, _text: &str) -> Option<Seed> {
        None
    }

    /// Whether this flow takes over events carrying this attachment kind.
    fn claims_attachment(&self, _kind: AttachmentKind) -> bool {
        false
    }

    /// Build a fresh instance. `seed` holds whatever [`Self::extract`]
    /// produced; it is empty when the route came from a rule, a label, or
    /// an attachment.
    fn build(&self, seed: Seed) -> Box<dyn Flow>;
}

/// Ordered collection of flow blueprints.
#[derive(Default)]
pub struct FlowCatalog {
    blueprints: Vec<Arc<dyn FlowBlueprint>>,
}

impl FlowCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, blueprint: Arc<dyn FlowBlueprint>) {
        info!(flow = blueprint.name(), "registering flow");
        self.blueprints.push(blueprint);
    }

    /// Blueprints in registration (priority) order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn FlowBlueprint>> {
        self.blueprints.iter()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn FlowBlueprint>> {
        self.blueprints
            .iter()
            .find(|b| b.name() == name)
            .map(Arc::clone)
    }

    #[must_use]
    pub fn by_label(&self, label: &str) -> Option<Arc<dyn FlowBlueprint>> {
        self.blueprints
            .iter()
            .find(|b| b.label() == Some(label))
            .map(Arc::clone)
    }

    /// First blueprint that claims the given attachment kind.
    #[must_use]
    pub fn attachment_target(&self, kind: AttachmentKind) -> Option<Arc<dyn FlowBlueprint>> {
        self.blueprints
            .iter()
            .find(|b| b.claims_attachment(kind))
            .map(Arc::clone)
    }

    /// Every label the classifier is allowed to answer with.
    #[must_use]
    pub fn labels(&self) -> Vec<&'static str> {
        self.blueprints.iter().filter_map(|b| b.label()).collect()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.blueprints.iter().map(|b| b.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }
}
