//! Layered intent routing for events no flow has claimed yet.
//!
//! Strategies cascade, cheapest first: attachment short-circuit, then one
//! rule pass over the catalog, then one extractor pass, then the intent
//! classifier. Within a pass, catalog registration order decides ties.
//! The classifier is the only strategy allowed to fail, and its failure
//! degrades to a miss instead of failing the event.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog::{FlowBlueprint, FlowCatalog, Seed};
use crate::{InboundEvent, IntentClassifier};

/// Which strategy claimed the event. Carried for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Attachment,
    Rule,
    Extractor,
    Classifier,
}

impl RouteKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attachment => "attachment",
            Self::Rule => "rule",
            Self::Extractor => "extractor",
            Self::Classifier => "classifier",
        }
    }
}

/// Outcome of routing one event.
pub enum RouteDecision {
    /// Start a fresh instance of `blueprint`, seeded with whatever the
    /// winning strategy pre-parsed.
    Start {
        blueprint: Arc<dyn FlowBlueprint>,
        seed: Seed,
        kind: RouteKind,
    },
    /// No strategy claimed the event.
    Miss,
}

impl RouteDecision {
    fn start(blueprint: Arc<dyn FlowBlueprint>, seed: Seed, kind: RouteKind) -> Self {
        debug!(
            flow = blueprint.name(),
            strategy = kind.as_str(),
            "routed event"
        );
        Self::Start {
            blueprint,
            seed,
            kind,
        }
    }
}

/// Routes unclaimed events to catalog blueprints.
pub struct IntentRouter {
    catalog: Arc<FlowCatalog>,
    classifier: Option<Arc<dyn IntentClassifier>>,
}

impl IntentRouter {
    #[must_use]
    pub fn new(catalog: Arc<FlowCatalog>) -> Self {
        Self {
            catalog,
            classifier: None,
        }
    }

    /// Attach the fallback classifier. Without one, events that no rule,
    /// extractor, or attachment claims are plain misses.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &FlowCatalog {
        &self.catalog
    }

    /// Decide what to do with an event that reached the router.
    ///
    /// Never fails: a broken classifier is logged and treated as a miss
    /// so that one dead collaborator cannot black-hole user messages.
    pub async fn route(&self, event: &InboundEvent) -> RouteDecision {
        if let Some(attachment) = &event.attachment {
            if let Some(blueprint) = self.catalog.attachment_target(attachment.kind) {
                return RouteDecision::start(blueprint, Seed::new(), RouteKind::Attachment);
            }
            debug!(
                kind = attachment.kind.as_str(),
                "no flow claims this attachment kind, falling back to text"
            );
        }

        let text = event.trimmed();
        if text.is_empty() {
            return RouteDecision::Miss;
        }

        for blueprint in self.catalog.iter() {
            if blueprint.rule_matches(text) {
                return RouteDecision::start(Arc::clone(blueprint), Seed::new(), RouteKind::Rule);
            }
        }

        for blueprint in self.catalog.iter() {
            if let Some(seed) = blueprint.extract(text) {
                return RouteDecision::start(Arc::clone(blueprint), seed, RouteKind::Extractor);
            }
        }

        if let Some(classifier) = &self.classifier {
            match classifier.classify(text).await {
                Ok(Some(label)) => {
                    if let Some(blueprint) = self.catalog.by_label(&label) {
                        return RouteDecision::start(blueprint, Seed::new(), RouteKind::Classifier);
                    }
                    warn!(label, "classifier answered with an unknown label");
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("intent classifier failed, treating as miss: {err:#}");
                }
            }
        }

        RouteDecision::Miss
    }
}
