#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Conversation orchestration core.
//!
//! Everything stateful about a conversation lives here: the per-user
//! serialization queue, the session map with inactivity expiry, the flow
//! contract with parent→child delegation, the layered intent router, and
//! the TTL staging cache that bridges extract-then-confirm workflows.
//! Domain flows, the chat transport, and remote collaborators plug in
//! through the traits defined in this crate; none of them are named here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod cache;
pub mod catalog;
pub mod flow;
pub mod orchestrator;
pub mod queue;
pub mod router;
pub mod session;

pub use cache::{StageCache, StagedNamespace};
pub use catalog::{FlowBlueprint, FlowCatalog, Seed};
pub use flow::{CancelOutcome, ChildOutcome, Flow, FlowInstance, FlowStatus, FrameInfo, Turn};
pub use orchestrator::{CancelReport, Orchestrator, ResetOutcome, StageStatus, StatusReport};
pub use queue::{QueueError, SerialQueue};
pub use router::{IntentRouter, RouteDecision, RouteKind};
pub use session::{
    DEFAULT_SESSION_TIMEOUT, SessionLease, SessionManager, SessionSnapshot, TurnOutcome,
};

/// Opaque, stable identifier for a conversation participant.
///
/// Every core map (sessions, queue lanes, staged caches) is partitioned by
/// this key; no cross-user state exists. Transports decide what the string
/// holds (a chat id, `"cli:default"`, ...), the core never inspects it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserKey(String);

impl UserKey {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for UserKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Kind of document payload attached to an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// A photo (receipt snapshot, screenshot of a statement).
    Photo,
    /// A PDF document (bank statement, invoice).
    Pdf,
}

impl AttachmentKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Pdf => "pdf",
        }
    }

    /// MIME type the transport fetched this payload as.
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Photo => "image/jpeg",
            Self::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary payload attached to an event, already fetched by the transport.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub payload: Vec<u8>,
    pub file_name: Option<String>,
}

impl Attachment {
    #[must_use]
    pub fn new(kind: AttachmentKind, payload: Vec<u8>) -> Self {
        Self {
            kind,
            payload,
            file_name: None,
        }
    }

    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

/// One inbound event as delivered by the transport adapter.
///
/// `text` may be empty when the event only carries an attachment (captions,
/// when present, arrive in `text`).
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub user: UserKey,
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl InboundEvent {
    /// Plain text event.
    #[must_use]
    pub fn message(user: UserKey, text: impl Into<String>) -> Self {
        Self {
            user,
            text: text.into(),
            attachment: None,
        }
    }

    /// Event carrying a document; `caption` may be empty.
    #[must_use]
    pub fn document(user: UserKey, caption: impl Into<String>, attachment: Attachment) -> Self {
        Self {
            user,
            text: caption.into(),
            attachment: Some(attachment),
        }
    }

    /// Trimmed text, the form every matcher sees.
    #[must_use]
    pub fn trimmed(&self) -> &str {
        self.text.trim()
    }

    #[must_use]
    pub const fn has_attachment(&self) -> bool {
        self.attachment.is_some()
    }
}

/// External natural-language classifier, the router's last-resort strategy.
///
/// Implementations return one label out of a fixed set agreed with the
/// registered blueprints, or `Ok(None)` when the text matches nothing they
/// know. Failures are reported as errors; the router tolerates them and
/// treats the strategy as a miss, so implementations must never panic.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> anyhow::Result<Option<String>>;
}
