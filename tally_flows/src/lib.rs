//! The conversation flows of the budget assistant, plus the catalog
//! wiring that hands them to the orchestrator.
//!
//! Each flow implements `tally_core::Flow` and speaks to the outside
//! world only through the collaborator traits (`LedgerApi`,
//! `DocumentAnalyzer`, `CategorySuggester`), so every flow is testable
//! against hand-written fakes.

pub mod balance;
pub mod catalog;
pub mod categorize;
pub mod category_picker;
pub mod confirm;
pub mod document;
pub mod expense;

pub use catalog::{CATEGORIZATION_TTL, DOCUMENT_TTL, FlowSet, flow_set};
pub use categorize::{CategoryProposal, CategorySuggester, CategorySuggestion, LlmCategorySuggester};
pub use document::StagedBatch;
