pub mod analyzer;
pub mod backoff;
pub mod chat;
pub mod classifier;

pub use analyzer::{DocumentAnalyzer, ExtractedRow, LlmDocumentAnalyzer};
pub use backoff::{Backoff, retry};
pub use chat::ChatModel;
pub use classifier::LlmClassifier;
