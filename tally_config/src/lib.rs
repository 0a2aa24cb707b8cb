pub mod schema;

pub use schema::{Config, LedgerConfig, OrchestrationConfig, ProvidersConfig, TelegramConfig};
