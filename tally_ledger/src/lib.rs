pub mod client;
pub mod error;
pub mod types;

pub use client::{LedgerApi, LedgerClient};
pub use error::{Error, Result};
pub use types::{Account, Category, NewTransaction, Transaction, format_minor};
