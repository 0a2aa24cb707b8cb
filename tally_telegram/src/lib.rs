//! Telegram transport: teloxide dispatch on one side, orchestrator
//! events on the other. No flow logic lives here.

pub mod bot;
pub mod command;
pub mod error;
pub mod handler;

pub use bot::TallyBot;
pub use command::Command;
pub use error::{Error, Result};
