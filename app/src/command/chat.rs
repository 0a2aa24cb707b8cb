//! Terminal conversation with the same orchestrator the bot runs.
//!
//! Useful for trying flows without a Telegram token; the conversation
//! state machinery is identical, only the transport differs.

use std::io::Write;
use std::sync::Arc;

use tally_core::{InboundEvent, Orchestrator, QueueError, UserKey};
use tracing::info;

use super::CommandStrategy;
use tally_config::Config;

/// Input parameters for the Chat command strategy.
#[derive(Debug, Clone)]
pub struct ChatInput {
    /// Optional single message to send (non-interactive mode)
    pub message: Option<String>,
}

/// Strategy for executing the Chat command.
#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

fn cli_user() -> UserKey {
    UserKey::from("cli:default")
}

async fn send(orchestrator: &Arc<Orchestrator>, text: &str) -> anyhow::Result<String> {
    let event = InboundEvent::message(cli_user(), text);
    match orchestrator.handle(event).await {
        Ok(reply) => Ok(reply),
        Err(QueueError::Discarded) => Ok("(discarded)".to_string()),
    }
}

async fn run_interactive(orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    println!("Talking to tally. Type 'exit' to leave.");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit") {
            break;
        }

        let reply = send(&orchestrator, text).await?;
        println!("{reply}");
    }
    info!("Conversation ended");
    Ok(())
}

impl CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;
        let orchestrator = super::build_orchestrator(&config);

        match input.message {
            Some(message) => {
                let reply = send(&orchestrator, &message).await?;
                println!("{reply}");
            }
            None => run_interactive(orchestrator).await?,
        }

        Ok(())
    }
}
