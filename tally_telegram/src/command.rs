use teloxide::types::BotCommand;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Cancel,
    Reset,
    Status,
}

impl Command {
    fn all() -> Vec<BotCommand> {
        vec![
            BotCommand {
                command: "start".to_string(),
                description: "Welcome and a quick tour".to_string(),
            },
            BotCommand {
                command: "help".to_string(),
                description: "Show what I understand".to_string(),
            },
            BotCommand {
                command: "cancel".to_string(),
                description: "Stop the current step".to_string(),
            },
            BotCommand {
                command: "reset".to_string(),
                description: "Drop the conversation and staged work".to_string(),
            },
            BotCommand {
                command: "status".to_string(),
                description: "Show what we're in the middle of".to_string(),
            },
        ]
    }

    #[must_use]
    pub fn bot_commands() -> Vec<BotCommand> {
        Self::all()
    }

    #[must_use]
    pub fn parse_from_text(text: &str) -> Option<Self> {
        let text = text.trim().to_lowercase();

        // Remove bot mention if present (e.g., "/reset@tally_bot")
        let text = text.split('@').next().unwrap_or(&text).to_string();

        match text.as_str() {
            "/start" => Some(Self::Start),
            "/help" => Some(Self::Help),
            "/cancel" => Some(Self::Cancel),
            "/reset" => Some(Self::Reset),
            "/status" => Some(Self::Status),
            _ => None,
        }
    }

    #[must_use]
    pub const fn help_text() -> &'static str {
        r"
🤖 Tally Budget Bot

Commands:
/start  - welcome and a quick tour
/cancel - stop the current step
/reset  - drop the conversation and staged work
/status - show what we're in the middle of
/help   - show this message

Things you can say:
• spent $12 at Cafe
• my balance
• categorize my transactions

Or send a photo or PDF of a statement and I'll import it.
"
    }

    #[must_use]
    pub const fn welcome_text() -> &'static str {
        r"
👋 Welcome to Tally!

I keep your budget up to date straight from chat:
• tell me about expenses as they happen
• send statements or receipts and I'll import them
• ask for your balance any time

Send /help to see everything I understand.
"
    }
}
