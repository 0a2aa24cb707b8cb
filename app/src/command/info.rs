use tally_config::Config;

/// Strategy for displaying configuration information.
///
/// Outputs the resolved configuration with every secret masked:
/// provider key and models, ledger endpoint and budget, Telegram
/// settings, and the orchestration timeouts.
#[derive(Debug, Clone, Copy)]
pub struct InfoStrategy;

impl super::CommandStrategy for InfoStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;

        println!("=== tally Configuration ===\n");

        println!("Provider:");
        println!("  API Key: {}", mask_key(&config.providers.api_key));
        println!("  Base URL: {}", config.providers.base_url);
        println!("  Chat Model: {}", config.providers.chat_model);
        println!("  Vision Model: {}", config.providers.vision_model);
        println!();

        println!("Ledger:");
        println!("  Base URL: {}", config.ledger.base_url);
        println!("  API Key: {}", mask_key(&config.ledger.api_key));
        println!("  Budget: {}", config.ledger.budget);
        println!();

        println!("Telegram:");
        println!("  Enabled: {}", config.telegram.enabled);
        let token = if config.telegram.token.is_empty() {
            "(not set)".to_string()
        } else if config.telegram.token.len() > 8 {
            format!("{}...***", &config.telegram.token[..8])
        } else {
            "***".to_string()
        };
        println!("  Token: {token}");
        if config.telegram.allow_from.is_empty() {
            println!("  Allow From: (empty - all users allowed)");
        } else {
            println!("  Allow From: {}", config.telegram.allow_from.join(", "));
        }
        println!();

        println!("Orchestration:");
        println!(
            "  Session Timeout: {}m",
            config.orchestration.session_timeout_minutes
        );
        println!(
            "  Categorization TTL: {}m",
            config.orchestration.categorization_ttl_minutes
        );
        println!(
            "  Document TTL: {}m",
            config.orchestration.document_ttl_minutes
        );
        println!(
            "  Sweep Interval: {}s",
            config.orchestration.sweep_interval_seconds
        );

        Ok(())
    }
}

fn mask_key(key: &str) -> String {
    if key.is_empty() {
        "(not set)".to_string()
    } else if key.len() > 8 {
        format!("{}...{}", &key[..4], &key[key.len() - 4..])
    } else {
        "***".to_string()
    }
}
