use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub providers: ProvidersConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    pub token: String,
    /// Chat IDs allowed to talk to the bot; empty means everyone.
    #[serde(default)]
    pub allow_from: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub api_key: String,
    #[serde(default = "ProvidersConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "ProvidersConfig::default_chat_model")]
    pub chat_model: String,
    #[serde(default = "ProvidersConfig::default_vision_model")]
    pub vision_model: String,
}

impl ProvidersConfig {
    fn default_base_url() -> String {
        "https://open.bigmodel.cn/api/paas/v4".to_string()
    }

    fn default_chat_model() -> String {
        "glm-4-flash".to_string()
    }

    fn default_vision_model() -> String {
        "glm-4v-flash".to_string()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "LedgerConfig::default_budget")]
    pub budget: String,
}

impl LedgerConfig {
    fn default_budget() -> String {
        "main".to_string()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OrchestrationConfig {
    #[serde(default = "OrchestrationConfig::default_session_timeout_minutes")]
    pub session_timeout_minutes: u64,
    #[serde(default = "OrchestrationConfig::default_categorization_ttl_minutes")]
    pub categorization_ttl_minutes: u64,
    #[serde(default = "OrchestrationConfig::default_document_ttl_minutes")]
    pub document_ttl_minutes: u64,
    #[serde(default = "OrchestrationConfig::default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            session_timeout_minutes: Self::default_session_timeout_minutes(),
            categorization_ttl_minutes: Self::default_categorization_ttl_minutes(),
            document_ttl_minutes: Self::default_document_ttl_minutes(),
            sweep_interval_seconds: Self::default_sweep_interval_seconds(),
        }
    }
}

impl OrchestrationConfig {
    const fn default_session_timeout_minutes() -> u64 {
        30
    }

    const fn default_categorization_ttl_minutes() -> u64 {
        30
    }

    const fn default_document_ttl_minutes() -> u64 {
        5
    }

    const fn default_sweep_interval_seconds() -> u64 {
        60
    }

    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_minutes * 60)
    }

    #[must_use]
    pub const fn categorization_ttl(&self) -> Duration {
        Duration::from_secs(self.categorization_ttl_minutes * 60)
    }

    #[must_use]
    pub const fn document_ttl(&self) -> Duration {
        Duration::from_secs(self.document_ttl_minutes * 60)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

const CONFIG_TEMPLATE: &str = r#"{
  "telegram": {
    "enabled": true,
    "token": "your-telegram-bot-token-here",
    "allow_from": []
  },
  "providers": {
    "api_key": "your-llm-api-key-here",
    "base_url": "https://open.bigmodel.cn/api/paas/v4",
    "chat_model": "glm-4-flash",
    "vision_model": "glm-4v-flash"
  },
  "ledger": {
    "base_url": "https://ledger.example.com/api/v1",
    "api_key": "your-ledger-api-key-here",
    "budget": "main"
  },
  "orchestration": {
    "session_timeout_minutes": 30,
    "categorization_ttl_minutes": 30,
    "document_ttl_minutes": 5,
    "sweep_interval_seconds": 60
  }
}"#;

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_dir = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("tally");

        let config_path = config_dir.join("config.json");

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'tally init' to create config.",
                config_path.display()
            );
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = serde_json::from_str(&content)?;
        info!("Loaded config from {}", config_path.display());

        Ok(config)
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("tally");

        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<()> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join("config.json");

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        std::fs::write(&config_path, CONFIG_TEMPLATE)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("📝 Next steps:");
        println!("   1. Edit the config file and add your Telegram bot token");
        println!("   2. Add your LLM API key and the ledger API credentials");
        println!("   3. Run 'tally bot' to start the assistant");
        println!();
        println!("🔧 Configuration options:");
        println!("   - telegram.allow_from: chat IDs allowed to use the bot (empty = all)");
        println!("   - orchestration.session_timeout_minutes: idle conversation lifetime");
        println!("   - orchestration.document_ttl_minutes: how long extracted documents wait");
        println!();
        Ok(())
    }
}
