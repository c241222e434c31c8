use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

const APP_DIR: &str = "ai-news-alert";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub telegram_bot_token: Option<String>,
    pub llm_api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,

    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,

    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: u8,

    #[serde(default = "default_credibility_threshold")]
    pub credibility_threshold: u8,

    #[serde(default = "default_max_items_per_cycle")]
    pub max_items_per_cycle: usize,

    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,

    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: u32,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub keywords: KeywordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_send_concurrency")]
    pub send_concurrency: usize,

    #[serde(default = "default_scoring_concurrency")]
    pub scoring_concurrency: usize,
}

/// A feed the bot polls, with a publisher credibility baseline handed to the
/// scorer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub feed_url: String,
    #[serde(default = "default_source_credibility")]
    pub credibility: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordConfig {
    pub primary: Vec<String>,
    pub companies: Vec<String>,
    pub topics: Vec<String>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("news.db").to_string_lossy().to_string()
}

fn default_llm_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}

fn default_polling_interval() -> u64 {
    1800
}

fn default_cycle_timeout() -> u64 {
    900
}

fn default_relevance_threshold() -> u8 {
    85
}

fn default_credibility_threshold() -> u8 {
    70
}

fn default_max_items_per_cycle() -> usize {
    500
}

fn default_max_age_hours() -> i64 {
    48
}

fn default_max_subscribers() -> u32 {
    100_000
}

fn default_max_send_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_send_concurrency() -> usize {
    8
}

fn default_scoring_concurrency() -> usize {
    4
}

fn default_source_credibility() -> u8 {
    80
}

fn default_sources() -> Vec<SourceConfig> {
    [
        ("OpenAI Blog", "https://openai.com/blog/rss.xml", 95),
        ("Google DeepMind", "https://deepmind.google/blog/rss.xml", 95),
        ("Hugging Face", "https://huggingface.co/blog/feed.xml", 90),
        ("MIT Technology Review", "https://www.technologyreview.com/feed/", 85),
        ("The Verge AI", "https://www.theverge.com/rss/ai-artificial-intelligence/index.xml", 80),
    ]
    .into_iter()
    .map(|(name, feed_url, credibility)| SourceConfig {
        name: name.to_string(),
        feed_url: feed_url.to_string(),
        credibility,
    })
    .collect()
}

fn strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            primary: strings(&[
                "artificial intelligence",
                "machine learning",
                "deep learning",
                "neural network",
                "LLM",
                "GPT",
                "transformer",
                "generative AI",
            ]),
            companies: strings(&["OpenAI", "Google AI", "DeepMind", "Meta AI", "Anthropic", "NVIDIA"]),
            topics: strings(&["AI model", "AI research", "computer vision", "NLP"]),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_send_attempts: default_max_send_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            send_concurrency: default_send_concurrency(),
            scoring_concurrency: default_scoring_concurrency(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            telegram_bot_token: None,
            llm_api_key: None,
            llm_model: default_llm_model(),
            polling_interval_secs: default_polling_interval(),
            cycle_timeout_secs: default_cycle_timeout(),
            relevance_threshold: default_relevance_threshold(),
            credibility_threshold: default_credibility_threshold(),
            max_items_per_cycle: default_max_items_per_cycle(),
            max_age_hours: default_max_age_hours(),
            max_subscribers: default_max_subscribers(),
            delivery: DeliveryConfig::default(),
            sources: default_sources(),
            keywords: KeywordConfig::default(),
        }
    }
}

impl Config {
    /// Loads the config file (writing defaults on first run), then applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(token) = var("TELEGRAM_BOT_TOKEN") {
            self.telegram_bot_token = Some(token);
        }
        if let Some(key) = var("LLM_API_KEY") {
            self.llm_api_key = Some(key);
        }
        if let Some(path) = var("DATABASE_PATH") {
            self.db_path = path;
        }
        if let Some(value) = var("POLLING_INTERVAL") {
            self.polling_interval_secs = parse_env("POLLING_INTERVAL", &value)?;
        }
        if let Some(value) = var("RELEVANCE_THRESHOLD") {
            self.relevance_threshold = parse_env("RELEVANCE_THRESHOLD", &value)?;
        }
        if let Some(value) = var("CREDIBILITY_THRESHOLD") {
            self.credibility_threshold = parse_env("CREDIBILITY_THRESHOLD", &value)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.relevance_threshold > 100 || self.credibility_threshold > 100 {
            return Err(AppError::Config(
                "thresholds must be between 0 and 100".to_string(),
            ));
        }
        if self.polling_interval_secs == 0 {
            return Err(AppError::Config("polling interval must be positive".to_string()));
        }
        if self.cycle_timeout_secs == 0 {
            return Err(AppError::Config("cycle_timeout_secs must be positive".to_string()));
        }
        if self.max_items_per_cycle == 0 {
            return Err(AppError::Config("max_items_per_cycle must be at least 1".to_string()));
        }
        if self.delivery.max_send_attempts == 0 {
            return Err(AppError::Config("max_send_attempts must be at least 1".to_string()));
        }
        for source in &self.sources {
            url::Url::parse(&source.feed_url).map_err(|e| {
                AppError::Config(format!("source {} has a bad feed_url: {}", source.name, e))
            })?;
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{} has an invalid value: {:?}", name, value)))
}
