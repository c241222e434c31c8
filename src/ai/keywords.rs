use regex::Regex;

use crate::config::KeywordConfig;
use crate::error::{AppError, Result};

/// Cheap gate in front of the LLM: an item must mention at least one
/// configured term to be worth an API call.
pub struct KeywordFilter {
    pattern: Option<Regex>,
}

impl KeywordFilter {
    pub fn new(keywords: &KeywordConfig) -> Result<Self> {
        let terms: Vec<String> = keywords
            .primary
            .iter()
            .chain(&keywords.companies)
            .chain(&keywords.topics)
            .map(|term| term.trim())
            .filter(|term| !term.is_empty())
            .map(regex::escape)
            .collect();

        if terms.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", terms.join("|")))
            .map_err(|e| AppError::Config(format!("invalid keyword list: {}", e)))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// An empty keyword list lets everything through.
    pub fn matches(&self, title: &str, body: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.is_match(title) || pattern.is_match(body),
            None => true,
        }
    }
}
