use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{KeywordConfig, SourceConfig};
use crate::error::{AppError, Result};
use crate::models::{CandidateItem, Score};

use super::{KeywordFilter, Scorer};

const LLM_API_URL: &str = "https://api.anthropic.com/v1/messages";
const MAX_BODY_CHARS: usize = 1500;
const UNKNOWN_SOURCE_CREDIBILITY: u8 = 50;

const SYSTEM_PROMPT: &str = r#"You screen news for an AI news alert channel read by a general, non-technical audience.
For each article decide how much it is about AI/ML technology (models, research, products, policy, hardware)
and how credible it is. General tech or business news that only mentions AI in passing is not relevant.
Then write a short notification: a factual headline of 1-2 sentences and 1-2 sentences on why it matters,
in plain language, no hype, no speculation, under 150 words in total.

Respond ONLY with JSON in exactly this shape:
{"relevance": 0-100, "credibility": 0-100, "headline": "...", "why_matters": "..."}"#;

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    relevance: f64,
    credibility: f64,
    #[serde(default)]
    headline: Option<String>,
    #[serde(default)]
    why_matters: Option<String>,
}

/// Scores items with one LLM call each, after a keyword pre-filter.
pub struct LlmScorer {
    client: Client,
    api_key: String,
    model: String,
    keywords: KeywordFilter,
    source_credibility: HashMap<String, u8>,
}

impl LlmScorer {
    pub fn new(
        api_key: String,
        model: String,
        keywords: &KeywordConfig,
        sources: &[SourceConfig],
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        let source_credibility = sources
            .iter()
            .map(|source| (source.name.clone(), source.credibility))
            .collect();

        Ok(Self {
            client,
            api_key,
            model,
            keywords: KeywordFilter::new(keywords)?,
            source_credibility,
        })
    }

    fn baseline_credibility(&self, source_name: &str) -> u8 {
        self.source_credibility
            .get(source_name)
            .copied()
            .unwrap_or(UNKNOWN_SOURCE_CREDIBILITY)
    }

    async fn ask(&self, item: &CandidateItem, baseline: u8) -> Result<String> {
        let body: String = item.body.chars().take(MAX_BODY_CHARS).collect();
        let user_message = format!(
            "Source: {} (publisher credibility baseline {}/100)\n\nTitle: {}\n\nSummary:\n{}",
            item.source_name, baseline, item.title, body
        );

        let request = MessageRequest {
            model: self.model.clone(),
            max_tokens: 512,
            temperature: 0.2,
            messages: vec![Message {
                role: "user".to_string(),
                content: user_message,
            }],
            system: Some(SYSTEM_PROMPT.to_string()),
        };

        let response = self
            .client
            .post(LLM_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::ScoringUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ScoringUnavailable(format!(
                "API error {}: {}",
                status, error_text
            )));
        }

        let message_response: MessageResponse = response
            .json()
            .await
            .map_err(|e| AppError::ScoringUnavailable(e.to_string()))?;

        Ok(message_response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[async_trait]
impl Scorer for LlmScorer {
    async fn score(&self, item: &CandidateItem) -> Result<Score> {
        let baseline = self.baseline_credibility(&item.source_name);

        if !self.keywords.matches(&item.title, &item.body) {
            tracing::debug!(title = %item.title, "no AI keywords, skipping LLM call");
            return Ok(Score::new(0, baseline as u32, String::new()));
        }

        let answer = self.ask(item, baseline).await?;
        let score = parse_verdict(&answer, &item.title)?;
        tracing::debug!(
            title = %item.title,
            relevance = score.relevance,
            credibility = score.credibility,
            "scored item"
        );
        Ok(score)
    }
}

/// Pulls the JSON object out of the model's answer, tolerating code fences
/// and surrounding prose.
fn parse_verdict(answer: &str, title: &str) -> Result<Score> {
    static JSON_OBJECT: OnceLock<Option<Regex>> = OnceLock::new();
    let json = JSON_OBJECT
        .get_or_init(|| Regex::new(r"(?s)\{.*\}").ok())
        .as_ref()
        .and_then(|re| re.find(answer))
        .map(|m| m.as_str())
        .ok_or_else(|| AppError::ScoringUnavailable("no JSON object in LLM answer".to_string()))?;

    let verdict: Verdict = serde_json::from_str(json)
        .map_err(|e| AppError::ScoringUnavailable(format!("unusable LLM answer: {}", e)))?;

    let headline = verdict
        .headline
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| title.to_string());
    let summary = match verdict.why_matters.map(|w| w.trim().to_string()) {
        Some(why) if !why.is_empty() => format!("{}\n\n{}", headline, why),
        _ => headline,
    };

    Ok(Score::new(
        to_percent(verdict.relevance),
        to_percent(verdict.credibility),
        summary,
    ))
}

fn to_percent(value: f64) -> u32 {
    if value.is_finite() {
        value.round().clamp(0.0, 100.0) as u32
    } else {
        0
    }
}
