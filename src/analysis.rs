//! Per-message classification and summary.

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{DigestConfig, LlmConfig};
use crate::llm::{CompletionRequest, TextAnalyzer};
use crate::mail::NormalizedMessage;

pub const LABELS: [&str; 22] = [
    "BUSINESS", "CHARITY", "EDUCATION", "ENTERTAINMENT", "ENVIRONMENT",
    "FINANCE", "FOOD", "GOVERNMENT", "HEALTH", "LGBTQ+", "LEGAL",
    "NEWS", "PERSONAL", "PROMOTIONAL", "RELIGION", "SCIENCE",
    "SHOPPING", "SOCIAL", "SPORT", "TECHNOLOGY", "TRAVEL", "WORK",
];

pub const FALLBACK_LABEL: &str = "PERSONAL";
pub const FALLBACK_SUMMARY: &str = "Email content could not be properly analyzed";
pub const DEFAULT_IMPORTANCE: u8 = 5;
pub const MAX_CATEGORIES: usize = 3;

const ERROR_TEXT_CHARS: usize = 100;

const SYSTEM_PROMPT: &str =
    "You are an expert email analyzer. Provide accurate categorization and summaries.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub categories: Vec<String>,
    pub summary: String,
    pub importance: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The reply held no `{ ... }` span.
    NoJson,
    /// The span was not the expected JSON.
    Malformed(String),
    /// The request never produced a reply.
    Request(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Parsed(Analysis),
    Fallback(FallbackReason),
}

impl ParseOutcome {
    pub fn into_analysis(self) -> Analysis {
        match self {
            ParseOutcome::Parsed(a) => a,
            ParseOutcome::Fallback(reason) => Analysis::fallback(&reason),
        }
    }
}

impl Analysis {
    pub fn fallback(reason: &FallbackReason) -> Self {
        let summary = match reason {
            FallbackReason::NoJson | FallbackReason::Malformed(_) => FALLBACK_SUMMARY.to_string(),
            FallbackReason::Request(err) => format!(
                "Error analyzing email: {}",
                err.chars().take(ERROR_TEXT_CHARS).collect::<String>()
            ),
        };
        Self {
            categories: vec![FALLBACK_LABEL.to_string()],
            summary,
            importance: DEFAULT_IMPORTANCE,
        }
    }
}

/// A message together with its analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedMessage {
    pub message: NormalizedMessage,
    pub categories: Vec<String>,
    pub summary: String,
    pub importance: u8,
}

impl AnalyzedMessage {
    pub fn new(message: NormalizedMessage, analysis: Analysis) -> Self {
        Self {
            message,
            categories: analysis.categories,
            summary: analysis.summary,
            importance: analysis.importance,
        }
    }
}

#[derive(Deserialize)]
struct RawReply {
    #[serde(default)]
    categories: Option<Value>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    importance: Option<Value>,
}

/// Greedy span from the first `{` to the last `}`.
fn json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn normalize_categories(raw: Option<Value>) -> Vec<String> {
    // a lone label counts as a one-element list; non-string entries are skipped
    let raw = match raw {
        Some(Value::Array(items)) => items,
        Some(label @ Value::String(_)) => vec![label],
        _ => Vec::new(),
    };
    let mut out: Vec<String> = Vec::new();
    for label in raw.iter().filter_map(Value::as_str) {
        let label = label.trim().to_uppercase();
        if LABELS.contains(&label.as_str()) && !out.contains(&label) {
            out.push(label);
        }
        if out.len() == MAX_CATEGORIES {
            break;
        }
    }
    if out.is_empty() {
        out.push(FALLBACK_LABEL.to_string());
    }
    out
}

fn normalize_importance(raw: Option<Value>) -> u8 {
    let n = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() => n.round().clamp(1.0, 10.0) as u8,
        _ => DEFAULT_IMPORTANCE,
    }
}

/// Pulls an [`Analysis`] out of a free-text reply. Never fails; anything it
/// cannot read becomes a [`ParseOutcome::Fallback`].
pub fn parse_reply(text: &str) -> ParseOutcome {
    let Some(span) = json_span(text) else {
        return ParseOutcome::Fallback(FallbackReason::NoJson);
    };

    let raw: RawReply = match serde_json::from_str(span) {
        Ok(raw) => raw,
        Err(e) => return ParseOutcome::Fallback(FallbackReason::Malformed(e.to_string())),
    };

    let summary = raw
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_SUMMARY.to_string());

    ParseOutcome::Parsed(Analysis {
        categories: normalize_categories(raw.categories),
        summary,
        importance: normalize_importance(raw.importance),
    })
}

fn build_prompt(msg: &NormalizedMessage, body_chars: usize) -> String {
    let body: String = msg.body.chars().take(body_chars).collect();
    format!(
        "Please analyze this email and:\n\
1. Categorize it into a maximum of {MAX_CATEGORIES} categories from this list: {labels}\n\
2. Provide a concise summary paragraph (2-3 sentences)\n\
3. Rate the importance on a scale of 1-10 (10 being most important)\n\
\n\
Email content:\n\
Subject: {subject}\n\
From: {from}\n\
Body: {body}...\n\
\n\
Please respond in JSON format:\n\
{{\n  \"categories\": [\"CATEGORY1\", \"CATEGORY2\"],\n  \"summary\": \"Brief summary of the email content and purpose\",\n  \"importance\": 8\n}}",
        labels = LABELS.join(", "),
        subject = msg.subject,
        from = msg.from,
    )
}

pub struct Analyzer<'a> {
    client: &'a dyn TextAnalyzer,
    llm: &'a LlmConfig,
    body_chars: usize,
}

impl<'a> Analyzer<'a> {
    pub fn new(client: &'a dyn TextAnalyzer, llm: &'a LlmConfig, digest: &DigestConfig) -> Self {
        Self {
            client,
            llm,
            body_chars: digest.body_chars,
        }
    }

    pub async fn analyze(&self, msg: &NormalizedMessage) -> Analysis {
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(msg, self.body_chars),
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
        };

        let outcome = match self.client.complete(request).await {
            Ok(reply) => parse_reply(&reply),
            Err(e) => {
                warn!(subject = %msg.subject, error = %e, "analysis request failed");
                ParseOutcome::Fallback(FallbackReason::Request(e.to_string()))
            }
        };
        if let ParseOutcome::Fallback(reason) = &outcome {
            warn!(subject = %msg.subject, ?reason, "using fallback analysis");
        }
        outcome.into_analysis()
    }

    /// Analyzes every message with at most `concurrency` requests in flight.
    /// Output order matches input order.
    pub async fn analyze_all(
        &self,
        messages: Vec<NormalizedMessage>,
        concurrency: usize,
    ) -> Vec<AnalyzedMessage> {
        let total = messages.len();
        info!(total, concurrency, "analyzing messages");

        stream::iter(messages.into_iter().enumerate())
            .map(|(i, msg)| async move {
                let subject: String = msg.subject.chars().take(50).collect();
                info!("processing email {}/{}: {}", i + 1, total, subject);
                let analysis = self.analyze(&msg).await;
                AnalyzedMessage::new(msg, analysis)
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}
