//! Claude-backed email analysis and reply drafting.
//!
//! Every call is gated on the caller's monthly budget and charged to it
//! afterwards, successful or not.

use crate::config::ClaudeConfig;
use crate::models::{ActionItem, Email};
use crate::services::budget_service::{BudgetService, UsageRecord};
use crate::validators::PRIORITY_LEVELS;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "claude";
const BODY_PROMPT_LIMIT: usize = 5000;
const SUMMARY_MAX_TOKENS: u32 = 500;
const SUMMARY_EMAIL_LIMIT: usize = 50;

/// Cents per million tokens.
const INPUT_PRICE_CENTS: f64 = 300.0;
const OUTPUT_PRICE_CENTS: f64 = 1500.0;

pub const OP_ANALYZE_EMAIL: &str = "analyze_email";
pub const OP_GENERATE_DRAFT: &str = "generate_draft";
pub const OP_CATEGORY_SUMMARY: &str = "category_summary";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("{0}")]
    BudgetExceeded(String),
    #[error("AI service is not configured")]
    NotConfigured,
    #[error("AI request failed: {0}")]
    Request(String),
    #[error("AI service returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid AI response format")]
    InvalidResponse,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailAnalysis {
    pub priority_score: i64,
    pub priority_level: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub action_items: Vec<ActionItem>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl EmailAnalysis {
    /// Clamps the score to 1..=100 and maps unknown levels to `medium`.
    fn normalized(mut self) -> Self {
        self.priority_score = self.priority_score.clamp(1, 100);
        let level = self.priority_level.trim().to_lowercase();
        self.priority_level = if PRIORITY_LEVELS.contains(&level.as_str()) {
            level
        } else {
            "medium".to_string()
        };
        self
    }

    pub fn is_important(&self) -> bool {
        matches!(self.priority_level.as_str(), "critical" | "high")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DraftReply {
    pub subject: String,
    pub body_text: String,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DraftOptions {
    pub tone: String,
    pub instructions: Option<String>,
}

impl Default for DraftOptions {
    fn default() -> Self {
        Self {
            tone: "professional".to_string(),
            instructions: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
}

/// Cost in cents, rounded up.
pub fn calculate_cost(input_tokens: i64, output_tokens: i64) -> i64 {
    let input = input_tokens as f64 / 1_000_000.0 * INPUT_PRICE_CENTS;
    let output = output_tokens as f64 / 1_000_000.0 * OUTPUT_PRICE_CENTS;
    (input + output).ceil() as i64
}

/// Drops markdown code fences the model sometimes wraps JSON in.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[derive(Clone)]
pub struct LlmService {
    client: reqwest::Client,
    config: ClaudeConfig,
    budget: BudgetService,
}

impl LlmService {
    pub fn new(config: ClaudeConfig, budget: BudgetService) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            config,
            budget,
        }
    }

    pub async fn analyze_email(
        &self,
        user_id: i64,
        email: &Email,
    ) -> Result<EmailAnalysis, LlmError> {
        let prompt = format!(
            r#"Analyze this email and provide a structured analysis:

**Email Details:**
- From: {from}
- Subject: {subject}
- Body: {body}

**Task:**
1. Assign a priority score (1-100) and level (critical/high/medium/low)
2. Categorize the email (customer/work/personal/newsletter/automated/spam)
3. Determine sentiment (positive/neutral/negative/urgent)
4. Extract action items (tasks, deadlines, requests)
5. Generate a concise summary (1-2 sentences)
6. Suggest relevant tags

**Respond ONLY with valid JSON (no markdown, no code blocks):**
{{
  "priority_score": number,
  "priority_level": "critical" | "high" | "medium" | "low",
  "category": string,
  "sentiment": string,
  "action_items": [{{"task": string, "deadline": string | null}}],
  "summary": string,
  "tags": [string]
}}"#,
            from = email.sender_label(),
            subject = email.subject.as_deref().unwrap_or(""),
            body = truncate_chars(email.body_text.as_deref().unwrap_or(""), BODY_PROMPT_LIMIT),
        );

        let text = self
            .complete(user_id, Some(email.id), OP_ANALYZE_EMAIL, &prompt, self.config.max_tokens)
            .await?;
        let analysis: EmailAnalysis = serde_json::from_str(&strip_code_fences(&text))
            .map_err(|e| {
                tracing::warn!("Unparseable analysis for email {}: {}", email.id, e);
                LlmError::InvalidResponse
            })?;
        Ok(analysis.normalized())
    }

    pub async fn generate_draft_reply(
        &self,
        user_id: i64,
        email: &Email,
        options: &DraftOptions,
    ) -> Result<DraftReply, LlmError> {
        let prompt = format!(
            r#"Generate a professional email reply based on the following:

**Original Email:**
- From: {from}
- Subject: {subject}
- Body: {body}

**Reply Instructions:**
- Tone: {tone}
- Additional instructions: {instructions}

**Task:**
Generate a complete, ready-to-send email reply. Be helpful, professional, and address all points in the original email.

**Respond ONLY with valid JSON (no markdown, no code blocks):**
{{
  "subject": "Re: ...",
  "body_text": "Plain text version of reply",
  "body_html": "<p>HTML version of reply</p>",
  "confidence_score": number (0.0-1.0),
  "notes": "Brief explanation of the reply approach"
}}"#,
            from = email.sender_label(),
            subject = email.subject.as_deref().unwrap_or(""),
            body = truncate_chars(email.body_text.as_deref().unwrap_or(""), BODY_PROMPT_LIMIT),
            tone = options.tone,
            instructions = options
                .instructions
                .as_deref()
                .filter(|i| !i.trim().is_empty())
                .unwrap_or("None"),
        );

        let text = self
            .complete(user_id, Some(email.id), OP_GENERATE_DRAFT, &prompt, self.config.max_tokens)
            .await?;
        let mut reply: DraftReply = serde_json::from_str(&strip_code_fences(&text))
            .map_err(|_| LlmError::InvalidResponse)?;
        reply.confidence_score = reply.confidence_score.map(|s| s.clamp(0.0, 1.0));
        Ok(reply)
    }

    pub async fn generate_category_summary(
        &self,
        user_id: i64,
        emails: &[Email],
        category: &str,
    ) -> Result<String, LlmError> {
        let list = emails
            .iter()
            .take(SUMMARY_EMAIL_LIMIT)
            .enumerate()
            .map(|(i, e)| {
                format!(
                    "{}. From: {} | Subject: {}",
                    i + 1,
                    e.from_address.as_deref().unwrap_or(""),
                    e.subject.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            r#"Generate a concise summary of these {category} emails:

{list}

**Task:**
Provide a brief overview highlighting:
1. Key themes and topics
2. Important senders
3. Urgent items requiring attention
4. Overall insights

Keep the summary to 3-4 sentences.

**Respond with plain text only (no JSON, no markdown):**"#
        );

        let text = self
            .complete(
                user_id,
                emails.first().map(|e| e.id),
                OP_CATEGORY_SUMMARY,
                &prompt,
                SUMMARY_MAX_TOKENS,
            )
            .await?;
        Ok(text.trim().to_string())
    }

    /// Sends one user message and returns the text of the reply.
    async fn complete(
        &self,
        user_id: i64,
        email_id: Option<i64>,
        operation: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let check = self.budget.check(user_id).await?;
        if !check.allowed {
            return Err(LlmError::BudgetExceeded(
                check.reason.unwrap_or_else(|| "Budget limit reached".to_string()),
            ));
        }

        match self.send(prompt, max_tokens).await {
            Ok((text, usage)) => {
                self.budget
                    .record_usage(UsageRecord {
                        user_id,
                        email_id,
                        provider: PROVIDER.to_string(),
                        operation: operation.to_string(),
                        tokens_input: usage.input_tokens,
                        tokens_output: usage.output_tokens,
                        cost_cents: calculate_cost(usage.input_tokens, usage.output_tokens),
                        success: true,
                        error_message: None,
                    })
                    .await?;
                Ok(text)
            }
            Err(LlmError::NotConfigured) => Err(LlmError::NotConfigured),
            Err(err) => {
                tracing::error!("Claude {} failed for user {}: {}", operation, user_id, err);
                if let Err(log_err) = self
                    .budget
                    .record_usage(UsageRecord {
                        user_id,
                        email_id,
                        provider: PROVIDER.to_string(),
                        operation: operation.to_string(),
                        tokens_input: 0,
                        tokens_output: 0,
                        cost_cents: 0,
                        success: false,
                        error_message: Some(err.to_string()),
                    })
                    .await
                {
                    tracing::error!("Failed to log API usage: {}", log_err);
                }
                Err(err)
            }
        }
    }

    async fn send(&self, prompt: &str, max_tokens: u32) -> Result<(String, Usage), LlmError> {
        let api_key = self.config.api_key.as_deref().ok_or(LlmError::NotConfigured)?;
        let url = format!("{}/v1/messages", self.config.api_url.trim_end_matches('/'));

        let body = json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(text);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        let text = parsed
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or(LlmError::InvalidResponse)?;

        Ok((text, parsed.usage))
    }
}
