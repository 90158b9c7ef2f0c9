pub mod events;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::core::config::{AgentConfig, BatchConfig};

/// Why an agent call failed. Carried as data in the job outcome, never
/// raised past the client boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentFailureKind {
    Transport,
    HttpStatus(u16),
    Parse,
}

impl AgentFailureKind {
    pub fn as_label(&self) -> String {
        match self {
            AgentFailureKind::Transport => "transport".to_string(),
            AgentFailureKind::HttpStatus(code) => format!("http_status:{}", code),
            AgentFailureKind::Parse => "parse".to_string(),
        }
    }
}

/// Outcome of one analysis call.
#[derive(Debug, Clone)]
pub enum AgentResult {
    Success { text: String },
    Failure { kind: AgentFailureKind, detail: String },
}

#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    async fn run(&self, prompt: &str) -> AgentResult;
}

// Request wire shape: a single user-role message with one text part.

#[derive(Serialize)]
struct AgentRequest<'a> {
    messages: Vec<AgentMessage<'a>>,
}

#[derive(Serialize)]
struct AgentMessage<'a> {
    role: &'a str,
    content: Vec<AgentContent<'a>>,
}

#[derive(Serialize)]
struct AgentContent<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

/// Thin client over the analysis-agent endpoint. One connection pool and
/// one credential for the whole run; per-call timeout so a stuck call
/// degrades to a failed outcome instead of stalling the batch.
pub struct AgentClient {
    base_url: String,
    credential: String,
    call_timeout: Duration,
    client: Client,
}

impl AgentClient {
    pub fn new(agent: &AgentConfig, batch: &BatchConfig) -> Result<Self> {
        if agent.base_url.trim().is_empty() {
            return Err(anyhow!("Agent base_url is not configured"));
        }
        let credential = std::env::var(&agent.credential_env).with_context(|| {
            format!(
                "Agent credential not found in environment variable {}",
                agent.credential_env
            )
        })?;

        let client = Client::builder()
            .pool_max_idle_per_host(batch.connection_pool_size)
            .build()
            .context("Failed to build agent HTTP client")?;

        info!(
            "Agent client ready (pool size {}, call timeout {}s)",
            batch.connection_pool_size, batch.agent_timeout_secs
        );
        Ok(Self {
            base_url: agent.base_url.clone(),
            credential,
            call_timeout: Duration::from_secs(batch.agent_timeout_secs),
            client,
        })
    }

    async fn call(&self, prompt: &str) -> AgentResult {
        match tokio::time::timeout(self.call_timeout, self.call_inner(prompt)).await {
            Ok(result) => result,
            Err(_) => AgentResult::Failure {
                kind: AgentFailureKind::Transport,
                detail: "timeout".to_string(),
            },
        }
    }

    async fn call_inner(&self, prompt: &str) -> AgentResult {
        let req = AgentRequest {
            messages: vec![AgentMessage {
                role: "user",
                content: vec![AgentContent {
                    kind: "text",
                    text: prompt,
                }],
            }],
        };

        let sent = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.credential))
            .json(&req)
            .send();

        let res = match sent.await {
            Err(e) => {
                return AgentResult::Failure {
                    kind: AgentFailureKind::Transport,
                    detail: e.to_string(),
                };
            }
            Ok(res) => res,
        };

        let status = res.status();
        let body = match res.text().await {
            Err(e) => {
                return AgentResult::Failure {
                    kind: AgentFailureKind::Transport,
                    detail: e.to_string(),
                };
            }
            Ok(body) => body,
        };

        if !status.is_success() {
            let snippet: String = body.chars().take(200).collect();
            return AgentResult::Failure {
                kind: AgentFailureKind::HttpStatus(status.as_u16()),
                detail: snippet,
            };
        }

        match events::extract_final_text(&body) {
            Ok(text) => AgentResult::Success { text },
            Err(detail) => AgentResult::Failure {
                kind: AgentFailureKind::Parse,
                detail,
            },
        }
    }
}

#[async_trait]
impl AnalysisAgent for AgentClient {
    async fn run(&self, prompt: &str) -> AgentResult {
        self.call(prompt).await
    }
}

/// Fixed analysis prompt: the subscriber's question plus the current date
/// so relative phrases ("yesterday", "this week") resolve on the agent
/// side, and the report structure the renderer expects.
pub fn build_analysis_prompt(question: &str, sql_statement: &str, today: NaiveDate) -> String {
    let query_context = if sql_statement.trim().is_empty() {
        String::new()
    } else {
        format!("- Reference query supplied at subscription time:\n{}\n", sql_statement)
    };
    format!(
        "Analyze the following question and provide an executive narrative \
summary for a business email.\n\n\
CONTEXT:\n\
- User's question: {question}\n\
- Current date: {date}\n\
{query_context}\n\
INSTRUCTIONS:\n\
Focus on insights and narrative, not data repetition. Use only standard \
characters and plain markdown so the text renders cleanly in email.\n\n\
STRUCTURE:\n\
## Executive Summary\n\
Two to three sentences that directly answer the question, with key \
findings, notable trends, and business implications.\n\n\
## Key Insights\n\
Bullet points for the most significant findings only: trends, outliers, \
risks and opportunities, with specific numbers and context. If the data \
shows nothing notable, say so clearly and suggest next steps.\n\n\
REQUIREMENTS:\n\
- Keep it concise (200-300 words total)\n\
- Use ## for headers, - for bullets, **bold** for key metrics\n\
- Do not mention subscriptions or future updates",
        question = question,
        date = today.format("%Y-%m-%d"),
        query_context = query_context,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_question_and_current_date() {
        let today = NaiveDate::from_ymd_opt(2025, 10, 21).unwrap();
        let prompt = build_analysis_prompt("How many signups yesterday?", "", today);
        assert!(prompt.contains("How many signups yesterday?"));
        assert!(prompt.contains("2025-10-21"));
        assert!(!prompt.contains("Reference query"));
    }

    #[test]
    fn prompt_carries_optional_query_context() {
        let today = NaiveDate::from_ymd_opt(2025, 10, 21).unwrap();
        let prompt = build_analysis_prompt("Signups?", "SELECT count(*) FROM signups", today);
        assert!(prompt.contains("SELECT count(*) FROM signups"));
    }

    #[test]
    fn failure_kind_labels_match_taxonomy() {
        assert_eq!(AgentFailureKind::Transport.as_label(), "transport");
        assert_eq!(AgentFailureKind::HttpStatus(503).as_label(), "http_status:503");
        assert_eq!(AgentFailureKind::Parse.as_label(), "parse");
    }

    #[test]
    fn missing_credential_is_fatal_at_construction() {
        let agent = AgentConfig {
            base_url: "https://agent.example.com/run".to_string(),
            credential_env: "VIGIL_TEST_MISSING_TOKEN".to_string(),
        };
        let batch = BatchConfig::default();
        assert!(AgentClient::new(&agent, &batch).is_err());
    }
}
