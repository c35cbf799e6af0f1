//! OpenAI chat-completions client
//!
//! Wraps the external model behind [`AgentAdapter`].
//! Uses a long-lived reqwest::Client for connection pooling, with a request
//! timeout so a hung model call fails the step instead of blocking the
//! request forever.

use crate::agents::AgentAdapter;
use crate::error::PipelineError;
use crate::models::{AgentReply, OutputFormat, RoleConfig, TaskCard, ToolAccess};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Reusable OpenAI client (connection-pooled)
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(PipelineError::Adapter(
                "OPENAI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: self.model.clone(),
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
        };

        info!(model = %self.model, "Calling OpenAI API");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("OpenAI API request failed: {}", e);
                PipelineError::Adapter(format!("OpenAI API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("OpenAI API error response: {}", error_text);
            return Err(PipelineError::Adapter(format!(
                "OpenAI API error: {}",
                error_text
            )));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse OpenAI response: {}", e);
            PipelineError::Adapter(format!("OpenAI parse error: {}", e))
        })?;

        let answer = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PipelineError::Adapter("No response from OpenAI API".to_string()))?;

        Ok(answer)
    }
}

#[async_trait]
impl AgentAdapter for OpenAiClient {
    async fn invoke(&self, role: &RoleConfig, message: &str) -> Result<AgentReply> {
        let system = build_system_prompt(role);
        let answer = self.complete(&system, message).await?;

        match role.output {
            OutputFormat::Text => Ok(AgentReply::Text(answer)),
            OutputFormat::TaskCards => Ok(AgentReply::Tasks(parse_task_cards(&answer)?)),
        }
    }
}

/// Build the system prompt for a role, noting any granted tool access.
fn build_system_prompt(role: &RoleConfig) -> String {
    match role.tools {
        ToolAccess::None => role.instruction.clone(),
        ToolAccess::Calculator => format!(
            "{}\n\nWork through any arithmetic explicitly, step by step, \
             before stating numeric conclusions.",
            role.instruction
        ),
        ToolAccess::DatasetQuery => format!(
            "{}\n\nRespond with the SQL query only. No commentary.",
            role.instruction
        ),
    }
}

/// Strip a markdown code fence (```json or ```sql or bare ```) around a
/// model response. The model sometimes wraps structured output in fences
/// even when told not to.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence line, if any.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end_matches("```").trim()
}

/// Parse the task planner's JSON reply into task cards.
///
/// Accepts either a bare array or an object with a "tasks" key.
fn parse_task_cards(response: &str) -> Result<Vec<TaskCard>> {
    let cleaned = strip_code_fence(response);

    if let Ok(tasks) = serde_json::from_str::<Vec<TaskCard>>(cleaned) {
        return Ok(tasks);
    }

    let value: serde_json::Value = serde_json::from_str(cleaned).map_err(|e| {
        PipelineError::Adapter(format!(
            "Failed to parse task planner response: {} | raw={}",
            e, response
        ))
    })?;

    let tasks = value
        .get("tasks")
        .ok_or_else(|| {
            PipelineError::Adapter(format!(
                "Task planner response has no task list | raw={}",
                response
            ))
        })?
        .clone();

    serde_json::from_value(tasks).map_err(|e| {
        PipelineError::Adapter(format!("Malformed task entries: {} | raw={}", e, response))
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskLevel;

    #[test]
    fn test_request_serialization() {
        let request = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "Which category sells best?".to_string(),
            }],
        };

        let json = serde_json::to_string(&request);
        assert!(json.is_ok());
        assert!(json.unwrap().contains("Which category sells best?"));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("SELECT 1"), "SELECT 1");
        assert_eq!(strip_code_fence("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fence("```\nSELECT 1\n```"), "SELECT 1");
    }

    #[test]
    fn test_parse_task_cards_bare_array() {
        let raw = r#"[
            {"title": "A", "description": "a", "level": "junior"},
            {"title": "B", "description": "b", "level": "mid"},
            {"title": "C", "description": "c", "level": "senior"}
        ]"#;

        let tasks = parse_task_cards(raw).unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[2].level, TaskLevel::Senior);
    }

    #[test]
    fn test_parse_task_cards_fenced_object() {
        let raw = "```json\n{\"tasks\": [{\"title\": \"A\", \"description\": \"a\", \"level\": \"junior\"}]}\n```";

        let tasks = parse_task_cards(raw).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].level, TaskLevel::Junior);
    }

    #[test]
    fn test_parse_task_cards_rejects_garbage() {
        let err = parse_task_cards("not json at all").unwrap_err();
        assert!(matches!(err, PipelineError::Adapter(_)));
    }
}
