//! Agent invocation adapter
//!
//! The boundary abstraction over the external LLM call. The pipeline only
//! ever talks to an [`AgentAdapter`], so tests substitute a mock and never
//! touch the network.

use crate::models::{AgentReply, OutputFormat, RoleConfig, TaskCard, TaskLevel};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

pub mod openai;
pub use openai::OpenAiClient;

/// Trait for invoking an agent role with a message.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    async fn invoke(&self, role: &RoleConfig, message: &str) -> Result<AgentReply>;
}

/// Mock adapter for development & testing.
/// Keeps the pipeline functional without an LLM dependency.
#[derive(Default)]
pub struct MockAdapter {
    replies: HashMap<String, AgentReply>,
    fail_role: Option<String>,
    invocations: Mutex<Vec<(String, String)>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the reply returned for a role.
    pub fn with_reply(mut self, role: &str, reply: AgentReply) -> Self {
        self.replies.insert(role.to_string(), reply);
        self
    }

    /// Make invocations of the given role fail.
    pub fn failing_for(mut self, role: &str) -> Self {
        self.fail_role = Some(role.to_string());
        self
    }

    /// Every (role, message) pair seen so far, in invocation order.
    pub fn invocations(&self) -> Vec<(String, String)> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentAdapter for MockAdapter {
    async fn invoke(&self, role: &RoleConfig, message: &str) -> Result<AgentReply> {
        self.invocations
            .lock()
            .unwrap()
            .push((role.name.to_string(), message.to_string()));

        if self.fail_role.as_deref() == Some(role.name) {
            return Err(crate::error::PipelineError::Adapter(format!(
                "mock failure for role '{}'",
                role.name
            )));
        }

        if let Some(reply) = self.replies.get(role.name) {
            return Ok(reply.clone());
        }

        Ok(match role.output {
            OutputFormat::Text => AgentReply::Text(format!("{} reply", role.name)),
            OutputFormat::TaskCards => AgentReply::Tasks(vec![
                TaskCard {
                    title: "Pull the supporting numbers".to_string(),
                    description: "Extract the underlying figures for review".to_string(),
                    level: TaskLevel::Junior,
                },
                TaskCard {
                    title: "Validate the trend".to_string(),
                    description: "Cross-check the result against monthly views".to_string(),
                    level: TaskLevel::Mid,
                },
                TaskCard {
                    title: "Present to stakeholders".to_string(),
                    description: "Turn the insight into a pricing decision".to_string(),
                    level: TaskLevel::Senior,
                },
            ]),
        })
    }
}
