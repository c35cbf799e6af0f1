//! Core data models for the sales insight pipeline

use crate::error::PipelineError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Task Cards =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskLevel {
    Junior,
    Mid,
    Senior,
}

/// One actionable recommendation produced by the terminal structuring step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskCard {
    pub title: String,
    pub description: String,
    pub level: TaskLevel,
}

//
// ================= Shared State =================
//

/// The single mutable record threaded through one request.
///
/// Every field is either write-once or append-only; steps contribute partial
/// updates via [`StepResult`] and never overwrite each other's work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedState {
    /// Set once when the request is created.
    pub question: String,
    /// Write-once: the query step's generated SQL plus rendered result rows.
    pub sql_output: Option<String>,
    /// Append-only: one entry per analysis step, in completion order.
    pub pre_answers: Vec<String>,
    /// Write-once: the lead analyst's synthesis of the pre-answers.
    pub lead_summary: Option<String>,
    /// Write-once: the terminal step's structured task cards.
    pub final_output: Option<Vec<TaskCard>>,
}

impl SharedState {
    pub fn for_question(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    /// Merge a step's partial update into the state.
    ///
    /// Write-once fields reject a second write; the append-only field only
    /// ever grows. The per-field semantics are explicit here rather than
    /// inferred from runtime types, so a step writing the wrong field fails
    /// loudly instead of silently clobbering a sibling's contribution.
    pub fn merge(&mut self, update: StepResult) -> Result<()> {
        if let Some(sql_output) = update.sql_output {
            if self.sql_output.is_some() {
                return Err(PipelineError::StateConflict("sql_output"));
            }
            self.sql_output = Some(sql_output);
        }

        self.pre_answers.extend(update.pre_answers);

        if let Some(lead_summary) = update.lead_summary {
            if self.lead_summary.is_some() {
                return Err(PipelineError::StateConflict("lead_summary"));
            }
            self.lead_summary = Some(lead_summary);
        }

        if let Some(final_output) = update.final_output {
            if self.final_output.is_some() {
                return Err(PipelineError::StateConflict("final_output"));
            }
            self.final_output = Some(final_output);
        }

        Ok(())
    }
}

/// The partial update a step contributes: a subset of [`SharedState`] fields.
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub sql_output: Option<String>,
    pub pre_answers: Vec<String>,
    pub lead_summary: Option<String>,
    pub final_output: Option<Vec<TaskCard>>,
}

impl StepResult {
    pub fn sql_output(value: impl Into<String>) -> Self {
        Self {
            sql_output: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn pre_answer(value: impl Into<String>) -> Self {
        Self {
            pre_answers: vec![value.into()],
            ..Default::default()
        }
    }

    pub fn lead_summary(value: impl Into<String>) -> Self {
        Self {
            lead_summary: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn final_output(tasks: Vec<TaskCard>) -> Self {
        Self {
            final_output: Some(tasks),
            ..Default::default()
        }
    }
}

//
// ================= Agent Roles =================
//

/// Tools an agent role is allowed to reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolAccess {
    None,
    Calculator,
    DatasetQuery,
}

/// Output shape expected from an agent role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    TaskCards,
}

/// Configuration for one agent role: instruction, tool set, output shape.
#[derive(Debug, Clone)]
pub struct RoleConfig {
    pub name: &'static str,
    pub instruction: String,
    pub tools: ToolAccess,
    pub output: OutputFormat,
}

/// Reply from the agent invocation adapter.
#[derive(Debug, Clone)]
pub enum AgentReply {
    Text(String),
    Tasks(Vec<TaskCard>),
}

impl AgentReply {
    /// Flatten a reply to text; task cards become a readable listing.
    pub fn into_text(self) -> String {
        match self {
            AgentReply::Text(text) => text,
            AgentReply::Tasks(tasks) => tasks
                .iter()
                .map(|t| format!("[{}] {}: {}", t.level, t.title, t.description))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

//
// ================= Query Results =================
//

/// Rows returned by the dataset accessor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl RowSet {
    /// Plain-text rendering fed to the analysis agents.
    pub fn render(&self) -> String {
        let mut out = self.columns.join(" | ");
        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            out.push('\n');
            out.push_str(&cells.join(" | "));
        }
        out
    }
}

impl fmt::Display for TaskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskLevel::Junior => "junior",
            TaskLevel::Mid => "mid",
            TaskLevel::Senior => "senior",
        };
        write!(f, "{}", s)
    }
}
