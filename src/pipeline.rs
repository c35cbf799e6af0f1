//! The concrete sales insight pipeline
//!
//! Wires the five agent steps into a step graph:
//!
//! query → { sales_analysis, pricing_analysis } → lead_analysis → task_planning
//!
//! The query step turns the question into SQL and executes it; the two
//! analysis steps run in parallel and each append a pre-answer; the lead
//! step synthesizes them; the terminal step structures the synthesis into
//! task cards.

use crate::agents::openai::strip_code_fence;
use crate::agents::AgentAdapter;
use crate::dataset::DatasetAccessor;
use crate::error::PipelineError;
use crate::graph::{GraphBuilder, Step, StepDefinition, StepGraph};
use crate::models::{
    AgentReply, OutputFormat, RoleConfig, SharedState, StepResult, TaskCard, ToolAccess,
};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Schema description handed to the query-generation role. Fixed and
/// read-only: the fact/dimension tables plus the precomputed views.
const SCHEMA_OVERVIEW: &str = "\
fact_sales (id_sale, id_customer, id_product, id_store, id_date, value, quantity) -> Sales transactions linking customers, products, stores, and dates.
dim_customer (id_customer, name, gender, birth_date, city, state, country) -> Customer details and demographics.
dim_product (id_product, product_name, category, brand, price) -> Product information including category, brand, and price.
dim_date (id_date, full_date, day, month, year, quarter, day_of_week) -> Date dimension for time analysis.
dim_store (id_store, store_name, address, city, state, country) -> Store information and location details.
vw_sales_complete (id_sale, full_date, customer_name, product_name, category, store_name, value, quantity) -> Detailed sales view joining the fact table with all dimensions.
vw_monthly_sales (year, month, total_sales, total_products_sold) -> Monthly sales aggregates.
vw_product_ranking (product_name, total_sales, total_quantity_sold) -> Products ranked by overall sales performance.
vw_store_performance (store_name, total_sales, total_products_sold) -> Per-store sales summary.
vw_customer_ranking (customer_name, total_spent, number_of_sales) -> Customers ranked by spending and transaction count.";

fn sql_agent_role() -> RoleConfig {
    RoleConfig {
        name: "sql_agent",
        instruction: format!(
            "You are a SQL agent specialized in a SQLite sales database. \
             Given a question, generate one syntactically correct SQLite query \
             that returns the relevant information from the following tables \
             and views:\n\n{}\n\n\
             Do not perform any DML statements.",
            SCHEMA_OVERVIEW
        ),
        tools: ToolAccess::DatasetQuery,
        output: OutputFormat::Text,
    }
}

fn sales_analyst_role() -> RoleConfig {
    RoleConfig {
        name: "sales_analyst",
        instruction: "You are a sales analyst, an expert in business, sales \
                      analysis and strategy. Given a question and context from \
                      a SQL query, provide a clear, concise answer with \
                      insights and recommendations. Do not generate SQL here; \
                      just analyze the provided context."
            .to_string(),
        tools: ToolAccess::Calculator,
        output: OutputFormat::Text,
    }
}

fn pricing_analyst_role() -> RoleConfig {
    RoleConfig {
        name: "pricing_analyst",
        instruction: "You are a pricing analyst, an expert in microeconomics, \
                      pricing strategy, and cannibalization effects. Given a \
                      question and context from a SQL query, provide a clear, \
                      concise answer with pricing insights and recommendations. \
                      Do not generate SQL here; just analyze the provided \
                      context."
            .to_string(),
        tools: ToolAccess::Calculator,
        output: OutputFormat::Text,
    }
}

fn lead_analyst_role() -> RoleConfig {
    RoleConfig {
        name: "lead_analyst",
        instruction: "You are a lead data analyst, an expert in data analysis, \
                      task prioritization, and strategic planning. Review the \
                      analyst answers, assess their feasibility, and recommend \
                      the most viable and impactful actions to pursue. Focus \
                      solely on the provided context."
            .to_string(),
        tools: ToolAccess::Calculator,
        output: OutputFormat::Text,
    }
}

fn task_planner_role() -> RoleConfig {
    RoleConfig {
        name: "task_planner",
        instruction: "You structure recommendations into a task backlog. \
                      Given a question and the lead analyst's recommendations, \
                      return exactly three tasks as a JSON array of objects \
                      with keys \"title\", \"description\" and \"level\", one \
                      task per level: \"junior\", \"mid\", \"senior\". Return \
                      ONLY valid JSON, no explanation text."
            .to_string(),
        tools: ToolAccess::None,
        output: OutputFormat::TaskCards,
    }
}

//
// ================= Steps =================
//

/// Turns the question into SQL, executes it, writes `sql_output`.
struct QueryStep {
    adapter: Arc<dyn AgentAdapter>,
    dataset: Arc<dyn DatasetAccessor>,
    role: RoleConfig,
}

#[async_trait]
impl Step for QueryStep {
    async fn run(&self, state: &SharedState) -> Result<StepResult> {
        let reply = self.adapter.invoke(&self.role, &state.question).await?;
        let sql = strip_code_fence(&reply.into_text()).to_string();

        let rows = self.dataset.query(&sql).await?;

        Ok(StepResult::sql_output(format!(
            "Query: {}\nResults:\n{}",
            sql,
            rows.render()
        )))
    }
}

/// Analyzes question + query output, appends one pre-answer.
struct AnalysisStep {
    adapter: Arc<dyn AgentAdapter>,
    role: RoleConfig,
}

#[async_trait]
impl Step for AnalysisStep {
    async fn run(&self, state: &SharedState) -> Result<StepResult> {
        let sql_output = state.sql_output.as_deref().ok_or_else(|| {
            PipelineError::Internal("sql_output not populated before analysis".to_string())
        })?;

        let message = format!(
            "Question: {}\nSQL output: {}",
            state.question, sql_output
        );
        let reply = self.adapter.invoke(&self.role, &message).await?;

        Ok(StepResult::pre_answer(reply.into_text()))
    }
}

/// Reviews both pre-answers, writes `lead_summary`.
struct LeadAnalysisStep {
    adapter: Arc<dyn AgentAdapter>,
    role: RoleConfig,
}

#[async_trait]
impl Step for LeadAnalysisStep {
    async fn run(&self, state: &SharedState) -> Result<StepResult> {
        let mut message = format!("Question: {}\n", state.question);
        for (i, answer) in state.pre_answers.iter().enumerate() {
            message.push_str(&format!("Analyst answer {}: {}\n", i + 1, answer));
        }

        let reply = self.adapter.invoke(&self.role, &message).await?;

        Ok(StepResult::lead_summary(reply.into_text()))
    }
}

/// Structures the lead summary into task cards, writes `final_output`.
struct TaskPlanningStep {
    adapter: Arc<dyn AgentAdapter>,
    role: RoleConfig,
}

#[async_trait]
impl Step for TaskPlanningStep {
    async fn run(&self, state: &SharedState) -> Result<StepResult> {
        let lead_summary = state.lead_summary.as_deref().ok_or_else(|| {
            PipelineError::Internal("lead_summary not populated before planning".to_string())
        })?;

        let message = format!(
            "Question: {}\nRecommendations: {}",
            state.question, lead_summary
        );

        match self.adapter.invoke(&self.role, &message).await? {
            AgentReply::Tasks(tasks) => Ok(StepResult::final_output(tasks)),
            AgentReply::Text(raw) => Err(PipelineError::Adapter(format!(
                "task planner returned unstructured text: {}",
                raw
            ))),
        }
    }
}

//
// ================= Pipeline =================
//

/// One question at a time, to completion: the REPL drives this serially.
pub struct SalesPipeline {
    graph: StepGraph,
}

impl SalesPipeline {
    /// Wire the fixed five-step graph. Construction errors are fatal: a
    /// pipeline that fails to build never accepts a request.
    pub fn new(
        adapter: Arc<dyn AgentAdapter>,
        dataset: Arc<dyn DatasetAccessor>,
    ) -> Result<Self> {
        let mut builder = GraphBuilder::new();

        builder.register(StepDefinition::new(
            "query",
            &[],
            Arc::new(QueryStep {
                adapter: Arc::clone(&adapter),
                dataset,
                role: sql_agent_role(),
            }),
        ))?;

        builder.register(StepDefinition::new(
            "sales_analysis",
            &["query"],
            Arc::new(AnalysisStep {
                adapter: Arc::clone(&adapter),
                role: sales_analyst_role(),
            }),
        ))?;

        builder.register(StepDefinition::new(
            "pricing_analysis",
            &["query"],
            Arc::new(AnalysisStep {
                adapter: Arc::clone(&adapter),
                role: pricing_analyst_role(),
            }),
        ))?;

        builder.register(StepDefinition::new(
            "lead_analysis",
            &["sales_analysis", "pricing_analysis"],
            Arc::new(LeadAnalysisStep {
                adapter: Arc::clone(&adapter),
                role: lead_analyst_role(),
            }),
        ))?;

        builder.register(StepDefinition::new(
            "task_planning",
            &["lead_analysis"],
            Arc::new(TaskPlanningStep {
                adapter,
                role: task_planner_role(),
            }),
        ))?;

        Ok(Self {
            graph: builder.build()?,
        })
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Run one question through the graph and return the full final state.
    pub async fn run(&self, question: &str) -> Result<SharedState> {
        let request_id = Uuid::new_v4();
        info!(request_id = %request_id, question = %question, "Running pipeline");

        let state = self.graph.run(SharedState::for_question(question)).await?;

        info!(
            request_id = %request_id,
            pre_answers = state.pre_answers.len(),
            "Pipeline complete"
        );
        Ok(state)
    }

    /// Run one question and return just the structured task cards.
    pub async fn answer(&self, question: &str) -> Result<Vec<TaskCard>> {
        let state = self.run(question).await?;
        state.final_output.ok_or_else(|| {
            PipelineError::Internal("terminal step produced no task cards".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::MockAdapter;
    use crate::dataset::MockDataset;
    use crate::models::{RowSet, TaskLevel};

    const QUESTION: &str = "Which product category has the highest sales in 2022?";

    fn electronics_rows() -> RowSet {
        RowSet {
            columns: vec!["category".to_string(), "total_sales".to_string()],
            rows: vec![vec![
                serde_json::json!("Electronics"),
                serde_json::json!(125000.50),
            ]],
        }
    }

    fn scenario_adapter() -> MockAdapter {
        MockAdapter::new()
            .with_reply(
                "sql_agent",
                AgentReply::Text(
                    "```sql\nSELECT p.category, SUM(f.value) AS total_sales \
                     FROM fact_sales f JOIN dim_product p USING (id_product) \
                     GROUP BY p.category ORDER BY total_sales DESC LIMIT 1\n```"
                        .to_string(),
                ),
            )
            .with_reply(
                "sales_analyst",
                AgentReply::Text("Electronics leads all categories".to_string()),
            )
            .with_reply(
                "pricing_analyst",
                AgentReply::Text("Premium pricing is holding up".to_string()),
            )
            .with_reply(
                "lead_analyst",
                AgentReply::Text("Double down on electronics".to_string()),
            )
    }

    #[tokio::test]
    async fn test_round_trip_concrete_scenario() {
        let adapter = Arc::new(scenario_adapter());
        let dataset = Arc::new(MockDataset::returning(electronics_rows()));
        let pipeline =
            SalesPipeline::new(adapter.clone(), dataset.clone()).unwrap();

        let state = pipeline.run(QUESTION).await.unwrap();

        // Query step stripped the fence and ran the query.
        assert_eq!(dataset.queries().len(), 1);
        assert!(dataset.queries()[0].starts_with("SELECT"));

        let sql_output = state.sql_output.as_deref().unwrap();
        assert!(sql_output.contains("Electronics"));
        assert!(sql_output.contains("125000.5"));

        // Both analysts contributed, in whatever completion order.
        assert_eq!(state.pre_answers.len(), 2);
        assert!(state
            .pre_answers
            .contains(&"Electronics leads all categories".to_string()));
        assert!(state
            .pre_answers
            .contains(&"Premium pricing is holding up".to_string()));

        // Both analysis roles received the identical question + sql output.
        let invocations = adapter.invocations();
        let analyst_messages: Vec<&str> = invocations
            .iter()
            .filter(|(role, _)| role == "sales_analyst" || role == "pricing_analyst")
            .map(|(_, msg)| msg.as_str())
            .collect();
        assert_eq!(analyst_messages.len(), 2);
        assert_eq!(analyst_messages[0], analyst_messages[1]);
        assert!(analyst_messages[0].contains(QUESTION));
        assert!(analyst_messages[0].contains("Electronics"));

        // The lead saw both pre-answers.
        let lead_message = invocations
            .iter()
            .find(|(role, _)| role == "lead_analyst")
            .map(|(_, msg)| msg.clone())
            .unwrap();
        assert!(lead_message.contains("Electronics leads all categories"));
        assert!(lead_message.contains("Premium pricing is holding up"));

        assert_eq!(
            state.lead_summary.as_deref(),
            Some("Double down on electronics")
        );

        // Exactly three tasks, one per level.
        let tasks = state.final_output.unwrap();
        assert_eq!(tasks.len(), 3);
        for level in [TaskLevel::Junior, TaskLevel::Mid, TaskLevel::Senior] {
            assert_eq!(tasks.iter().filter(|t| t.level == level).count(), 1);
        }
    }

    #[tokio::test]
    async fn test_deterministic_final_output() {
        let first = {
            let adapter = Arc::new(scenario_adapter());
            let dataset = Arc::new(MockDataset::returning(electronics_rows()));
            SalesPipeline::new(adapter, dataset)
                .unwrap()
                .answer(QUESTION)
                .await
                .unwrap()
        };
        let second = {
            let adapter = Arc::new(scenario_adapter());
            let dataset = Arc::new(MockDataset::returning(electronics_rows()));
            SalesPipeline::new(adapter, dataset)
                .unwrap()
                .answer(QUESTION)
                .await
                .unwrap()
        };

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_adapter_failure_in_query_step_aborts_run() {
        let adapter = Arc::new(MockAdapter::new().failing_for("sql_agent"));
        let dataset = Arc::new(MockDataset::returning(electronics_rows()));
        let pipeline =
            SalesPipeline::new(adapter.clone(), dataset.clone()).unwrap();

        let err = pipeline.run(QUESTION).await.unwrap_err();
        match err {
            PipelineError::StepFailed { step, source } => {
                assert_eq!(step, "query");
                assert!(matches!(*source, PipelineError::Adapter(_)));
            }
            other => panic!("expected StepFailed, got {:?}", other),
        }

        // Only the failed role was ever invoked; no analysis ran.
        let roles: Vec<String> =
            adapter.invocations().into_iter().map(|(r, _)| r).collect();
        assert_eq!(roles, vec!["sql_agent".to_string()]);
        assert!(dataset.queries().is_empty());
    }

    #[tokio::test]
    async fn test_dataset_failure_is_attributed_to_query_step() {
        let adapter = Arc::new(scenario_adapter());
        let dataset = Arc::new(MockDataset::failing());
        let pipeline = SalesPipeline::new(adapter, dataset).unwrap();

        let err = pipeline.run(QUESTION).await.unwrap_err();
        match err {
            PipelineError::StepFailed { step, source } => {
                assert_eq!(step, "query");
                assert!(matches!(*source, PipelineError::Query(_)));
            }
            other => panic!("expected StepFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unstructured_task_planner_reply_fails_terminal_step() {
        let adapter = Arc::new(
            scenario_adapter()
                .with_reply("task_planner", AgentReply::Text("just do stuff".to_string())),
        );
        let dataset = Arc::new(MockDataset::returning(electronics_rows()));
        let pipeline = SalesPipeline::new(adapter, dataset).unwrap();

        let err = pipeline.run(QUESTION).await.unwrap_err();
        match err {
            PipelineError::StepFailed { step, source } => {
                assert_eq!(step, "task_planning");
                assert!(matches!(*source, PipelineError::Adapter(_)));
            }
            other => panic!("expected StepFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_graph_shape() {
        let adapter = Arc::new(MockAdapter::new());
        let dataset = Arc::new(MockDataset::default());
        let pipeline = SalesPipeline::new(adapter, dataset).unwrap();

        let mermaid = pipeline.graph().to_mermaid();
        assert!(mermaid.contains("query --> sales_analysis"));
        assert!(mermaid.contains("query --> pricing_analysis"));
        assert!(mermaid.contains("sales_analysis --> lead_analysis"));
        assert!(mermaid.contains("pricing_analysis --> lead_analysis"));
        assert!(mermaid.contains("lead_analysis --> task_planning"));
        assert_eq!(pipeline.graph().start_step(), "query");
    }
}
