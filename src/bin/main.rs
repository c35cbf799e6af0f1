use sales_insight_pipeline::{
    agents::OpenAiClient, config::PipelineConfig, dataset::SqliteDataset,
    pipeline::SalesPipeline,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Sales insight pipeline starting");

    let config = PipelineConfig::from_env();

    // Create components
    let adapter = Arc::new(OpenAiClient::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.model.clone(),
        config.llm_timeout,
    )?);
    let dataset = Arc::new(SqliteDataset::connect(&config.database_url).await?);

    // A pipeline that fails to build never accepts a request.
    let pipeline = SalesPipeline::new(adapter, dataset)?;

    debug!("step graph:\n{}", pipeline.graph().to_mermaid());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"Enter your question: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break; // end of input
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        // A failed request is reported and the loop continues.
        match pipeline.answer(question).await {
            Ok(tasks) => {
                println!("\n=== RECOMMENDED TASKS ===");
                for task in &tasks {
                    println!("[{}] {}", task.level, task.title);
                    println!("    {}", task.description);
                }
                println!("----");
            }
            Err(e) => {
                eprintln!("Request failed: {}", e);
            }
        }
    }

    info!("Shutting down");
    Ok(())
}
