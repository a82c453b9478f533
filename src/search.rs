//! `salesbot search`: run the retrieval engine against the live catalog
//! without calling the language model.

use anyhow::Result;

use salesbot_core::prompt::compose_system_prompt;
use salesbot_core::retrieval::retrieve;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::sqlite_index::SqliteIndex;

/// How `run_search` prints its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutput {
    /// Numbered context block, as quoted to the model.
    Context,
    /// The full system prompt.
    Prompt,
    /// The retrieval result as JSON.
    Json,
}

pub async fn run_search(config: &Config, query: &str, output: SearchOutput) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let embedder = create_provider(&config.embedding)?;
    let index = SqliteIndex::new(pool.clone()).with_embedder(embedder, config.embedding.batch_size);

    let result = retrieve(&index, query, &config.retrieval.params()).await?;

    match output {
        SearchOutput::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        SearchOutput::Prompt => println!("{}", compose_system_prompt(&result)),
        SearchOutput::Context if !result.found => println!("No results."),
        SearchOutput::Context => {
            println!("{} product(s) matched:", result.count);
            println!("{}", result.context);
        }
    }

    pool.close().await;
    Ok(())
}
