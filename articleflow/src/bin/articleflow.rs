//! Generates one article from the command line and prints the Markdown.

use anyhow::{bail, Context, Result};
use articleflow::adapters::http::{JsonSearchProvider, OpenAiImageGenerator, OpenAiTextGenerator};
use articleflow::observability::{init_tracing, LogFormat};
use articleflow::prelude::*;
use clap::Parser;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;

/// Staged long-form article generation.
#[derive(Parser, Debug)]
#[command(name = "articleflow", version, about)]
struct Cli {
    /// What the article is about.
    topic: String,

    /// Article configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Task manager configuration (JSON).
    #[arg(long)]
    manager_config: Option<PathBuf>,

    /// Search endpoint accepting `{query, max_results}`.
    #[arg(long, env = "ARTICLEFLOW_SEARCH_URL")]
    search_url: String,

    /// Search API key.
    #[arg(long, env = "ARTICLEFLOW_SEARCH_KEY", hide_env_values = true)]
    search_key: Option<String>,

    /// Chat completions endpoint.
    #[arg(long, env = "ARTICLEFLOW_LLM_URL")]
    llm_url: Option<String>,

    /// Skip image generation even if the config enables illustration.
    #[arg(long)]
    no_images: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Print progress events to stderr as JSON lines.
    #[arg(long)]
    events: bool,
}

fn adapters(cli: &Cli) -> AdapterSet {
    let mut text = OpenAiTextGenerator::from_env();
    if let Some(url) = &cli.llm_url {
        text = text.with_endpoint(url.clone());
    }
    let mut search = JsonSearchProvider::new(cli.search_url.clone());
    if let Some(key) = &cli.search_key {
        search = search.with_api_key(key.clone());
    }
    let set = AdapterSet::new(Arc::new(text), Arc::new(search));
    if cli.no_images {
        set
    } else {
        set.with_image(Arc::new(OpenAiImageGenerator::from_env()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(format).context("failed to install tracing subscriber")?;

    let article = match &cli.config {
        Some(path) => ArticleConfig::from_file(path)
            .with_context(|| format!("reading article config {}", path.display()))?,
        None => ArticleConfig::default(),
    };
    let manager_config = match &cli.manager_config {
        Some(path) => TaskManagerConfig::from_file(path)
            .with_context(|| format!("reading manager config {}", path.display()))?,
        None => TaskManagerConfig::default(),
    };

    let engine = WorkflowEngine::new(adapters(&cli), PromptTemplates::with_defaults(), &manager_config.engine);
    let manager = TaskManager::new(manager_config, engine)?;
    let id = manager.submit(cli.topic.clone(), article)?;

    let mut stream = manager.progress(id)?.subscribe(0);
    while let Some(envelope) = stream.next().await {
        if cli.events {
            eprintln!("{}", serde_json::to_string(&envelope)?);
        }
    }

    let result = manager.result(id)?;
    match result.status {
        ExecutionStatus::Succeeded => {
            if result.incomplete {
                tracing::warn!(errors = result.state.errors().len(), "Article is incomplete");
            }
            let Some(markdown) = result.markdown() else {
                bail!("task {id} succeeded without a document");
            };
            println!("{markdown}");
            Ok(())
        }
        ExecutionStatus::Cancelled => bail!("task {id} was cancelled"),
        _ => {
            let reason = result
                .failure
                .map_or_else(|| "unknown failure".to_string(), |f| f.to_string());
            bail!("task {id} failed: {reason}")
        }
    }
}
