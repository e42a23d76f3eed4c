use anyhow::{anyhow, Result};
use async_openai::{config::OpenAIConfig, Client as OpenAIClient};
use clap::Parser;
use ollama_rs::Ollama;
use std::env;
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use prospect::environment::get_env_var_as_vec;
use prospect::logging::configure_logging;
use prospect::models::{RunConfig, SearchProviderKind};
use prospect::pipeline::Pipeline;
use prospect::search::{SearchHit, SearchProvider, SerperProvider};
use prospect::{LLMClient, LLMParams, TARGET_PIPELINE};

/// Evidence-backed B2B lead research from a single prompt.
#[derive(Parser, Debug)]
#[command(name = "prospect", version, about)]
struct Cli {
    /// The research intent, e.g. "window manufacturers in Norway"
    #[arg(long)]
    prompt: String,

    /// Pre-expanded search queries (repeatable); defaults to the prompt
    #[arg(long = "query")]
    queries: Vec<String>,

    /// Known-good URLs to include ahead of search discovery (repeatable)
    #[arg(long = "seed-url")]
    seed_urls: Vec<String>,

    /// Domains to exclude from fetching (repeatable)
    #[arg(long = "block-domain")]
    blocked_domains: Vec<String>,

    /// Directory for run artifacts (CSV, JSON, audit trail, report)
    #[arg(long, default_value = "runs")]
    output_dir: PathBuf,

    /// Maximum pages to fetch in this run
    #[arg(long, default_value_t = 100)]
    max_pages: usize,

    /// Maximum leads to export
    #[arg(long, default_value_t = 50)]
    max_results: usize,

    /// Maximum pages fetched per domain
    #[arg(long, default_value_t = 3)]
    max_per_domain: usize,

    /// What is being sold (shapes outreach advice)
    #[arg(long, default_value = "")]
    product_context: String,

    /// Who is selling (shapes outreach advice)
    #[arg(long, default_value = "")]
    seller_context: String,

    /// Search provider: "serper" or "static" (seed URLs only)
    #[arg(long, default_value = "serper")]
    search_provider: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging();

    let cli = Cli::parse();

    // Ctrl-c flips the cancellation signal; stages stop issuing new work and
    // in-flight writes complete.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            error!("Failed to listen for ctrl-c");
        }
        info!(target: TARGET_PIPELINE, "Cancellation requested, finishing in-flight work");
        let _ = cancel_tx.send(true);
    });

    let llm_params = build_llm_params()?;

    let search_provider = match cli.search_provider.as_str() {
        "serper" => SearchProviderKind::Serper,
        "static" => SearchProviderKind::Static,
        other => return Err(anyhow!("unknown search provider: {}", other)),
    };

    let mut config = RunConfig {
        prompt: cli.prompt,
        search_provider,
        queries: cli.queries,
        seed_urls: cli.seed_urls,
        blocked_domains: cli.blocked_domains,
        max_pages: cli.max_pages,
        max_results: cli.max_results,
        max_per_domain: cli.max_per_domain,
        product_context: cli.product_context,
        seller_context: cli.seller_context,
        ..RunConfig::default()
    };
    config
        .blocked_domains
        .extend(get_env_var_as_vec("PROSPECT_BLOCKED_DOMAINS", ';'));

    let provider = build_search_provider(&config)?;
    let pipeline = Pipeline::new(config, llm_params, provider, cancel_rx);

    let (leads, stats) = pipeline.run(Some(&cli.output_dir)).await?;

    info!(
        target: TARGET_PIPELINE,
        "Done: {} leads from {} pages ({} fetch failures)",
        leads.len(),
        stats.urls_fetched,
        stats.fetch_failed
    );
    Ok(())
}

/// Pick the LLM backend: OpenAI when an API key is present, otherwise a
/// local Ollama endpoint.
fn build_llm_params() -> Result<LLMParams> {
    let temperature: f32 = env::var("LLM_TEMPERATURE")
        .unwrap_or("0.0".to_string())
        .parse()
        .unwrap_or(0.0);

    if let Ok(api_key) = env::var("OPENAI_API_KEY") {
        let model = env::var("OPENAI_MODEL").unwrap_or("gpt-4o-mini".to_string());
        info!("Using OpenAI model {}", model);
        let client = OpenAIClient::with_config(OpenAIConfig::new().with_api_key(api_key));
        return Ok(LLMParams {
            llm_client: LLMClient::OpenAI(client),
            model,
            temperature,
        });
    }

    let ollama_host = env::var("OLLAMA_HOST").unwrap_or("localhost".to_string());
    let ollama_port: u16 = env::var("OLLAMA_PORT")
        .unwrap_or("11434".to_string())
        .parse()
        .unwrap_or(11434);
    let model = env::var("OLLAMA_MODEL").unwrap_or("llama3.1".to_string());
    info!("Using Ollama at {}:{} with model {}", ollama_host, ollama_port, model);

    Ok(LLMParams {
        llm_client: LLMClient::Ollama(Ollama::new(ollama_host, ollama_port)),
        model,
        temperature,
    })
}

fn build_search_provider(config: &RunConfig) -> Result<SearchProvider> {
    match config.search_provider {
        SearchProviderKind::Serper => {
            let client = reqwest::Client::builder()
                .build()
                .map_err(|e| anyhow!("Failed to build search client: {}", e))?;
            Ok(SearchProvider::Serper(SerperProvider::from_env(client)?))
        }
        SearchProviderKind::Static => {
            let hits = config
                .seed_urls
                .iter()
                .map(|url| SearchHit {
                    url: url.clone(),
                    title: String::new(),
                    snippet: String::new(),
                })
                .collect();
            Ok(SearchProvider::Static(hits))
        }
    }
}
