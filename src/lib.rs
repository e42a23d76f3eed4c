pub mod advice;
pub mod audit;
pub mod dedupe;
pub mod environment;
pub mod exporter;
pub mod extract;
pub mod fetch;
pub mod llm;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod scoring;
pub mod search;
pub mod writer;

use async_openai::{config::OpenAIConfig, Client as OpenAIClient};
use ollama_rs::Ollama;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_LLM_REQUEST: &str = "llm_request";
pub const TARGET_PIPELINE: &str = "pipeline";
pub const TARGET_MERGE: &str = "merge";

#[derive(Clone, Debug)]
pub enum LLMClient {
    Ollama(Ollama),
    OpenAI(OpenAIClient<OpenAIConfig>),
}

#[derive(Clone)]
pub struct LLMParams {
    pub llm_client: LLMClient,
    pub model: String,
    pub temperature: f32,
}
