use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ResponseFormat,
};
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::options::GenerationOptions;
use std::time::Duration;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{LLMClient, LLMParams, TARGET_LLM_REQUEST};

const LLM_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_RETRIES: usize = 3;

/// Ask the configured model for a JSON answer to `prompt`, retrying with
/// exponential backoff on errors and timeouts. Returns `None` once all
/// retries are exhausted; callers treat that as a call failure for the item
/// being processed, never as a run failure.
pub async fn generate_json_response(
    system_prompt: &str,
    prompt: &str,
    params: &LLMParams,
) -> Option<String> {
    let mut response_text = String::new();
    let mut backoff = 2;
    let worker_id = format!("{:?}", std::thread::current().id());

    debug!(target: TARGET_LLM_REQUEST, "Worker {}: Starting LLM request ({} chars)", worker_id, prompt.len());

    for retry_count in 0..MAX_RETRIES {
        let attempt = match &params.llm_client {
            LLMClient::Ollama(ollama) => {
                let full_prompt = format!("{}\n\n{}", system_prompt, prompt);
                let mut request =
                    GenerationRequest::new(params.model.to_string(), full_prompt);
                request.options =
                    Some(GenerationOptions::default().temperature(params.temperature));

                match timeout(LLM_TIMEOUT, ollama.generate(request)).await {
                    Ok(Ok(response)) => Ok(response.response),
                    Ok(Err(e)) => Err(format!("ollama error: {}", e)),
                    Err(_) => Err("request timed out".to_string()),
                }
            }
            LLMClient::OpenAI(client) => {
                match build_openai_request(system_prompt, prompt, params) {
                    Ok(request) => match timeout(LLM_TIMEOUT, client.chat().create(request)).await
                    {
                        Ok(Ok(response)) => response
                            .choices
                            .first()
                            .and_then(|choice| choice.message.content.clone())
                            .ok_or_else(|| "empty completion".to_string()),
                        Ok(Err(e)) => Err(format!("openai error: {}", e)),
                        Err(_) => Err("request timed out".to_string()),
                    },
                    Err(e) => Err(format!("request build failed: {}", e)),
                }
            }
        };

        match attempt {
            Ok(text) => {
                debug!(target: TARGET_LLM_REQUEST, "Worker {}: LLM response received ({} chars)", worker_id, text.len());
                response_text = text;
                break;
            }
            Err(e) => {
                warn!(target: TARGET_LLM_REQUEST, "Worker {}: {}", worker_id, e);
                if retry_count < MAX_RETRIES - 1 {
                    info!(target: TARGET_LLM_REQUEST, "Worker {}: Retrying LLM request... ({}/{})", worker_id, retry_count + 1, MAX_RETRIES);
                } else {
                    error!(target: TARGET_LLM_REQUEST, "Worker {}: Failed to generate response after {} retries", worker_id, MAX_RETRIES);
                }
            }
        }

        if retry_count < MAX_RETRIES - 1 {
            debug!(target: TARGET_LLM_REQUEST, "Worker {}: Backing off for {} seconds before retry", worker_id, backoff);
            sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }

    if response_text.is_empty() {
        None
    } else {
        Some(response_text)
    }
}

fn build_openai_request(
    system_prompt: &str,
    prompt: &str,
    params: &LLMParams,
) -> anyhow::Result<async_openai::types::CreateChatCompletionRequest> {
    let request = CreateChatCompletionRequestArgs::default()
        .model(&params.model)
        .temperature(params.temperature)
        .response_format(ResponseFormat::JsonObject)
        .messages([
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into(),
        ])
        .build()?;
    Ok(request)
}

/// Models often wrap JSON answers in markdown fences; unwrap before parsing.
pub fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }
}
