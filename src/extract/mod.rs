//! Structured extraction: invoke the extraction capability per page and
//! enforce the per-page invariants before candidates reach the dedupe engine.

mod gate;
mod schema;

pub use self::gate::{gate_extraction, normalize_country, normalize_website, clean_value};
pub use self::schema::{parse_raw_extraction, RawChannel, RawContact, RawExtraction, RawLead};

use tracing::debug;

use crate::audit::RunAudit;
use crate::llm::generate_json_response;
use crate::models::{CandidateRecord, PageFetchResult, PageType};
use crate::prompts;
use crate::{LLMParams, TARGET_LLM_REQUEST};

/// Run the extraction capability over a fetched page and gate its output.
/// Pairs the page with its classification as a side effect. A call failure
/// or contract violation yields zero candidates for the page and an audit
/// entry; it never fails the run.
pub async fn extract_candidates(
    page: &mut PageFetchResult,
    research_prompt: &str,
    llm_params: &LLMParams,
    audit: &RunAudit,
) -> Vec<CandidateRecord> {
    let text = match page.text.as_deref() {
        Some(text) if !text.is_empty() => text,
        _ => return Vec::new(),
    };

    let prompt = prompts::extraction_prompt(research_prompt, text);
    let response = match generate_json_response(
        prompts::EXTRACTION_SYSTEM_PROMPT,
        &prompt,
        llm_params,
    )
    .await
    {
        Some(response) => response,
        None => {
            audit.record_extraction_failed(&page.url, "no response from extraction capability");
            return Vec::new();
        }
    };

    let raw = match parse_raw_extraction(&response) {
        Ok(raw) => raw,
        Err(e) => {
            audit.record_extraction_failed(&page.url, &format!("contract violation: {}", e));
            return Vec::new();
        }
    };

    page.page_type = Some(
        raw.page_type
            .as_deref()
            .map(PageType::from)
            .unwrap_or(PageType::Other),
    );

    debug!(target: TARGET_LLM_REQUEST, "Extraction returned {} raw lead(s) from {}", raw.leads.len(), page.url);
    gate_extraction(raw, &page.url, audit)
}
