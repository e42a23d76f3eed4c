//! Outreach advice generation: a black-box capability invoked per finalized
//! lead. Failures are absorbed per lead; the lead ships without advice.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::llm::{generate_json_response, strip_code_fences};
use crate::models::{ApproachAdvice, Lead};
use crate::prompts;
use crate::LLMParams;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AdviceOutput {
    recommended_angle: String,
    recommended_first_offer: String,
    qualifying_question: String,
}

/// Generate outreach advice for one lead.
pub async fn generate_advice(
    lead: &Lead,
    product_context: &str,
    seller_context: &str,
    llm_params: &LLMParams,
) -> Result<ApproachAdvice> {
    let role = lead
        .primary_contact()
        .map(|contact| contact.role_category.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let location = [
        lead.organization.city.as_deref(),
        lead.organization.region.as_deref(),
        lead.organization.country.as_deref(),
    ]
    .iter()
    .flatten()
    .copied()
    .collect::<Vec<_>>()
    .join(", ");

    let industries = lead.organization.industries.join(", ");

    let prompt = prompts::advice_prompt(
        &lead.organization.name,
        &lead.organization.org_type.to_string(),
        if industries.is_empty() { "Unknown" } else { &industries },
        if location.is_empty() { "Unknown" } else { &location },
        lead.organization.description.as_deref().unwrap_or("No description"),
        &role,
        if seller_context.is_empty() { "B2B sales" } else { seller_context },
        if product_context.is_empty() { "B2B product/service" } else { product_context },
    );

    let response = generate_json_response(prompts::ADVICE_SYSTEM_PROMPT, &prompt, llm_params)
        .await
        .ok_or_else(|| anyhow!("no response from advice capability"))?;

    let parsed: AdviceOutput = serde_json::from_str(strip_code_fences(&response))
        .context("advice response does not match the schema contract")?;

    if parsed.recommended_angle.trim().is_empty()
        || parsed.recommended_first_offer.trim().is_empty()
        || parsed.qualifying_question.trim().is_empty()
    {
        return Err(anyhow!("advice response has empty fields"));
    }

    Ok(ApproachAdvice {
        recommended_angle: parsed.recommended_angle,
        recommended_first_offer: parsed.recommended_first_offer,
        qualifying_question: parsed.qualifying_question,
    })
}
