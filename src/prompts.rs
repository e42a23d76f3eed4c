// prompts.rs

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You extract B2B leads from webpages. Each lead is one organization with its contacts. Only report facts explicitly stated in the text. Respond with a single JSON object and nothing else.";

pub const ADVICE_SYSTEM_PROMPT: &str = "You are a B2B sales advisor. Generate specific, actionable outreach advice. Respond with a single JSON object and nothing else.";

pub fn extraction_prompt(research_prompt: &str, page_text: &str) -> String {
    format!(
        "User's search intent: {}

STEP 1: CLASSIFY THE PAGE TYPE
- \"directory\": lists multiple companies (supplier directory, partner page, \"top 10\" list, trade association members)
- \"company_site\": a single company's own website (about us, contact us, team page)
- \"article\": news, blog post, or informational content
- \"other\": none of the above

STEP 2: EXTRACT LEADS BASED ON PAGE TYPE
- If page_type is \"directory\": extract ALL companies listed (multiple leads are expected)
- If page_type is \"company_site\": extract ONLY the company that owns this site (at most 1 lead)
- If page_type is \"article\" or \"other\": extract only organizations that are clearly featured

A company's own contact or about page never yields multiple organizations: the
contact page of \"Domus Windows\" should only return Domus Windows, never the
partners or clients it mentions.

Rules:
1. Only extract information explicitly stated in the text.
2. Never guess or infer email addresses; only extract values that are clearly visible.
3. org_type is one of: contractor, developer, supplier, distributor, manufacturer, agency, consultant, architect, retailer, wholesaler, other.
4. role_category is one of: owner, exec, founder, ceo, director, procurement, operations, project, sales, manager, engineer, unknown.
5. channel type is one of: email, phone, linkedin, contact_page, other.
6. Set relevant=true only if the page contains B2B organization or contact information.
7. evidence_snippet is a short quote from the page proving the extracted data exists on it.
8. List each contact under the organization it belongs to.

Respond with exactly this JSON shape and no additional fields:
{{
  \"page_type\": \"directory|company_site|article|other\",
  \"relevant\": true,
  \"evidence_snippet\": \"...\",
  \"leads\": [
    {{
      \"org_name\": \"...\",
      \"org_type\": \"...\",
      \"industries\": [\"...\"],
      \"country\": null,
      \"region\": null,
      \"city\": null,
      \"website\": null,
      \"description\": null,
      \"contacts\": [
        {{
          \"name\": null,
          \"title\": null,
          \"role_category\": \"unknown\",
          \"channels\": [{{\"type\": \"email\", \"value\": \"...\"}}]
        }}
      ]
    }}
  ]
}}

Page content:
{}",
        research_prompt, page_text
    )
}

#[allow(clippy::too_many_arguments)]
pub fn advice_prompt(
    org_name: &str,
    org_type: &str,
    industries: &str,
    location: &str,
    description: &str,
    role: &str,
    seller_context: &str,
    product_context: &str,
) -> String {
    format!(
        "Generate outreach advice for this B2B lead.

=== THE LEAD ===
Organization: {}
Type: {}
Industries: {}
Location: {}
Description: {}
Contact Role: {}

=== WHO IS SELLING ===
{}

=== WHAT IS BEING SOLD ===
{}

=== YOUR TASK ===
Generate outreach advice specifically for selling the product/service above to this lead.

1. recommended_angle: 1-2 sentence positioning that connects the seller's offering to this lead's likely needs
2. recommended_first_offer: one specific thing to offer (not a generic \"consultation\"; tie it to the actual product)
3. qualifying_question: one question that determines whether they are a good fit for the specific product

Your advice must be about selling the SPECIFIC product above, not generic B2B
software or services. If no product context is provided, focus on the lead's
industry needs.

Respond with exactly this JSON shape and no additional fields:
{{
  \"recommended_angle\": \"...\",
  \"recommended_first_offer\": \"...\",
  \"qualifying_question\": \"...\"
}}",
        org_name, org_type, industries, location, description, role, seller_context, product_context
    )
}
