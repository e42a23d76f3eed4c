//! Export surface: the stable CSV column contract, the row derivation, and
//! the human-readable run report.
//!
//! Column order and presence are a compatibility contract for downstream
//! consumers; change them only with a schema version bump.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::models::{ChannelType, Lead, RunStats};

/// Stable CSV schema, derived from the canonical lead model.
pub const CSV_COLUMNS: &[&str] = &[
    // Organization
    "organization_name",
    "org_type",
    "industries",
    "country",
    "region",
    "city",
    "website",
    "description",
    // Contact (primary)
    "contact_name",
    "contact_title",
    "role_category",
    "email",
    "phone",
    "linkedin",
    "contact_page",
    // Evidence + quality
    "evidence_urls",
    "evidence_snippets",
    "confidence",
    "score_contributions",
    "domain_aligned",
    "needs_review",
    "dedupe_key",
    // Approach advice
    "recommended_angle",
    "recommended_first_offer",
    "qualifying_question",
];

/// Flatten a lead into one CSV row, in `CSV_COLUMNS` order.
pub fn lead_to_row(lead: &Lead) -> Vec<String> {
    let contact = lead.primary_contact();

    let evidence_snippets: Vec<&str> = lead
        .evidence
        .iter()
        .filter_map(|e| e.snippet.as_deref())
        .take(3)
        .collect();

    let contributions: Vec<String> = lead
        .score_contributions
        .iter()
        .map(|(name, weight)| format!("{}:{:+.2}", name, weight))
        .collect();

    vec![
        lead.organization.name.clone(),
        lead.organization.org_type.to_string(),
        lead.organization.industries.join(";"),
        lead.organization.country.clone().unwrap_or_default(),
        lead.organization.region.clone().unwrap_or_default(),
        lead.organization.city.clone().unwrap_or_default(),
        lead.organization.website.clone().unwrap_or_default(),
        lead.organization.description.clone().unwrap_or_default(),
        contact.and_then(|c| c.name.clone()).unwrap_or_default(),
        contact.and_then(|c| c.title.clone()).unwrap_or_default(),
        contact
            .map(|c| c.role_category.to_string())
            .unwrap_or_default(),
        lead.primary_channel(ChannelType::Email)
            .unwrap_or_default()
            .to_string(),
        lead.primary_channel(ChannelType::Phone)
            .unwrap_or_default()
            .to_string(),
        lead.primary_channel(ChannelType::Linkedin)
            .unwrap_or_default()
            .to_string(),
        lead.primary_channel(ChannelType::ContactPage)
            .unwrap_or_default()
            .to_string(),
        lead.evidence_urls().join(";"),
        evidence_snippets.join(" | "),
        format!("{:.2}", lead.confidence),
        contributions.join(";"),
        lead.domain_aligned.to_string(),
        lead.needs_review.to_string(),
        lead.dedupe_key.clone(),
        lead.advice
            .as_ref()
            .map(|a| a.recommended_angle.clone())
            .unwrap_or_default(),
        lead.advice
            .as_ref()
            .map(|a| a.recommended_first_offer.clone())
            .unwrap_or_default(),
        lead.advice
            .as_ref()
            .map(|a| a.qualifying_question.clone())
            .unwrap_or_default(),
    ]
}

/// Render the markdown run report.
pub fn generate_report(run_id: &str, prompt: &str, stats: &RunStats, leads: &[Lead]) -> String {
    let mut by_country: Vec<(String, usize)> = Vec::new();
    let mut by_type: Vec<(String, usize)> = Vec::new();

    for lead in leads {
        let country = lead
            .organization
            .country
            .clone()
            .unwrap_or_else(|| "Unknown".to_string());
        bump(&mut by_country, country);
        bump(&mut by_type, lead.organization.org_type.to_string());
    }
    by_country.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    by_type.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let needs_review = leads.iter().filter(|lead| lead.needs_review).count();

    let mut report = format!(
        "# Prospect Run Report

## Run Info
| Field | Value |
|---|---|
| Run ID | {} |
| Queries issued | {} |
| URLs discovered | {} |
| URLs fetched | {} |
| Fetch failures | {} |
| Pages extracted | {} |
| Raw candidates | {} |
| Leads after dedupe | {} |
| Leads exported | {} |
| Needs review | {} |

## Prompt
```
{}
```
",
        run_id,
        stats.queries_issued,
        stats.urls_discovered,
        stats.urls_fetched,
        stats.fetch_failed,
        stats.pages_extracted,
        stats.candidates_extracted,
        stats.leads_after_dedupe,
        stats.leads_exported,
        needs_review,
        prompt,
    );

    report.push_str("\n## Leads by Country\n| Country | Count |\n|---|---|\n");
    for (country, count) in &by_country {
        report.push_str(&format!("| {} | {} |\n", country, count));
    }

    report.push_str("\n## Leads by Type\n| Type | Count |\n|---|---|\n");
    for (org_type, count) in &by_type {
        report.push_str(&format!("| {} | {} |\n", org_type, count));
    }

    report
}

fn bump(counts: &mut Vec<(String, usize)>, key: String) {
    match counts.iter_mut().find(|(k, _)| *k == key) {
        Some((_, count)) => *count += 1,
        None => counts.push((key, 1)),
    }
}

pub fn save_report(
    run_id: &str,
    prompt: &str,
    stats: &RunStats,
    leads: &[Lead],
    path: &Path,
) -> Result<()> {
    let report = generate_report(run_id, prompt, stats, leads);
    fs::write(path, report).with_context(|| format!("writing run report to {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Contact, ContactChannel, Evidence, Organization, OrgType, RoleCategory,
    };
    use std::collections::BTreeMap;

    fn sample_lead() -> Lead {
        let evidence = Evidence::new("https://acme.example/contact", Some("Call us today"));
        let mut contributions = BTreeMap::new();
        contributions.insert("email".to_string(), 0.25);
        contributions.insert("evidence".to_string(), 0.20);
        Lead {
            organization: Organization {
                name: "Acme Windows".to_string(),
                org_type: OrgType::Manufacturer,
                industries: vec!["windows".to_string(), "doors".to_string()],
                country: Some("Norway".to_string()),
                region: None,
                city: Some("Oslo".to_string()),
                website: Some("https://acme.example".to_string()),
                description: None,
                evidence: vec![evidence.clone()],
            },
            contacts: vec![Contact {
                name: Some("Jane Doe".to_string()),
                title: Some("CEO".to_string()),
                role_category: RoleCategory::Ceo,
                channels: vec![ContactChannel {
                    channel_type: ChannelType::Email,
                    value: "jane@acme.example".to_string(),
                    evidence: vec![evidence.clone()],
                }],
            }],
            confidence: 0.45,
            score_contributions: contributions,
            evidence: vec![evidence],
            advice: None,
            extracted_from_url: "https://acme.example/contact".to_string(),
            domain_aligned: true,
            needs_review: false,
            dedupe_key: "acme.example".to_string(),
        }
    }

    #[test]
    fn test_row_matches_column_contract() {
        let row = lead_to_row(&sample_lead());
        assert_eq!(row.len(), CSV_COLUMNS.len());

        let by_name: std::collections::HashMap<&str, &String> =
            CSV_COLUMNS.iter().copied().zip(row.iter()).collect();
        assert_eq!(by_name["organization_name"], "Acme Windows");
        assert_eq!(by_name["org_type"], "manufacturer");
        assert_eq!(by_name["industries"], "windows;doors");
        assert_eq!(by_name["contact_name"], "Jane Doe");
        assert_eq!(by_name["email"], "jane@acme.example");
        assert_eq!(by_name["phone"], "");
        assert_eq!(by_name["confidence"], "0.45");
        assert_eq!(by_name["score_contributions"], "email:+0.25;evidence:+0.20");
        assert_eq!(by_name["domain_aligned"], "true");
        assert_eq!(by_name["needs_review"], "false");
        assert_eq!(by_name["evidence_urls"], "https://acme.example/contact");
        assert_eq!(by_name["recommended_angle"], "");
    }

    #[test]
    fn test_report_contains_counts() {
        let stats = RunStats {
            queries_issued: 3,
            urls_discovered: 30,
            urls_fetched: 20,
            fetch_ok: 18,
            fetch_failed: 2,
            pages_extracted: 18,
            candidates_extracted: 12,
            leads_after_dedupe: 7,
            leads_exported: 7,
            ..Default::default()
        };
        let leads = vec![sample_lead()];
        let report = generate_report("run_1", "window makers in norway", &stats, &leads);
        assert!(report.contains("| Run ID | run_1 |"));
        assert!(report.contains("| Leads after dedupe | 7 |"));
        assert!(report.contains("| Norway | 1 |"));
        assert!(report.contains("| manufacturer | 1 |"));
        assert!(report.contains("window makers in norway"));
    }
}
