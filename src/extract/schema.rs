//! The closed schema contract at the extraction boundary.
//!
//! The extraction capability is heterogeneous across model versions; any
//! field outside this contract is rejected at the boundary rather than
//! propagated (`deny_unknown_fields`).

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::llm::strip_code_fences;

/// Everything the capability may say about one page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawExtraction {
    #[serde(default)]
    pub page_type: Option<String>,
    #[serde(default)]
    pub relevant: bool,
    #[serde(default)]
    pub evidence_snippet: Option<String>,
    #[serde(default)]
    pub leads: Vec<RawLead>,
}

/// One organization with its contacts, as extracted from a single page.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLead {
    pub org_name: String,
    #[serde(default)]
    pub org_type: Option<String>,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub contacts: Vec<RawContact>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawContact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub role_category: Option<String>,
    #[serde(default)]
    pub channels: Vec<RawChannel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawChannel {
    #[serde(rename = "type")]
    pub channel_type: String,
    pub value: String,
}

/// Parse the capability's response against the closed contract.
pub fn parse_raw_extraction(response: &str) -> Result<RawExtraction> {
    let json = strip_code_fences(response);
    serde_json::from_str::<RawExtraction>(json)
        .with_context(|| "extraction response does not match the schema contract")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_extraction() {
        let raw = r#"{"page_type": "company_site", "relevant": true, "evidence_snippet": "Contact us", "leads": [{"org_name": "Acme"}]}"#;
        let parsed = parse_raw_extraction(raw).unwrap();
        assert_eq!(parsed.leads.len(), 1);
        assert_eq!(parsed.leads[0].org_name, "Acme");
        assert!(parsed.relevant);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let raw = r#"{"page_type": "other", "relevant": true, "leads": [], "confidence_estimate": 0.9}"#;
        assert!(parse_raw_extraction(raw).is_err());

        let nested = r#"{"relevant": true, "leads": [{"org_name": "Acme", "revenue": "10M"}]}"#;
        assert!(parse_raw_extraction(nested).is_err());
    }

    #[test]
    fn test_fenced_response_accepted() {
        let raw = "```json\n{\"relevant\": false, \"leads\": []}\n```";
        let parsed = parse_raw_extraction(raw).unwrap();
        assert!(!parsed.relevant);
    }

    #[test]
    fn test_channel_type_field_rename() {
        let raw = r#"{"relevant": true, "leads": [{"org_name": "Acme", "contacts": [{"channels": [{"type": "email", "value": "a@acme.example"}]}]}]}"#;
        let parsed = parse_raw_extraction(raw).unwrap();
        assert_eq!(parsed.leads[0].contacts[0].channels[0].channel_type, "email");
    }
}
