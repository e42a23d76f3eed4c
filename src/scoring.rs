//! Confidence scoring: a pure, explainable function over a finalized lead.
//!
//! Each heuristic contributes at most once and is recorded by name, so the
//! final score is always reconstructible as the clamped sum of the recorded
//! contributions.

use std::collections::BTreeMap;

use crate::models::{ChannelType, Lead, RoleCategory};

const EMAIL_WEIGHT: f32 = 0.25;
const ROLE_WEIGHT: f32 = 0.20;
const EVIDENCE_WEIGHT: f32 = 0.20;
const PHONE_WEIGHT: f32 = 0.15;
const WEBSITE_WEIGHT: f32 = 0.10;
const MISALIGNED_PENALTY: f32 = -0.30;

/// Compute a lead's confidence and the named contributions behind it.
pub fn score_lead(lead: &Lead) -> (f32, BTreeMap<String, f32>) {
    let mut contributions = BTreeMap::new();

    if lead.has_channel(ChannelType::Email) {
        contributions.insert("email".to_string(), EMAIL_WEIGHT);
    }

    if lead
        .contacts
        .iter()
        .any(|contact| contact.role_category != RoleCategory::Unknown)
    {
        contributions.insert("recognized_role".to_string(), ROLE_WEIGHT);
    }

    if !lead.evidence.is_empty() {
        contributions.insert("evidence".to_string(), EVIDENCE_WEIGHT);
    }

    if lead.has_channel(ChannelType::Phone) {
        contributions.insert("phone".to_string(), PHONE_WEIGHT);
    }

    if lead.organization.website.is_some() {
        contributions.insert("website".to_string(), WEBSITE_WEIGHT);
    }

    if !lead.domain_aligned {
        contributions.insert("domain_misaligned".to_string(), MISALIGNED_PENALTY);
    }

    let confidence = clamp_unit(contributions.values().sum());
    (confidence, contributions)
}

/// Score a lead in place and set its review flag.
pub fn apply_score(lead: &mut Lead, review_threshold: f32) {
    let (confidence, contributions) = score_lead(lead);
    lead.confidence = confidence;
    lead.score_contributions = contributions;
    lead.needs_review = !lead.domain_aligned || confidence < review_threshold;
}

pub fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Contact, ContactChannel, Evidence, Organization, OrgType,
    };
    use std::collections::BTreeMap;

    fn lead(email: bool, role: RoleCategory, website: bool, aligned: bool) -> Lead {
        let evidence = Evidence::new("https://acme.example/contact", Some("snippet"));
        let channels = if email {
            vec![ContactChannel {
                channel_type: ChannelType::Email,
                value: "info@acme.example".to_string(),
                evidence: vec![evidence.clone()],
            }]
        } else {
            Vec::new()
        };
        Lead {
            organization: Organization {
                name: "Acme".to_string(),
                org_type: OrgType::Manufacturer,
                industries: Vec::new(),
                country: None,
                region: None,
                city: None,
                website: website.then(|| "https://acme.example".to_string()),
                description: None,
                evidence: vec![evidence.clone()],
            },
            contacts: vec![Contact {
                name: None,
                title: None,
                role_category: role,
                channels,
            }],
            confidence: 0.0,
            score_contributions: BTreeMap::new(),
            evidence: vec![evidence],
            advice: None,
            extracted_from_url: "https://acme.example/contact".to_string(),
            domain_aligned: aligned,
            needs_review: false,
            dedupe_key: "acme.example".to_string(),
        }
    }

    #[test]
    fn test_company_site_email_no_role() {
        // One email with snippet evidence, no role match, aligned domain.
        let mut l = lead(true, RoleCategory::Unknown, true, true);
        apply_score(&mut l, 0.4);

        assert_eq!(l.score_contributions.len(), 3);
        assert_eq!(l.score_contributions["evidence"], 0.20);
        assert_eq!(l.score_contributions["email"], 0.25);
        assert_eq!(l.score_contributions["website"], 0.10);
        assert!((l.confidence - 0.55).abs() < 1e-6);
        assert!(!l.needs_review);
    }

    #[test]
    fn test_misalignment_penalty_and_review() {
        let mut l = lead(true, RoleCategory::Unknown, true, false);
        apply_score(&mut l, 0.4);

        assert!((l.confidence - 0.25).abs() < 1e-6);
        assert_eq!(l.score_contributions["domain_misaligned"], -0.30);
        assert!(l.needs_review);
    }

    #[test]
    fn test_low_confidence_flags_review() {
        // Aligned but nearly signal-free: evidence only.
        let mut l = lead(false, RoleCategory::Unknown, false, true);
        apply_score(&mut l, 0.4);
        assert!((l.confidence - 0.20).abs() < 1e-6);
        assert!(l.needs_review);
    }

    #[test]
    fn test_recognized_role_counts_once() {
        let mut l = lead(true, RoleCategory::Ceo, true, true);
        l.contacts.push(Contact {
            name: Some("Second Director".to_string()),
            title: None,
            role_category: RoleCategory::Director,
            channels: Vec::new(),
        });
        apply_score(&mut l, 0.4);
        // 0.25 + 0.20 + 0.20 + 0.10, role applied once despite two matches.
        assert!((l.confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_score_reconstruction() {
        for (email, role, website, aligned) in [
            (true, RoleCategory::Ceo, true, true),
            (true, RoleCategory::Unknown, false, false),
            (false, RoleCategory::Sales, true, false),
            (false, RoleCategory::Unknown, false, true),
        ] {
            let mut l = lead(email, role, website, aligned);
            apply_score(&mut l, 0.4);
            let sum: f32 = l.score_contributions.values().sum();
            assert!((clamp_unit(sum) - l.confidence).abs() < 1e-6);
        }
    }

    #[test]
    fn test_clamped_at_zero() {
        // Misaligned with no other signals cannot go negative.
        let mut l = lead(false, RoleCategory::Unknown, false, false);
        l.evidence.clear();
        apply_score(&mut l, 0.4);
        assert_eq!(l.confidence, 0.0);
        let sum: f32 = l.score_contributions.values().sum();
        assert_eq!(clamp_unit(sum), 0.0);
    }

    #[test]
    fn test_phone_contribution() {
        let mut l = lead(false, RoleCategory::Unknown, false, true);
        l.contacts[0].channels.push(ContactChannel {
            channel_type: ChannelType::Phone,
            value: "+4722334455".to_string(),
            evidence: vec![Evidence::new("https://acme.example", None)],
        });
        apply_score(&mut l, 0.4);
        assert_eq!(l.score_contributions["phone"], 0.15);
        assert!((l.confidence - 0.35).abs() < 1e-6);
    }
}
