//! The extraction gate: every candidate record leaving this module satisfies
//! the evidence invariants, the one-company-per-page rule, and carries a
//! domain-alignment verdict.

use lazy_static::lazy_static;
use std::collections::HashMap;
use tracing::debug;

use crate::audit::RunAudit;
use crate::extract::schema::{RawExtraction, RawLead};
use crate::fetch::normalize_domain;
use crate::models::{
    CandidateRecord, ChannelType, Contact, ContactChannel, Evidence, Organization, OrgType,
    PageType, RoleCategory,
};
use crate::TARGET_PIPELINE;

lazy_static! {
    /// Placeholder strings the capability emits instead of an absent value.
    static ref SENTINEL_VALUES: Vec<&'static str> = vec![
        "not provided",
        "n/a",
        "none",
        "unknown",
        "not available",
        "not specified",
        "-",
        "null",
        "na",
    ];

    /// Country spellings folded to a canonical form.
    static ref COUNTRY_ALIASES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("usa", "United States");
        map.insert("us", "United States");
        map.insert("u.s.", "United States");
        map.insert("u.s.a.", "United States");
        map.insert("united states of america", "United States");
        map.insert("uk", "United Kingdom");
        map.insert("u.k.", "United Kingdom");
        map.insert("england", "United Kingdom");
        map.insert("uae", "United Arab Emirates");
        map.insert("deutschland", "Germany");
        map.insert("holland", "Netherlands");
        map
    };
}

/// Clean a string value, mapping sentinels and empties to an explicit absent.
pub fn clean_value(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() || SENTINEL_VALUES.contains(&value.to_lowercase().as_str()) {
        return None;
    }
    Some(value.to_string())
}

/// Normalize country names via the alias table.
pub fn normalize_country(country: Option<&str>) -> Option<String> {
    let country = clean_value(country)?;
    Some(
        COUNTRY_ALIASES
            .get(country.to_lowercase().as_str())
            .map(|canonical| canonical.to_string())
            .unwrap_or(country),
    )
}

/// Coerce a website value into canonical URL form. Bare domains gain an
/// https scheme; navigation text and placeholders become absent.
pub fn normalize_website(website: Option<&str>) -> Option<String> {
    let website = clean_value(website)?;
    let lowered = website.to_lowercase();
    if lowered == "visit website" || lowered == "click here" {
        return None;
    }
    if website.starts_with("http://") || website.starts_with("https://") {
        return Some(website);
    }
    // A bare domain has a dot and no spaces; anything else is junk.
    if website.contains('.') && !website.contains(' ') {
        return Some(format!("https://{}", website));
    }
    None
}

/// Apply the per-page invariants to a parsed extraction, producing zero or
/// more normalized candidate records.
pub fn gate_extraction(
    raw: RawExtraction,
    page_url: &str,
    audit: &RunAudit,
) -> Vec<CandidateRecord> {
    if !raw.relevant {
        debug!(target: TARGET_PIPELINE, "Page marked not relevant: {}", page_url);
        return Vec::new();
    }

    let page_type = raw
        .page_type
        .as_deref()
        .map(PageType::from)
        .unwrap_or(PageType::Other);

    // A non-directory page may describe at most one organization; extras are
    // misreads of partner/client mentions.
    let mut raw_leads = raw.leads;
    if page_type != PageType::Directory && raw_leads.len() > 1 {
        for dropped in raw_leads.drain(1..) {
            audit.record_candidate_dropped(
                page_url,
                &dropped.org_name,
                "non-directory page yields at most one organization",
            );
        }
    }

    let snippet = raw.evidence_snippet.as_deref();
    let page_domain = normalize_domain(page_url);

    let mut candidates = Vec::new();
    for raw_lead in raw_leads {
        if let Some(candidate) =
            gate_one(raw_lead, page_url, &page_domain, page_type, snippet, audit)
        {
            candidates.push(candidate);
        }
    }
    candidates
}

fn gate_one(
    raw: RawLead,
    page_url: &str,
    page_domain: &str,
    page_type: PageType,
    snippet: Option<&str>,
    audit: &RunAudit,
) -> Option<CandidateRecord> {
    let org_name = match clean_value(Some(&raw.org_name)) {
        Some(name) => name,
        None => {
            audit.record_candidate_dropped(page_url, &raw.org_name, "organization name missing");
            return None;
        }
    };

    let page_evidence = make_evidence(page_url, snippet);

    // Fail-soft per channel: a channel with no usable value or no evidence is
    // dropped without taking the record with it.
    let mut contacts = Vec::new();
    for raw_contact in raw.contacts {
        let mut channels = Vec::new();
        for raw_channel in raw_contact.channels {
            let channel_type = ChannelType::from(raw_channel.channel_type.as_str());
            let value = match clean_value(Some(&raw_channel.value)) {
                Some(value) => value,
                None => {
                    audit.record_channel_dropped(
                        page_url,
                        &channel_type.to_string(),
                        "empty or placeholder value",
                    );
                    continue;
                }
            };
            let evidence = match &page_evidence {
                Some(evidence) => vec![evidence.clone()],
                None => {
                    audit.record_channel_dropped(
                        page_url,
                        &channel_type.to_string(),
                        "no evidence available for channel",
                    );
                    continue;
                }
            };
            channels.push(ContactChannel {
                channel_type,
                value,
                evidence,
            });
        }

        let name = clean_value(raw_contact.name.as_deref());
        let title = clean_value(raw_contact.title.as_deref());
        let role_category = raw_contact
            .role_category
            .as_deref()
            .map(RoleCategory::from)
            .unwrap_or(RoleCategory::Unknown);

        // A contact is worth keeping if it is reachable or at least named.
        if !channels.is_empty() || name.is_some() {
            contacts.push(Contact {
                name,
                title,
                role_category,
                channels,
            });
        }
    }

    let website = normalize_website(raw.website.as_deref());

    // Fail-closed: an organization with no evidence never reaches the dedupe
    // engine.
    let evidence = match page_evidence {
        Some(evidence) => vec![evidence],
        None => {
            audit.record_candidate_dropped(
                page_url,
                &org_name,
                "organization has no supporting evidence",
            );
            return None;
        }
    };

    let organization = Organization {
        name: org_name,
        org_type: raw
            .org_type
            .as_deref()
            .map(OrgType::from)
            .unwrap_or(OrgType::Other),
        industries: raw
            .industries
            .iter()
            .filter_map(|industry| clean_value(Some(industry)))
            .collect(),
        country: normalize_country(raw.country.as_deref()),
        region: clean_value(raw.region.as_deref()),
        city: clean_value(raw.city.as_deref()),
        website: website.clone(),
        description: clean_value(raw.description.as_deref()),
        evidence,
    };

    // An organization with no claimed website is assumed to come from the
    // page it was found on.
    let domain_aligned = match website.as_deref() {
        Some(website) => normalize_domain(website) == *page_domain,
        None => true,
    };

    Some(CandidateRecord {
        organization,
        contacts,
        extracted_from_url: page_url.to_string(),
        page_type,
        domain_aligned,
    })
}

fn make_evidence(page_url: &str, snippet: Option<&str>) -> Option<Evidence> {
    if page_url.trim().is_empty() {
        return None;
    }
    Some(Evidence::new(page_url, snippet))
}
