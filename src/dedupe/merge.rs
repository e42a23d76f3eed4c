//! Candidate merge semantics.
//!
//! Merging is a union operation and must tolerate candidates arriving in any
//! order. Set-valued fields (evidence, channels, contacts, industries) union
//! commutatively. Scalar fields resolve by source priority: a value observed
//! on the organization's own domain outranks one observed elsewhere, so the
//! outcome does not depend on which page was processed first. Equal-priority
//! disagreements keep the held value and are logged.

use std::collections::BTreeMap;
use tracing::debug;

use crate::audit::RunAudit;
use crate::dedupe::normalize::{normalize_channel_value, normalize_person_name};
use crate::models::{
    CandidateRecord, Contact, ContactChannel, Evidence, Lead, OrgType,
};
use crate::TARGET_MERGE;

/// A canonical lead plus the merge state the store tracks for its key.
#[derive(Debug, Clone)]
pub struct LeadSlot {
    pub lead: Lead,
    /// Whether any domain-aligned candidate has contributed yet. Scalar
    /// fields held only from misaligned sources are upgradeable.
    aligned_seen: bool,
}

/// Create the canonical lead for a key from its first candidate.
pub fn lead_from_candidate(
    candidate: CandidateRecord,
    dedupe_key: String,
    max_evidence: usize,
) -> LeadSlot {
    let aligned_seen = candidate.domain_aligned;
    let mut lead = Lead {
        organization: candidate.organization,
        contacts: candidate.contacts,
        confidence: 0.0,
        score_contributions: BTreeMap::new(),
        evidence: Vec::new(),
        advice: None,
        extracted_from_url: candidate.extracted_from_url,
        domain_aligned: candidate.domain_aligned,
        needs_review: false,
        dedupe_key,
    };
    rebuild_lead_evidence(&mut lead, max_evidence);
    LeadSlot { lead, aligned_seen }
}

/// Fold one more candidate into an existing lead. Idempotent: folding the
/// same candidate twice leaves the lead unchanged.
pub fn merge_candidate(
    slot: &mut LeadSlot,
    candidate: &CandidateRecord,
    audit: &RunAudit,
    max_evidence: usize,
) {
    let upgrade = candidate.domain_aligned && !slot.aligned_seen;
    let equal_priority = candidate.domain_aligned == slot.aligned_seen;
    let key = slot.lead.dedupe_key.clone();

    merge_scalar(
        "organization.name",
        &mut as_option(&mut slot.lead.organization.name),
        Some(candidate.organization.name.as_str()),
        upgrade,
        equal_priority,
        &key,
        audit,
    );
    merge_org_type(slot, candidate, upgrade, equal_priority, &key, audit);
    merge_scalar(
        "organization.country",
        &mut slot.lead.organization.country,
        candidate.organization.country.as_deref(),
        upgrade,
        equal_priority,
        &key,
        audit,
    );
    merge_scalar(
        "organization.region",
        &mut slot.lead.organization.region,
        candidate.organization.region.as_deref(),
        upgrade,
        equal_priority,
        &key,
        audit,
    );
    merge_scalar(
        "organization.city",
        &mut slot.lead.organization.city,
        candidate.organization.city.as_deref(),
        upgrade,
        equal_priority,
        &key,
        audit,
    );
    merge_scalar(
        "organization.website",
        &mut slot.lead.organization.website,
        candidate.organization.website.as_deref(),
        upgrade,
        equal_priority,
        &key,
        audit,
    );
    merge_scalar(
        "organization.description",
        &mut slot.lead.organization.description,
        candidate.organization.description.as_deref(),
        upgrade,
        equal_priority,
        &key,
        audit,
    );

    // Industries: set union, first-insertion order.
    for industry in &candidate.organization.industries {
        if !slot.lead.organization.industries.contains(industry) {
            slot.lead.organization.industries.push(industry.clone());
        }
    }

    // Organization evidence: union by source URL.
    absorb_evidence(
        &mut slot.lead.organization.evidence,
        &candidate.organization.evidence,
    );

    for contact in &candidate.contacts {
        merge_contact(&mut slot.lead.contacts, contact);
    }

    // Provenance: prefer the aligned contributor's URL; at equal priority the
    // lexicographically smaller URL wins so arrival order cannot matter.
    if upgrade {
        slot.lead.extracted_from_url = candidate.extracted_from_url.clone();
    } else if equal_priority && candidate.extracted_from_url < slot.lead.extracted_from_url {
        slot.lead.extracted_from_url = candidate.extracted_from_url.clone();
    }

    // A lead is aligned once any contributor saw it on its own domain;
    // corroboration from elsewhere does not un-verify it.
    slot.aligned_seen = slot.aligned_seen || candidate.domain_aligned;
    slot.lead.domain_aligned = slot.aligned_seen;

    rebuild_lead_evidence(&mut slot.lead, max_evidence);
}

/// Lead-level evidence is the union, by source URL, of organization and
/// channel evidence, ordered by URL and capped to bound export size.
pub fn rebuild_lead_evidence(lead: &mut Lead, max_evidence: usize) {
    let mut by_url: BTreeMap<String, Evidence> = BTreeMap::new();
    for evidence in &lead.organization.evidence {
        by_url
            .entry(evidence.source_url.clone())
            .or_insert_with(|| evidence.clone());
    }
    for contact in &lead.contacts {
        for channel in &contact.channels {
            for evidence in &channel.evidence {
                by_url
                    .entry(evidence.source_url.clone())
                    .or_insert_with(|| evidence.clone());
            }
        }
    }
    lead.evidence = by_url.into_values().take(max_evidence).collect();
}

// String scalars live as Option on the lead except the name; adapt in place.
fn as_option(name: &mut String) -> OptionalName<'_> {
    OptionalName { inner: name }
}

struct OptionalName<'a> {
    inner: &'a mut String,
}

trait ScalarField {
    fn current(&self) -> Option<&str>;
    fn set(&mut self, value: &str);
}

impl ScalarField for OptionalName<'_> {
    fn current(&self) -> Option<&str> {
        if self.inner.is_empty() {
            None
        } else {
            Some(self.inner)
        }
    }
    fn set(&mut self, value: &str) {
        *self.inner = value.to_string();
    }
}

impl ScalarField for Option<String> {
    fn current(&self) -> Option<&str> {
        self.as_deref()
    }
    fn set(&mut self, value: &str) {
        *self = Some(value.to_string());
    }
}

fn merge_scalar<F: ScalarField>(
    field: &str,
    existing: &mut F,
    incoming: Option<&str>,
    upgrade: bool,
    equal_priority: bool,
    dedupe_key: &str,
    audit: &RunAudit,
) {
    let incoming = match incoming {
        Some(value) => value,
        None => return,
    };
    match existing.current() {
        None => existing.set(incoming),
        Some(current) if current == incoming => {}
        Some(current) => {
            if upgrade {
                // Higher-priority source replaces a value held only from
                // misaligned pages.
                audit.record_merge_conflict(dedupe_key, field, incoming, current);
                existing.set(incoming);
            } else if equal_priority {
                audit.record_merge_conflict(dedupe_key, field, current, incoming);
            } else {
                debug!(target: TARGET_MERGE, "Ignoring lower-priority value for {} on {}: {}", field, dedupe_key, incoming);
            }
        }
    }
}

// OrgType has no absent state; `Other` is the upgradeable default.
fn merge_org_type(
    slot: &mut LeadSlot,
    candidate: &CandidateRecord,
    upgrade: bool,
    equal_priority: bool,
    dedupe_key: &str,
    audit: &RunAudit,
) {
    let incoming = candidate.organization.org_type;
    let current = slot.lead.organization.org_type;
    if incoming == OrgType::Other || incoming == current {
        return;
    }
    if current == OrgType::Other || upgrade {
        if current != OrgType::Other {
            audit.record_merge_conflict(
                dedupe_key,
                "organization.org_type",
                &incoming.to_string(),
                &current.to_string(),
            );
        }
        slot.lead.organization.org_type = incoming;
    } else if equal_priority {
        audit.record_merge_conflict(
            dedupe_key,
            "organization.org_type",
            &current.to_string(),
            &incoming.to_string(),
        );
    }
}

/// Merge one incoming contact into the lead's contact list. Named contacts
/// match on (normalized name, role); nameless contacts match an existing
/// nameless contact sharing any channel.
fn merge_contact(contacts: &mut Vec<Contact>, incoming: &Contact) {
    let target = match &incoming.name {
        Some(name) => {
            let incoming_key = (normalize_person_name(name), incoming.role_category);
            contacts.iter_mut().find(|existing| {
                existing
                    .name
                    .as_deref()
                    .map(|n| (normalize_person_name(n), existing.role_category) == incoming_key)
                    .unwrap_or(false)
            })
        }
        None => contacts.iter_mut().find(|existing| {
            existing.name.is_none() && shares_channel(existing, incoming)
        }),
    };

    match target {
        Some(existing) => {
            if existing.title.is_none() {
                existing.title = incoming.title.clone();
            }
            for channel in &incoming.channels {
                merge_channel(&mut existing.channels, channel);
            }
        }
        None => {
            if incoming.name.is_some() || !incoming.channels.is_empty() {
                contacts.push(incoming.clone());
            }
        }
    }
}

fn shares_channel(a: &Contact, b: &Contact) -> bool {
    a.channels.iter().any(|ca| {
        let ka = (
            ca.channel_type,
            normalize_channel_value(ca.channel_type, &ca.value),
        );
        b.channels.iter().any(|cb| {
            ka == (
                cb.channel_type,
                normalize_channel_value(cb.channel_type, &cb.value),
            )
        })
    })
}

/// A duplicate channel absorbs the new evidence instead of creating a second
/// channel.
fn merge_channel(channels: &mut Vec<ContactChannel>, incoming: &ContactChannel) {
    let incoming_key = (
        incoming.channel_type,
        normalize_channel_value(incoming.channel_type, &incoming.value),
    );
    match channels.iter_mut().find(|existing| {
        (
            existing.channel_type,
            normalize_channel_value(existing.channel_type, &existing.value),
        ) == incoming_key
    }) {
        Some(existing) => absorb_evidence(&mut existing.evidence, &incoming.evidence),
        None => channels.push(incoming.clone()),
    }
}

/// Append evidence items whose source URL is not yet cited.
fn absorb_evidence(existing: &mut Vec<Evidence>, incoming: &[Evidence]) {
    for evidence in incoming {
        if !existing
            .iter()
            .any(|held| held.source_url == evidence.source_url)
        {
            existing.push(evidence.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedupe::normalize::dedupe_key;
    use crate::models::{ChannelType, Evidence, Organization, PageType, RoleCategory};

    fn audit() -> RunAudit {
        RunAudit::new("test", "prompt")
    }

    fn evidence(url: &str) -> Evidence {
        Evidence::new(url, Some("snippet"))
    }

    fn candidate(name: &str, website: Option<&str>, url: &str, aligned: bool) -> CandidateRecord {
        CandidateRecord {
            organization: Organization {
                name: name.to_string(),
                org_type: OrgType::Other,
                industries: Vec::new(),
                country: None,
                region: None,
                city: None,
                website: website.map(str::to_string),
                description: None,
                evidence: vec![evidence(url)],
            },
            contacts: Vec::new(),
            extracted_from_url: url.to_string(),
            page_type: PageType::CompanySite,
            domain_aligned: aligned,
        }
    }

    fn with_email(mut cand: CandidateRecord, name: Option<&str>, email: &str) -> CandidateRecord {
        cand.contacts.push(Contact {
            name: name.map(str::to_string),
            title: None,
            role_category: RoleCategory::Unknown,
            channels: vec![ContactChannel {
                channel_type: ChannelType::Email,
                value: email.to_string(),
                evidence: vec![evidence(&cand.extracted_from_url)],
            }],
        });
        cand
    }

    fn fold_all(candidates: Vec<CandidateRecord>) -> Lead {
        let audit = audit();
        let mut iter = candidates.into_iter();
        let first = iter.next().unwrap();
        let key = dedupe_key(&first.organization);
        let mut slot = lead_from_candidate(first, key, 20);
        for cand in iter {
            merge_candidate(&mut slot, &cand, &audit, 20);
        }
        slot.lead
    }

    /// Fields that must agree for order-independence checks; timestamps on
    /// evidence naturally differ between constructions.
    fn comparable(lead: &Lead) -> (String, String, Vec<String>, Vec<Option<String>>, bool, String) {
        (
            lead.organization.name.clone(),
            lead.organization.org_type.to_string(),
            lead.evidence_urls(),
            lead.contacts.iter().map(|c| c.name.clone()).collect(),
            lead.domain_aligned,
            lead.extracted_from_url.clone(),
        )
    }

    #[test]
    fn test_merge_idempotence() {
        let audit = audit();
        let c = with_email(
            candidate("Acme", Some("https://acme.example"), "https://acme.example/contact", true),
            Some("Jane Doe"),
            "jane@acme.example",
        );
        let key = dedupe_key(&c.organization);

        let mut slot = lead_from_candidate(c.clone(), key, 20);
        merge_candidate(&mut slot, &c, &audit, 20);
        let once = slot.clone();
        merge_candidate(&mut slot, &c, &audit, 20);

        assert_eq!(comparable(&once.lead), comparable(&slot.lead));
        assert_eq!(once.lead.contacts.len(), 1);
        assert_eq!(once.lead.contacts[0].channels.len(), 1);
        assert_eq!(once.lead.contacts[0].channels[0].evidence.len(), 1);
    }

    #[test]
    fn test_merge_commutativity() {
        let c1 = with_email(
            candidate("Acme", Some("https://acme.example"), "https://acme.example/contact", true),
            Some("Jane Doe"),
            "jane@acme.example",
        );
        let mut c2 = candidate(
            "Acme Windows",
            Some("https://acme.example"),
            "https://directory.example/suppliers",
            false,
        );
        c2.organization.country = Some("Norway".to_string());

        let forward = fold_all(vec![c1.clone(), c2.clone()]);
        let backward = fold_all(vec![c2, c1]);

        assert_eq!(comparable(&forward), comparable(&backward));
        // The aligned source's name wins regardless of order.
        assert_eq!(forward.organization.name, "Acme");
        // The misaligned source still fills gaps.
        assert_eq!(forward.organization.country.as_deref(), Some("Norway"));
        // Seen on its own domain once, the lead stays aligned.
        assert!(forward.domain_aligned);
        assert_eq!(forward.extracted_from_url, "https://acme.example/contact");
    }

    #[test]
    fn test_same_domain_spelling_variants_collapse() {
        // Two pages, same website domain, names spelled differently.
        let c1 = candidate(
            "Acme Inc.",
            Some("https://acme.example"),
            "https://acme.example/about",
            true,
        );
        let c2 = candidate(
            "ACME, INC",
            Some("https://www.acme.example"),
            "https://lists.example/windows",
            false,
        );
        assert_eq!(dedupe_key(&c1.organization), dedupe_key(&c2.organization));

        let lead = fold_all(vec![c1, c2]);
        let urls = lead.evidence_urls();
        assert!(urls.contains(&"https://acme.example/about".to_string()));
        assert!(urls.contains(&"https://lists.example/windows".to_string()));
    }

    #[test]
    fn test_duplicate_channel_absorbs_evidence() {
        let c1 = with_email(
            candidate("Acme", Some("https://acme.example"), "https://acme.example/contact", true),
            Some("Jane Doe"),
            "jane@acme.example",
        );
        let c2 = with_email(
            candidate("Acme", Some("https://acme.example"), "https://partners.example/acme", false),
            Some("Jane Doe"),
            "JANE@ACME.EXAMPLE",
        );

        let lead = fold_all(vec![c1, c2]);
        assert_eq!(lead.contacts.len(), 1);
        // One channel, evidence from both pages.
        assert_eq!(lead.contacts[0].channels.len(), 1);
        assert_eq!(lead.contacts[0].channels[0].evidence.len(), 2);
    }

    #[test]
    fn test_distinct_named_contacts_kept() {
        let c1 = with_email(
            candidate("Acme", Some("https://acme.example"), "https://acme.example/team", true),
            Some("Jane Doe"),
            "jane@acme.example",
        );
        let c2 = with_email(
            candidate("Acme", Some("https://acme.example"), "https://acme.example/contact", true),
            Some("John Smith"),
            "john@acme.example",
        );
        let lead = fold_all(vec![c1, c2]);
        assert_eq!(lead.contacts.len(), 2);
    }

    #[test]
    fn test_nameless_contacts_dedupe_by_channel() {
        let c1 = with_email(
            candidate("Acme", Some("https://acme.example"), "https://acme.example", true),
            None,
            "info@acme.example",
        );
        let c2 = with_email(
            candidate("Acme", Some("https://acme.example"), "https://lists.example/acme", false),
            None,
            "info@acme.example",
        );
        let lead = fold_all(vec![c1, c2]);
        assert_eq!(lead.contacts.len(), 1);
        assert_eq!(lead.contacts[0].channels[0].evidence.len(), 2);
    }

    #[test]
    fn test_equal_priority_conflict_keeps_first_and_logs() {
        let audit = audit();
        let mut c1 = candidate("Acme", Some("https://acme.example"), "https://acme.example/a", true);
        c1.organization.country = Some("Norway".to_string());
        let mut c2 = candidate("Acme", Some("https://acme.example"), "https://acme.example/b", true);
        c2.organization.country = Some("Sweden".to_string());

        let key = dedupe_key(&c1.organization);
        let mut slot = lead_from_candidate(c1, key, 20);
        merge_candidate(&mut slot, &c2, &audit, 20);

        assert_eq!(slot.lead.organization.country.as_deref(), Some("Norway"));
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn test_org_type_other_is_upgradeable() {
        let c1 = candidate("Acme", Some("https://acme.example"), "https://acme.example", true);
        let mut c2 = candidate("Acme", Some("https://acme.example"), "https://lists.example", false);
        c2.organization.org_type = OrgType::Manufacturer;

        let lead = fold_all(vec![c1, c2]);
        assert_eq!(lead.organization.org_type, OrgType::Manufacturer);
    }

    #[test]
    fn test_evidence_cap_bounds_export() {
        let base = candidate("Acme", Some("https://acme.example"), "https://acme.example", true);
        let key = dedupe_key(&base.organization);
        let audit = audit();
        let mut slot = lead_from_candidate(base, key, 3);
        for i in 0..10 {
            let cand = candidate(
                "Acme",
                Some("https://acme.example"),
                &format!("https://mirror{}.example/acme", i),
                false,
            );
            merge_candidate(&mut slot, &cand, &audit, 3);
        }
        assert_eq!(slot.lead.evidence.len(), 3);
        // The organization itself still remembers every source.
        assert_eq!(slot.lead.organization.evidence.len(), 11);
    }
}
