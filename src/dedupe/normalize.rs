//! Identity normalization for deduplication. The dedupe key is derived, not
//! stored-authoritative: it must be recomputable from organization fields at
//! any time.

use unicode_normalization::UnicodeNormalization;

use crate::fetch::normalize_domain;
use crate::models::{ChannelType, Organization};

/// Legal-entity suffixes that carry no identity.
const LEGAL_SUFFIXES: &[&str] = &[
    "llc", "inc", "ltd", "corp", "co", "company", "limited", "gmbh", "ag", "sa",
];

/// Unicode-fold, lowercase, replace punctuation with spaces, collapse runs.
fn basic_normalize(name: &str) -> String {
    name.nfkd()
        .collect::<String>()
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize an organization name: fold case and punctuation, then strip
/// trailing legal suffixes ("Acme Windows Inc." and "ACME, INC" both key to
/// "acme windows" / "acme").
pub fn normalize_org_name(name: &str) -> String {
    let normalized = basic_normalize(name);
    let mut tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
    while tokens.len() > 1 {
        let last = tokens[tokens.len() - 1];
        if LEGAL_SUFFIXES.contains(&last) {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}

/// Normalize a person name for contact matching.
pub fn normalize_person_name(name: &str) -> String {
    basic_normalize(name)
}

/// Normalize a channel value for matching: emails fold case, phones reduce
/// to digits (keeping a leading +), everything else folds case.
pub fn normalize_channel_value(channel_type: ChannelType, value: &str) -> String {
    match channel_type {
        ChannelType::Email => value.trim().to_lowercase(),
        ChannelType::Phone => {
            let trimmed = value.trim();
            let mut normalized = String::new();
            for (i, c) in trimmed.chars().enumerate() {
                if c.is_ascii_digit() || (i == 0 && c == '+') {
                    normalized.push(c);
                }
            }
            normalized
        }
        _ => value.trim().to_lowercase(),
    }
}

/// Derive the dedupe key: the website domain when one is claimed, else the
/// normalized organization name.
pub fn dedupe_key(organization: &Organization) -> String {
    match organization.website.as_deref() {
        Some(website) => {
            let domain = normalize_domain(website);
            if domain.is_empty() {
                normalize_org_name(&organization.name)
            } else {
                domain
            }
        }
        None => normalize_org_name(&organization.name),
    }
}
