//! Run audit trail: every query issued, URL discovered, fetch outcome, and
//! drop decision is recorded here so a human can reconstruct why the final
//! lead count differs from the number of pages fetched.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use crate::models::FetchStatus;

/// One append-only audit event. Entries are never mutated after the fact.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEntry {
    QueryIssued {
        query: String,
        provider: String,
        urls_returned: usize,
        at: DateTime<Utc>,
    },
    UrlDiscovered {
        url: String,
        query: String,
        at: DateTime<Utc>,
    },
    UrlFiltered {
        url: String,
        reason: String,
        at: DateTime<Utc>,
    },
    FetchOutcome {
        url: String,
        status: FetchStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content_hash: Option<String>,
        at: DateTime<Utc>,
    },
    ExtractionFailed {
        url: String,
        reason: String,
        at: DateTime<Utc>,
    },
    CandidateDropped {
        url: String,
        organization: String,
        reason: String,
        at: DateTime<Utc>,
    },
    ChannelDropped {
        url: String,
        channel_type: String,
        reason: String,
        at: DateTime<Utc>,
    },
    MergeConflict {
        dedupe_key: String,
        field: String,
        kept: String,
        ignored: String,
        at: DateTime<Utc>,
    },
    AdviceFailed {
        dedupe_key: String,
        error: String,
        at: DateTime<Utc>,
    },
}

/// Thread-safe, append-only audit log for one run.
pub struct RunAudit {
    pub run_id: String,
    pub prompt: String,
    pub started_at: DateTime<Utc>,
    entries: Mutex<Vec<AuditEntry>>,
}

#[derive(Serialize)]
struct AuditDocument<'a> {
    run_id: &'a str,
    prompt: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    entries: &'a [AuditEntry],
}

impl RunAudit {
    pub fn new(run_id: &str, prompt: &str) -> Self {
        RunAudit {
            run_id: run_id.to_string(),
            prompt: prompt.to_string(),
            started_at: Utc::now(),
            entries: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, entry: AuditEntry) {
        self.entries.lock().expect("audit lock poisoned").push(entry);
    }

    pub fn record_query(&self, query: &str, provider: &str, urls_returned: usize) {
        self.push(AuditEntry::QueryIssued {
            query: query.to_string(),
            provider: provider.to_string(),
            urls_returned,
            at: Utc::now(),
        });
    }

    pub fn record_url_discovered(&self, url: &str, query: &str) {
        self.push(AuditEntry::UrlDiscovered {
            url: url.to_string(),
            query: query.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_url_filtered(&self, url: &str, reason: &str) {
        self.push(AuditEntry::UrlFiltered {
            url: url.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_fetch(
        &self,
        url: &str,
        status: FetchStatus,
        status_code: Option<u16>,
        error: Option<&str>,
        content_hash: Option<&str>,
    ) {
        self.push(AuditEntry::FetchOutcome {
            url: url.to_string(),
            status,
            status_code,
            error: error.map(str::to_string),
            content_hash: content_hash.map(str::to_string),
            at: Utc::now(),
        });
    }

    pub fn record_extraction_failed(&self, url: &str, reason: &str) {
        self.push(AuditEntry::ExtractionFailed {
            url: url.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_candidate_dropped(&self, url: &str, organization: &str, reason: &str) {
        self.push(AuditEntry::CandidateDropped {
            url: url.to_string(),
            organization: organization.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_channel_dropped(&self, url: &str, channel_type: &str, reason: &str) {
        self.push(AuditEntry::ChannelDropped {
            url: url.to_string(),
            channel_type: channel_type.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_merge_conflict(&self, dedupe_key: &str, field: &str, kept: &str, ignored: &str) {
        self.push(AuditEntry::MergeConflict {
            dedupe_key: dedupe_key.to_string(),
            field: field.to_string(),
            kept: kept.to_string(),
            ignored: ignored.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_advice_failed(&self, dedupe_key: &str, error: &str) {
        self.push(AuditEntry::AdviceFailed {
            dedupe_key: dedupe_key.to_string(),
            error: error.to_string(),
            at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("audit lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the entries so far (tests and report generation).
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit lock poisoned").clone()
    }

    /// Materialize the audit trail as a JSON artifact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let entries = self.snapshot();
        let doc = AuditDocument {
            run_id: &self.run_id,
            prompt: &self.prompt,
            started_at: self.started_at,
            finished_at: Utc::now(),
            entries: &entries,
        };
        let json = serde_json::to_string_pretty(&doc).context("serializing audit trail")?;
        fs::write(path, json).with_context(|| format!("writing audit trail to {:?}", path))?;
        Ok(())
    }
}
