//! Canonical lead set for a run: candidates fold in as they arrive, in any
//! order, from any worker.

mod merge;
mod normalize;

pub use self::merge::{lead_from_candidate, merge_candidate, rebuild_lead_evidence, LeadSlot};
pub use self::normalize::{
    dedupe_key, normalize_channel_value, normalize_org_name, normalize_person_name,
};

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::audit::RunAudit;
use crate::models::{CandidateRecord, Lead};
use crate::TARGET_MERGE;

/// Key-addressed concurrent store of canonical leads. The per-key entry is
/// the only critical section; merges on different keys proceed concurrently.
pub struct LeadStore {
    slots: DashMap<String, LeadSlot>,
    audit: Arc<RunAudit>,
    max_evidence: usize,
}

impl LeadStore {
    pub fn new(audit: Arc<RunAudit>, max_evidence: usize) -> Self {
        LeadStore {
            slots: DashMap::new(),
            audit,
            max_evidence,
        }
    }

    /// Fold a candidate into the canonical set.
    pub fn fold(&self, candidate: CandidateRecord) {
        let key = dedupe_key(&candidate.organization);
        debug!(target: TARGET_MERGE, "Folding candidate '{}' under key '{}'", candidate.organization.name, key);
        match self.slots.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                merge_candidate(occupied.get_mut(), &candidate, &self.audit, self.max_evidence);
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(lead_from_candidate(candidate, key, self.max_evidence));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drain the canonical set once no further candidates are expected.
    /// Deterministic order (by dedupe key) regardless of fold order.
    pub fn finalize(self) -> Vec<Lead> {
        let mut leads: Vec<Lead> = self
            .slots
            .into_iter()
            .map(|(_, slot)| slot.lead)
            .collect();
        leads.sort_by(|a, b| a.dedupe_key.cmp(&b.dedupe_key));
        leads
    }
}
