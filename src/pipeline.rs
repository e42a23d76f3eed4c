//! Run orchestration: discovery → triage → concurrent fetch → concurrent
//! extraction folding into the canonical set → scoring → concurrent advice
//! with incremental writes.
//!
//! Per-item failures (one URL, one candidate, one advice call) are absorbed
//! and audited; pool- and writer-level failures abort the run after in-flight
//! work drains.

use anyhow::{anyhow, Context, Result};
use chrono::{Local, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::audit::RunAudit;
use crate::dedupe::LeadStore;
use crate::extract::extract_candidates;
use crate::fetch::{dedupe_by_domain, filter_urls, FetchScheduler, ReadabilityExtractor};
use crate::models::{FetchStatus, Lead, RunConfig, RunStats};
use crate::scoring::apply_score;
use crate::search::{SearchError, SearchProvider};
use crate::writer::{LeadCsvWriter, LeadJsonWriter};
use crate::{advice, exporter, LLMParams, TARGET_PIPELINE};

const RESULTS_PER_QUERY: usize = 10;

pub struct Pipeline {
    config: RunConfig,
    llm_params: LLMParams,
    provider: SearchProvider,
    cancel: watch::Receiver<bool>,
    pub run_id: String,
    pub audit: Arc<RunAudit>,
}

impl Pipeline {
    pub fn new(
        config: RunConfig,
        llm_params: LLMParams,
        provider: SearchProvider,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let run_id = format!(
            "{}_{}",
            Local::now().format("%Y%m%d_%H%M%S"),
            std::process::id()
        );
        let audit = Arc::new(RunAudit::new(&run_id, &config.prompt));
        Pipeline {
            config,
            llm_params,
            provider,
            cancel,
            run_id,
            audit,
        }
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Execute the full run. Artifacts (CSV, JSON, audit, report) land in
    /// `<output_dir>/<run_id>/` when an output directory is given.
    pub async fn run(&self, output_dir: Option<&Path>) -> Result<(Vec<Lead>, RunStats)> {
        let mut stats = RunStats {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        info!(target: TARGET_PIPELINE, "Starting run {}", self.run_id);

        // Discovery: seed URLs plus search results for each prepared query.
        let urls = self.discover_urls(&mut stats).await?;

        // Triage: blocklist, exact dedupe, per-domain diversity cap, page cap.
        let mut urls = filter_urls(urls, &self.config.blocked_domains, &self.audit);
        urls = dedupe_exact(urls);
        urls = dedupe_by_domain(urls, self.config.max_per_domain, &self.audit);
        if urls.len() > self.config.max_pages {
            for url in urls.drain(self.config.max_pages..) {
                self.audit.record_url_filtered(&url, "run page cap reached");
            }
        }
        info!(target: TARGET_PIPELINE, "{} URLs scheduled for fetching", urls.len());

        // Fetch and extraction overlap: fetched pages stream into the
        // extraction pool as they arrive, in no particular order.
        let scheduler = Arc::new(FetchScheduler::new(
            self.config.fetch.clone(),
            Box::new(ReadabilityExtractor::new(self.config.fetch.max_text_len)),
        )?);
        let (tx, mut rx) = mpsc::channel(self.config.fetch.concurrency * 2);
        let fetch_task = tokio::spawn(Arc::clone(&scheduler).fetch_all(
            urls,
            Arc::clone(&self.audit),
            tx,
            self.cancel.clone(),
        ));

        let store = Arc::new(LeadStore::new(
            Arc::clone(&self.audit),
            self.config.max_evidence_per_lead,
        ));
        let extraction_pool = Arc::new(Semaphore::new(self.config.extraction_workers));
        let pages_extracted = Arc::new(AtomicUsize::new(0));
        let candidates_extracted = Arc::new(AtomicUsize::new(0));
        let mut extraction_tasks = JoinSet::new();

        while let Some(page) = rx.recv().await {
            stats.urls_fetched += 1;
            match page.status {
                FetchStatus::Ok | FetchStatus::Cached => stats.fetch_ok += 1,
                _ => stats.fetch_failed += 1,
            }

            if !page.is_usable() || self.cancelled() {
                continue;
            }

            let store = Arc::clone(&store);
            let audit = Arc::clone(&self.audit);
            let pool = Arc::clone(&extraction_pool);
            let pages_extracted = Arc::clone(&pages_extracted);
            let candidates_extracted = Arc::clone(&candidates_extracted);
            let llm_params = self.llm_params.clone();
            let prompt = self.config.prompt.clone();

            extraction_tasks.spawn(async move {
                let _permit = pool.acquire().await.expect("extraction semaphore closed");
                let mut page = page;
                let candidates =
                    extract_candidates(&mut page, &prompt, &llm_params, &audit).await;
                pages_extracted.fetch_add(1, Ordering::Relaxed);
                candidates_extracted.fetch_add(candidates.len(), Ordering::Relaxed);
                if !candidates.is_empty() {
                    info!(target: TARGET_PIPELINE, "Found {} candidate(s) on {}", candidates.len(), page.url);
                }
                for candidate in candidates {
                    store.fold(candidate);
                }
            });
        }

        fetch_task.await.context("fetch pool panicked")?;
        while extraction_tasks.join_next().await.is_some() {}

        stats.pages_extracted = pages_extracted.load(Ordering::Relaxed);
        stats.candidates_extracted = candidates_extracted.load(Ordering::Relaxed);

        // Extraction has drained: no further candidate updates are expected
        // for any key, so the canonical set is stable and can be scored.
        let store = Arc::try_unwrap(store)
            .unwrap_or_else(|_| panic!("lead store still shared after extraction drain"));
        let mut leads = store.finalize();
        stats.leads_after_dedupe = leads.len();
        info!(target: TARGET_PIPELINE, "{} raw candidates folded into {} leads", stats.candidates_extracted, leads.len());

        for lead in &mut leads {
            apply_score(lead, self.config.review_threshold);
        }
        leads.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.dedupe_key.cmp(&b.dedupe_key))
        });
        leads.truncate(self.config.max_results);

        // Advice fan-out with incremental writes.
        let run_dir = match output_dir {
            Some(base) => {
                let dir = base.join(&self.run_id);
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("creating run directory {:?}", dir))?;
                Some(dir)
            }
            None => None,
        };
        let leads = self.advise_and_write(leads, run_dir.as_deref()).await?;
        stats.leads_exported = leads.len();

        stats.finished_at = Some(Utc::now());

        if let Some(dir) = &run_dir {
            self.audit
                .save(&dir.join("audit.json"))
                .context("saving audit trail")?;
            exporter::save_report(
                &self.run_id,
                &self.config.prompt,
                &stats,
                &leads,
                &dir.join("report.md"),
            )?;
            info!(target: TARGET_PIPELINE, "Artifacts written to {:?}", dir);
        }

        info!(target: TARGET_PIPELINE, "Run {} finished: {} leads exported", self.run_id, stats.leads_exported);
        Ok((leads, stats))
    }

    async fn discover_urls(&self, stats: &mut RunStats) -> Result<Vec<String>> {
        let mut urls: Vec<String> = self.config.seed_urls.clone();
        stats.urls_discovered += urls.len();

        let queries = if self.config.queries.is_empty() {
            vec![self.config.prompt.clone()]
        } else {
            self.config.queries.clone()
        };

        for query in &queries {
            if self.cancelled() {
                info!(target: TARGET_PIPELINE, "Cancellation requested, skipping remaining queries");
                break;
            }
            match self.provider.search(query, RESULTS_PER_QUERY).await {
                Ok(hits) => {
                    stats.queries_issued += 1;
                    stats.urls_discovered += hits.len();
                    self.audit
                        .record_query(query, self.provider.name(), hits.len());
                    for hit in hits {
                        self.audit.record_url_discovered(&hit.url, query);
                        urls.push(hit.url);
                    }
                }
                Err(SearchError::Unauthorized) => {
                    // Credentials will not heal within a run.
                    error!(target: TARGET_PIPELINE, "Search provider rejected credentials, aborting run");
                    return Err(anyhow!(SearchError::Unauthorized));
                }
                Err(e) => {
                    stats.queries_issued += 1;
                    warn!(target: TARGET_PIPELINE, "Search failed for query '{}': {}", query, e);
                    self.audit.record_query(query, self.provider.name(), 0);
                }
            }
        }

        Ok(urls)
    }

    /// Generate advice per lead in a bounded pool and hand each finished lead
    /// to the incremental writers. A failed advice call is audited and the
    /// lead ships without advice; a failed write aborts the run once
    /// in-flight work has drained.
    async fn advise_and_write(
        &self,
        leads: Vec<Lead>,
        run_dir: Option<&Path>,
    ) -> Result<Vec<Lead>> {
        let csv_writer = match run_dir {
            Some(dir) => Some(Arc::new(LeadCsvWriter::create(&dir.join("leads.csv"))?)),
            None => None,
        };
        let json_writer = run_dir.map(|_| Arc::new(LeadJsonWriter::new()));

        let advice_pool = Arc::new(Semaphore::new(self.config.advice_workers));
        let mut tasks = JoinSet::new();

        for lead in leads {
            let pool = Arc::clone(&advice_pool);
            let llm_params = self.llm_params.clone();
            let audit = Arc::clone(&self.audit);
            let csv_writer = csv_writer.clone();
            let json_writer = json_writer.clone();
            let cancel = self.cancel.clone();
            let product_context = self.config.product_context.clone();
            let seller_context = self.config.seller_context.clone();

            tasks.spawn(async move {
                let _permit = pool.acquire().await.expect("advice semaphore closed");

                let mut lead = lead;
                // Cancellation stops issuing new advice calls; the lead is
                // still written so artifacts stay complete.
                if !*cancel.borrow() {
                    match advice::generate_advice(
                        &lead,
                        &product_context,
                        &seller_context,
                        &llm_params,
                    )
                    .await
                    {
                        Ok(generated) => lead.advice = Some(generated),
                        Err(e) => {
                            warn!(target: TARGET_PIPELINE, "Advice failed for {}: {}", lead.dedupe_key, e);
                            audit.record_advice_failed(&lead.dedupe_key, &e.to_string());
                        }
                    }
                }

                if let Some(writer) = &csv_writer {
                    writer.write_lead(&lead)?;
                }
                if let Some(writer) = &json_writer {
                    writer.write_lead(&lead)?;
                }
                Ok::<Lead, anyhow::Error>(lead)
            });
        }

        // Drain every worker before escalating any writer failure.
        let mut advised = Vec::new();
        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(lead)) => advised.push(lead),
                Ok(Err(e)) => {
                    error!(target: TARGET_PIPELINE, "Writer failure: {}", e);
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    error!(target: TARGET_PIPELINE, "Advice worker panicked: {}", e);
                    fatal.get_or_insert(anyhow!("advice worker panicked: {}", e));
                }
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        if let (Some(writer), Some(dir)) = (&json_writer, run_dir) {
            writer.close(&dir.join("leads.json"))?;
        }

        // Restore the deterministic export order after concurrent completion.
        advised.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.dedupe_key.cmp(&b.dedupe_key))
        });
        Ok(advised)
    }
}

fn dedupe_exact(urls: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{gate_extraction, parse_raw_extraction};

    #[test]
    fn test_dedupe_exact_preserves_order() {
        let urls = vec![
            "https://a.com".to_string(),
            "https://b.com".to_string(),
            "https://a.com".to_string(),
        ];
        assert_eq!(
            dedupe_exact(urls),
            vec!["https://a.com".to_string(), "https://b.com".to_string()]
        );
    }

    /// Drive extraction output through gate, dedupe, scoring, and the CSV
    /// writer, checking the exported-lead invariants end to end.
    #[test]
    fn test_gate_to_export_flow() {
        let audit = Arc::new(RunAudit::new("flow", "window makers in norway"));
        let store = LeadStore::new(Arc::clone(&audit), 20);

        // Page 1: the company's own contact page.
        let company_page = r#"{
            "page_type": "company_site",
            "relevant": true,
            "evidence_snippet": "Contact Acme Windows: post@acme.example",
            "leads": [{
                "org_name": "Acme Windows AS",
                "org_type": "manufacturer",
                "industries": ["windows"],
                "country": "Norway",
                "website": "https://acme.example",
                "contacts": [{
                    "name": "Jane Doe",
                    "title": "CEO",
                    "role_category": "ceo",
                    "channels": [{"type": "email", "value": "post@acme.example"}]
                }]
            }]
        }"#;
        let fetched_url_1 = "https://acme.example/contact";
        for candidate in gate_extraction(
            parse_raw_extraction(company_page).unwrap(),
            fetched_url_1,
            &audit,
        ) {
            store.fold(candidate);
        }

        // Page 2: a directory mentioning the same company.
        let directory_page = r#"{
            "page_type": "directory",
            "relevant": true,
            "evidence_snippet": "Acme Windows AS - windows - acme.example",
            "leads": [{
                "org_name": "ACME WINDOWS",
                "website": "acme.example",
                "contacts": []
            }]
        }"#;
        let fetched_url_2 = "https://norway-suppliers.example/windows";
        for candidate in gate_extraction(
            parse_raw_extraction(directory_page).unwrap(),
            fetched_url_2,
            &audit,
        ) {
            store.fold(candidate);
        }

        assert_eq!(store.len(), 1);
        let mut leads = store.finalize();
        for lead in &mut leads {
            apply_score(lead, 0.4);
        }
        let lead = &leads[0];

        // Every exported channel cites a URL actually fetched in the run.
        let fetched = [fetched_url_1, fetched_url_2];
        for contact in &lead.contacts {
            for channel in &contact.channels {
                assert!(!channel.evidence.is_empty());
                for evidence in &channel.evidence {
                    assert!(fetched.contains(&evidence.source_url.as_str()));
                }
            }
        }
        // Organization evidence is non-empty and spans both pages.
        assert!(!lead.organization.evidence.is_empty());
        assert!(lead.evidence_urls().contains(&fetched_url_1.to_string()));
        assert!(lead.evidence_urls().contains(&fetched_url_2.to_string()));

        // Score is reconstructible from its contributions.
        let sum: f32 = lead.score_contributions.values().sum();
        assert!((crate::scoring::clamp_unit(sum) - lead.confidence).abs() < 1e-6);
        // email + role + evidence + website, aligned.
        assert!((lead.confidence - 0.75).abs() < 1e-6);
        assert!(!lead.needs_review);

        // The row writer accepts the lead and keeps the column contract.
        let path = std::env::temp_dir().join("prospect_flow_test.csv");
        let writer = LeadCsvWriter::create(&path).unwrap();
        writer.write_lead(lead).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("post@acme.example"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_misaligned_directory_lead_flagged_for_review() {
        let audit = Arc::new(RunAudit::new("flow2", "prompt"));
        let store = LeadStore::new(Arc::clone(&audit), 20);

        let directory_only = r#"{
            "page_type": "directory",
            "relevant": true,
            "evidence_snippet": "Bravo Doors - bravo.example",
            "leads": [{
                "org_name": "Bravo Doors",
                "website": "https://bravo.example",
                "contacts": [{
                    "channels": [{"type": "email", "value": "sales@bravo.example"}]
                }]
            }]
        }"#;
        for candidate in gate_extraction(
            parse_raw_extraction(directory_only).unwrap(),
            "https://norway-suppliers.example/doors",
            &audit,
        ) {
            store.fold(candidate);
        }

        let mut leads = store.finalize();
        apply_score(&mut leads[0], 0.4);
        // email 0.25 + evidence 0.20 + website 0.10 - misaligned 0.30
        assert!((leads[0].confidence - 0.25).abs() < 1e-6);
        assert!(leads[0].needs_review);
        assert!(!leads[0].domain_aligned);
    }
}
