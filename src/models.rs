use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Longest snippet we keep alongside a piece of evidence.
pub const MAX_SNIPPET_LEN: usize = 500;

/// A source citation for a single extracted fact.
///
/// Evidence is immutable and owned by the field it supports: it is created
/// next to that field and never shared between fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl Evidence {
    pub fn new(source_url: &str, snippet: Option<&str>) -> Self {
        Evidence {
            source_url: source_url.to_string(),
            snippet: snippet
                .map(|s| truncate_chars(s.trim(), MAX_SNIPPET_LEN))
                .filter(|s| !s.is_empty()),
            observed_at: Utc::now(),
        }
    }
}

/// Contact channel type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Email,
    Phone,
    Linkedin,
    ContactPage,
    Other,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelType::Email => write!(f, "email"),
            ChannelType::Phone => write!(f, "phone"),
            ChannelType::Linkedin => write!(f, "linkedin"),
            ChannelType::ContactPage => write!(f, "contact_page"),
            ChannelType::Other => write!(f, "other"),
        }
    }
}

impl From<&str> for ChannelType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "email" => ChannelType::Email,
            "phone" => ChannelType::Phone,
            "linkedin" => ChannelType::Linkedin,
            "contact_page" => ChannelType::ContactPage,
            _ => ChannelType::Other,
        }
    }
}

/// A way to reach a contact. Carries at least one piece of evidence; the
/// extraction gate refuses to construct a channel without any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactChannel {
    pub channel_type: ChannelType,
    pub value: String,
    pub evidence: Vec<Evidence>,
}

/// Role bucket for a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleCategory {
    Owner,
    Exec,
    Founder,
    Ceo,
    Director,
    Procurement,
    Operations,
    Project,
    Sales,
    Manager,
    Engineer,
    Unknown,
}

impl fmt::Display for RoleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleCategory::Owner => "owner",
            RoleCategory::Exec => "exec",
            RoleCategory::Founder => "founder",
            RoleCategory::Ceo => "ceo",
            RoleCategory::Director => "director",
            RoleCategory::Procurement => "procurement",
            RoleCategory::Operations => "operations",
            RoleCategory::Project => "project",
            RoleCategory::Sales => "sales",
            RoleCategory::Manager => "manager",
            RoleCategory::Engineer => "engineer",
            RoleCategory::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for RoleCategory {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "owner" => RoleCategory::Owner,
            "exec" | "executive" => RoleCategory::Exec,
            "founder" => RoleCategory::Founder,
            "ceo" => RoleCategory::Ceo,
            "director" => RoleCategory::Director,
            "procurement" => RoleCategory::Procurement,
            "operations" => RoleCategory::Operations,
            "project" => RoleCategory::Project,
            "sales" => RoleCategory::Sales,
            "manager" => RoleCategory::Manager,
            "engineer" => RoleCategory::Engineer,
            _ => RoleCategory::Unknown,
        }
    }
}

/// A person at an organization. A named contact with zero channels is still
/// informative, but carries no exportable contact method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub role_category: RoleCategory,
    pub channels: Vec<ContactChannel>,
}

/// Organization type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgType {
    Contractor,
    Developer,
    Supplier,
    Distributor,
    Manufacturer,
    Agency,
    Consultant,
    Architect,
    Retailer,
    Wholesaler,
    Other,
}

impl fmt::Display for OrgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrgType::Contractor => "contractor",
            OrgType::Developer => "developer",
            OrgType::Supplier => "supplier",
            OrgType::Distributor => "distributor",
            OrgType::Manufacturer => "manufacturer",
            OrgType::Agency => "agency",
            OrgType::Consultant => "consultant",
            OrgType::Architect => "architect",
            OrgType::Retailer => "retailer",
            OrgType::Wholesaler => "wholesaler",
            OrgType::Other => "other",
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for OrgType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "contractor" => OrgType::Contractor,
            "developer" => OrgType::Developer,
            "supplier" => OrgType::Supplier,
            "distributor" => OrgType::Distributor,
            "manufacturer" => OrgType::Manufacturer,
            "agency" => OrgType::Agency,
            "consultant" => OrgType::Consultant,
            "architect" => OrgType::Architect,
            "retailer" => OrgType::Retailer,
            "wholesaler" => OrgType::Wholesaler,
            _ => OrgType::Other,
        }
    }
}

/// A business organization. Invariant: `evidence` is non-empty for every
/// organization that survives the extraction gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    pub org_type: OrgType,
    pub industries: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub evidence: Vec<Evidence>,
}

/// Outreach guidance generated for a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachAdvice {
    pub recommended_angle: String,
    pub recommended_first_offer: String,
    pub qualifying_question: String,
}

/// The canonical, deduplicated unit: one organization with its contacts,
/// accumulated evidence, and quality signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub organization: Organization,
    pub contacts: Vec<Contact>,
    pub confidence: f32,
    pub score_contributions: BTreeMap<String, f32>,
    pub evidence: Vec<Evidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<ApproachAdvice>,
    pub extracted_from_url: String,
    pub domain_aligned: bool,
    pub needs_review: bool,
    pub dedupe_key: String,
}

impl Lead {
    pub fn primary_contact(&self) -> Option<&Contact> {
        self.contacts.first()
    }

    /// First channel value of the given type across all contacts.
    pub fn primary_channel(&self, channel_type: ChannelType) -> Option<&str> {
        self.contacts
            .iter()
            .flat_map(|c| c.channels.iter())
            .find(|ch| ch.channel_type == channel_type)
            .map(|ch| ch.value.as_str())
    }

    pub fn has_channel(&self, channel_type: ChannelType) -> bool {
        self.primary_channel(channel_type).is_some()
    }

    /// All evidence URLs cited anywhere on this lead, in lead-evidence order.
    pub fn evidence_urls(&self) -> Vec<String> {
        self.evidence.iter().map(|e| e.source_url.clone()).collect()
    }
}

/// Page classification produced by the extraction capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Directory,
    CompanySite,
    Article,
    Other,
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageType::Directory => write!(f, "directory"),
            PageType::CompanySite => write!(f, "company_site"),
            PageType::Article => write!(f, "article"),
            PageType::Other => write!(f, "other"),
        }
    }
}

impl From<&str> for PageType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "directory" => PageType::Directory,
            "company_site" => PageType::CompanySite,
            "article" => PageType::Article,
            _ => PageType::Other,
        }
    }
}

/// The un-merged output of extracting one organization from one page.
/// Exists only between the extraction gate and the dedupe engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub organization: Organization,
    pub contacts: Vec<Contact>,
    pub extracted_from_url: String,
    pub page_type: PageType,
    pub domain_aligned: bool,
}

/// Outcome of a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    Cached,
    TransientError,
    PermanentError,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStatus::Ok => write!(f, "ok"),
            FetchStatus::Cached => write!(f, "cached"),
            FetchStatus::TransientError => write!(f, "transient_error"),
            FetchStatus::PermanentError => write!(f, "permanent_error"),
        }
    }
}

/// Result of fetching one URL, produced by the scheduler and consumed by the
/// extraction stage.
#[derive(Debug, Clone)]
pub struct PageFetchResult {
    pub url: String,
    pub domain: String,
    pub status: FetchStatus,
    pub status_code: Option<u16>,
    pub text: Option<String>,
    pub content_hash: Option<String>,
    pub page_type: Option<PageType>,
    pub error: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl PageFetchResult {
    pub fn is_usable(&self) -> bool {
        matches!(self.status, FetchStatus::Ok | FetchStatus::Cached)
            && self.text.as_deref().map(|t| !t.is_empty()).unwrap_or(false)
    }
}

/// Fetch scheduler knobs.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Minimum spacing between two request starts against the same domain.
    pub min_domain_interval: Duration,
    /// Extra hold applied to a domain after it answers 429.
    pub rate_limit_cooldown: Duration,
    pub concurrency: usize,
    pub timeout: Duration,
    pub max_attempts: usize,
    /// Hard cap on normalized page text handed downstream.
    pub max_text_len: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            min_domain_interval: Duration::from_millis(1500),
            rate_limit_cooldown: Duration::from_secs(10),
            concurrency: 6,
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            max_text_len: 8_000,
        }
    }
}

/// Which search provider feeds the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchProviderKind {
    Serper,
    Static,
}

/// Everything a single run needs to know.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// The user's research intent, verbatim.
    pub prompt: String,
    /// Pre-expanded search queries. Query expansion happens upstream; an
    /// empty list falls back to the raw prompt as the single query.
    pub queries: Vec<String>,
    /// Known-good URLs injected ahead of search discovery.
    pub seed_urls: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub search_provider: SearchProviderKind,
    pub max_pages: usize,
    pub max_results: usize,
    pub max_per_domain: usize,
    pub max_evidence_per_lead: usize,
    pub product_context: String,
    pub seller_context: String,
    pub fetch: FetchConfig,
    pub extraction_workers: usize,
    pub advice_workers: usize,
    pub review_threshold: f32,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            prompt: String::new(),
            queries: Vec::new(),
            seed_urls: Vec::new(),
            blocked_domains: Vec::new(),
            search_provider: SearchProviderKind::Serper,
            max_pages: 100,
            max_results: 50,
            max_per_domain: 3,
            max_evidence_per_lead: 20,
            product_context: String::new(),
            seller_context: String::new(),
            fetch: FetchConfig::default(),
            extraction_workers: 5,
            advice_workers: 5,
            review_threshold: 0.4,
        }
    }
}

/// Counters summarizing a finished run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub queries_issued: usize,
    pub urls_discovered: usize,
    pub urls_fetched: usize,
    pub fetch_ok: usize,
    pub fetch_failed: usize,
    pub pages_extracted: usize,
    pub candidates_extracted: usize,
    pub leads_after_dedupe: usize,
    pub leads_exported: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Truncate to a maximum number of chars without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
