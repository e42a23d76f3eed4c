//! Page fetching: polite, concurrent, cached retrieval of candidate URLs.

mod client;
mod scheduler;
mod text;
mod triage;

pub use self::client::create_http_client;
pub use self::scheduler::FetchScheduler;
pub use self::text::{ReadabilityExtractor, TextExtractor};
pub use self::triage::{dedupe_by_domain, filter_urls, normalize_domain};
