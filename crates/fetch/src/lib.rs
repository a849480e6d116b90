pub mod cache;
pub mod extract;
pub mod fetcher;
pub mod stealth;

pub use extract::{extract_html_content, host_of};
pub use fetcher::{ContentFetcher, FetchConfig, FetchError, FetchedPage};
