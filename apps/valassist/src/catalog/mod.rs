// Catalog retrieval: single records, saved queries, and best-effort batches.
// All network access goes through a CatalogTransport so retry and batching
// can be exercised without a live service.

pub mod errors;
pub mod export;
pub mod fetcher;
pub mod handlers;
pub mod models;
pub mod retry;
pub mod transport;

pub use errors::FetchError;
pub use fetcher::RecordFetcher;
pub use retry::RetryPolicy;
pub use transport::{CatalogAuth, CatalogTransport, HttpCatalogTransport};
