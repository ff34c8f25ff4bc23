pub mod cache;
pub mod candidates;
pub mod client;
pub mod context;
pub mod fetcher;
pub mod ingest;
pub mod queue;
pub mod registry;
pub mod replay;
pub mod respond;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod thread;
pub mod watermark;

pub use cache::{CacheTtls, ItemCache};
pub use client::{ClientError, ClientResult, SocialClient};
pub use fetcher::ItemFetcher;
pub use ingest::{CycleStats, IngestConfig, IngestionLoop, LoopState};
pub use queue::{QueueConfig, QueueError, SerialRequestQueue};
pub use registry::{AccountLane, ClientRegistry};
pub use respond::{Poster, ResponseContext, ResponseIntent, Responder, SilentResponder};
pub use thread::ThreadBuilder;
pub use watermark::WatermarkStore;
