pub mod api_probe;
pub mod browser;
pub mod chain;
pub mod direct;
pub mod headers;
pub mod protection;
pub mod rendering;
pub mod traits;
pub mod types;

pub use api_probe::ApiProbeStrategy;
pub use browser::BrowserStrategy;
pub use chain::{ChainTiming, StrategyChain};
pub use direct::DirectStrategy;
pub use headers::HeaderProfile;
pub use protection::{ProtectionConfig, ProtectionDetector, Verdict};
pub use rendering::RenderingServiceStrategy;
pub use traits::FetchStrategy;
pub use types::{
    AttemptOutcome, BlockEvidence, ChainReport, Content, ContentType, FetchAttempt, RawResponse,
    StrategyResult,
};
