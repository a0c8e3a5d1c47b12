//! Usage monitoring: reconcile one usage percentage from push, OAuth,
//! cookie and local-log sources.

pub mod fetcher;
pub mod local;
pub mod parser;
pub mod resolver;
pub mod types;

pub use fetcher::{CookieAdapter, OauthAdapter, UsageAdapter};
pub use local::{count, local_snapshot, trim, LocalCount};
pub use parser::{normalize, parse_usage_document};
pub use resolver::Resolver;
pub use types::{FetchError, UsageMeter, UsageSnapshot, UsageSource, STALE_THRESHOLD};
