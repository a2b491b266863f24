//! Result type aliases for crawlq.

use crate::CrawlqError;

/// A specialized `Result` type for crawlq operations.
pub type CrawlqResult<T> = Result<T, CrawlqError>;
