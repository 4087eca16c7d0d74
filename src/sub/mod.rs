// Sub-handlers
// Prefix-scoped handlers that consume a Query. Tried in registration
// order against the current request path; the first match wins and sees
// the path with its prefix stripped.

mod static_files;

pub use static_files::StaticSub;

use std::sync::Arc;

use async_trait::async_trait;

use crate::query::Query;

/// A handler mounted under a URL prefix.
///
/// `serve` consumes exactly one query per call and must drive it to a
/// terminal state: resume (optionally followed by a write), hijack, or
/// `resume_and_write`.
#[async_trait]
pub trait Sub: Send + Sync {
    async fn serve(&self, query: Query);
}

/// Registry record: a sub-handler bound to a URL prefix.
#[derive(Clone)]
pub(crate) struct SubEntry {
    pub prefix: String,
    pub sub: Arc<dyn Sub>,
}
