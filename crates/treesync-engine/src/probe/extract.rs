//! Pluggable metadata extractors run against probed directories.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extractors keyed by the `meta` field they populate.
pub type Extractors = BTreeMap<String, Arc<dyn MetaExtractor>>;

/// Computes one metadata value for a directory entry.
#[async_trait]
pub trait MetaExtractor: Send + Sync {
    /// Extract the value for `path`. An error omits this key from the entry.
    async fn extract(&self, path: &Path) -> anyhow::Result<serde_json::Value>;
}

/// Adapter turning an async closure into a [`MetaExtractor`].
pub struct FnExtractor<F> {
    f: F,
}

/// Wrap an async closure as an extractor.
pub fn extractor_fn<F, Fut>(f: F) -> Arc<dyn MetaExtractor>
where
    F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    Arc::new(FnExtractor { f })
}

#[async_trait]
impl<F, Fut> MetaExtractor for FnExtractor<F>
where
    F: Fn(PathBuf) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    async fn extract(&self, path: &Path) -> anyhow::Result<serde_json::Value> {
        (self.f)(path.to_path_buf()).await
    }
}
