//! Fetch capability consumed by the worker pool

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::FetchError;
use crate::types::ItemDescriptor;

/// Performs the download (and any merge/transcode) for one item
///
/// Implementations own everything about the fetched content; the pool only looks at
/// success or failure. A call is one attempt: the pool decides whether to call again.
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use playlist_dl::{FetchError, Fetcher, ItemDescriptor};
/// use std::path::{Path, PathBuf};
///
/// struct TouchFetcher;
///
/// #[async_trait]
/// impl Fetcher for TouchFetcher {
///     async fn fetch(
///         &self,
///         _item: &ItemDescriptor,
///         destination: &Path,
///     ) -> Result<PathBuf, FetchError> {
///         tokio::fs::write(destination, b"").await?;
///         Ok(destination.to_path_buf())
///     }
/// }
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch one item
    ///
    /// `destination` is the path (or path template) produced by the
    /// [`OutputLayout`](crate::layout::OutputLayout). Returns where the result ended up.
    async fn fetch(&self, item: &ItemDescriptor, destination: &Path)
    -> Result<PathBuf, FetchError>;

    /// Implementation name for logging
    fn name(&self) -> &'static str {
        "fetcher"
    }
}
