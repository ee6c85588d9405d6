//! Source Module
//!
//! The authority the cache reads through to. The cache only consumes the
//! [`Source`] contract; how a value is produced (remote call, database
//! lookup, adapter over a third-party client) is up to the implementor.

mod product;

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

pub use product::ProductSource;

// == Source Trait ==
/// Produces the authoritative value for a key.
///
/// Calls may be slow and may fail. Report an authoritative absence as
/// [`CacheError::NotFound`](crate::error::CacheError::NotFound) and anything
/// else as [`CacheError::SourceFailure`](crate::error::CacheError::SourceFailure).
/// Retries, if any, belong in the implementation; the cache never retries.
#[async_trait]
pub trait Source: Send + Sync + 'static {
    /// Key type the source is addressed by.
    type Key: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;
    /// Value type the source produces.
    type Value: Clone + Send + Sync + 'static;

    /// Fetches the value for `key`.
    async fn fetch(&self, key: &Self::Key) -> Result<Self::Value>;

    /// Short name used in log lines.
    fn name(&self) -> &'static str {
        "source"
    }
}

#[async_trait]
impl<S: Source> Source for Arc<S> {
    type Key = S::Key;
    type Value = S::Value;

    async fn fetch(&self, key: &Self::Key) -> Result<Self::Value> {
        (**self).fetch(key).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

// == Function Source ==
/// Adapts an async closure into a [`Source`]. See [`source_fn`].
pub struct SourceFn<K, V, F> {
    f: F,
    _types: PhantomData<fn(K) -> V>,
}

impl<K, V, F> fmt::Debug for SourceFn<K, V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFn").finish_non_exhaustive()
    }
}

/// Builds a [`Source`] from a closure taking an owned key.
///
/// ```
/// use readthrough::source::source_fn;
///
/// let source = source_fn(|id: u32| async move { Ok(format!("Product-{id}")) });
/// # let _ = source;
/// ```
pub fn source_fn<K, V, F, Fut>(f: F) -> SourceFn<K, V, F>
where
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<V>>,
{
    SourceFn {
        f,
        _types: PhantomData,
    }
}

#[async_trait]
impl<K, V, F, Fut> Source for SourceFn<K, V, F>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    type Key = K;
    type Value = V;

    async fn fetch(&self, key: &K) -> Result<V> {
        (self.f)(key.clone()).await
    }

    fn name(&self) -> &'static str {
        "fn"
    }
}
