//! Fetcher trait definition
//!
//! A fetcher is the zero-argument read operation behind one cache key.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Read operation for one cache key, owned by the caller and invoked by the runner
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Fetch the current representation of the resource
    async fn fetch(&self) -> anyhow::Result<Value>;
}

/// Adapter turning an async closure returning a typed value into a [`Fetcher`]
pub struct FnFetcher<F, T> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> FnFetcher<F, T> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, T> Fetcher for FnFetcher<F, T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    async fn fetch(&self) -> anyhow::Result<Value> {
        let value = (self.f)().await?;
        Ok(serde_json::to_value(value)?)
    }
}

/// Build a shared fetcher from an async closure
pub fn fetcher<F, Fut, T>(f: F) -> Arc<dyn Fetcher>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    Arc::new(FnFetcher::new(f))
}
