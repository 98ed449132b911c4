//! Consumer-supplied persistence for the replication watermark.
//!
//! The engine never interprets how a watermark is stored. A loader tells a
//! session where to resume; a saver is handed every watermark the session has
//! reported to the server.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use walcap_core::Watermark;

pub type BoxError = Box<dyn Error + Send + Sync>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type LoadFn = dyn Fn() -> BoxFuture<'static, Result<Option<Watermark>, BoxError>> + Send + Sync;
type SaveFn = dyn Fn(Watermark) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync;

/// Loads the watermark to resume from. `None` means start at the server's
/// current position.
#[derive(Clone)]
pub struct WatermarkLoader(Arc<LoadFn>);

impl WatermarkLoader {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Watermark>, BoxError>> + Send + 'static,
    {
        Self(Arc::new(move || Box::pin(f())))
    }

    pub async fn load(&self) -> Result<Option<Watermark>, BoxError> {
        (self.0)().await
    }
}

impl fmt::Debug for WatermarkLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WatermarkLoader(..)")
    }
}

/// Persists a watermark the server has been told about.
#[derive(Clone)]
pub struct WatermarkSaver(Arc<SaveFn>);

impl WatermarkSaver {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Watermark) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self(Arc::new(move |wm| Box::pin(f(wm))))
    }

    pub async fn save(&self, watermark: Watermark) -> Result<(), BoxError> {
        (self.0)(watermark).await
    }
}

impl fmt::Debug for WatermarkSaver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WatermarkSaver(..)")
    }
}
