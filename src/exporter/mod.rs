use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

mod http_listener;
pub use self::http_listener::new_http_listener;

/// Errors that could terminate a running exporter future.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// The listener socket could not be initialized.
    #[error("failed to initialize listener socket: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type for a future implementing an exporter.
pub type ExporterFuture = Pin<Box<dyn Future<Output = Result<(), ExporterError>> + Send + 'static>>;
