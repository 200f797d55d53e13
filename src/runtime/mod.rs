//! Small wrappers around the async runtime used throughout the driver.

mod stream;
#[cfg(feature = "rustls-tls")]
mod tls_rustls;

use std::{future::Future, time::Duration};

pub(crate) use stream::AsyncStream;
#[cfg(feature = "rustls-tls")]
pub(crate) use tls_rustls::TlsConfig;

use crate::error::{Error, Result};

/// Spawn a task in the background to run a future.
///
/// Panics if called outside of a tokio runtime.
pub(crate) fn spawn<F, O>(fut: F) -> tokio::task::JoinHandle<O>
where
    F: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    tokio::task::spawn(fut)
}

/// Await on a future for a maximum amount of time before returning a timeout
/// error.
pub(crate) async fn timeout<F: Future>(duration: Duration, future: F) -> Result<F::Output> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Error::network_timeout())
}

/// Wait for a certain amount of time before returning.
pub(crate) async fn delay_for(delay: Duration) {
    tokio::time::sleep(delay).await
}

#[cfg(not(feature = "rustls-tls"))]
pub(crate) use stream::NoTlsConfig as TlsConfig;
