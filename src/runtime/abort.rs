//! Lineage abort signal
//!
//! Each lineage owns one signal and, when `limits.timeout` is set, one timer
//! that fires it once. The timer is armed on the first invoke, not when the
//! Context is built, so a lineage without a timeout never starts one.
//!
//! Aborting stops the caller's wait. Futures owned by the aborted invoke are
//! dropped; work an agent spawned elsewhere keeps running unless it watches
//! [`AbortSignal::cancelled`].

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{RuntimeError, RuntimeResult};

/// One-shot abort signal shared by a lineage
#[derive(Debug)]
pub struct AbortSignal {
    token: CancellationToken,
    timeout: Option<Duration>,
    timer: OnceLock<Option<JoinHandle<()>>>,
}

impl AbortSignal {
    /// Create a signal that fires `timeout` after it is armed
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
            timer: OnceLock::new(),
        }
    }

    /// Start the timeout timer if there is one and it is not running yet
    pub fn arm(&self) {
        let Some(timeout) = self.timeout else {
            return;
        };

        self.timer.get_or_init(|| {
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                tracing::warn!("[AbortSignal] No tokio runtime, timeout of {:?} not armed", timeout);
                return None;
            };

            tracing::debug!("[AbortSignal] Armed with timeout {:?}", timeout);
            let token = self.token.clone();
            Some(handle.spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!("[AbortSignal] Timeout of {:?} reached, aborting lineage", timeout);
                token.cancel();
            }))
        });
    }

    /// Whether the timer has been started
    pub fn is_armed(&self) -> bool {
        matches!(self.timer.get(), Some(Some(_)))
    }

    /// Whether the signal has fired
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal fires
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// A token that is cancelled together with this signal
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Wait for `fut` unless the signal fires first.
    ///
    /// A signal that already fired wins even when `fut` is ready.
    pub async fn race<F: Future>(&self, fut: F) -> RuntimeResult<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(RuntimeError::Timeout),
            output = fut => Ok(output),
        }
    }
}

impl Drop for AbortSignal {
    fn drop(&mut self) {
        if let Some(Some(timer)) = self.timer.get() {
            timer.abort();
        }
    }
}
