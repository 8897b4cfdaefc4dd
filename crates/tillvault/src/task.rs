//! Store operations as independently cancellable tasks.

use tokio::task::JoinHandle;

use crate::error::{ConfigStoreError, Result};

/// Handle to a store operation running on the runtime.
///
/// Aborting drops the operation at its next suspension point. A blocking
/// key-protection or file call that has already started runs to completion
/// on its worker thread; only its result is discarded.
pub struct OperationHandle<T> {
    inner: JoinHandle<Result<T>>,
}

impl<T> OperationHandle<T> {
    pub(crate) fn new(inner: JoinHandle<Result<T>>) -> Self {
        Self { inner }
    }

    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the operation. An aborted operation yields `Cancelled`.
    pub async fn join(self) -> Result<T> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                Err(ConfigStoreError::Cancelled("operation aborted before completion".into()))
            }
            Err(e) => Err(ConfigStoreError::Storage(format!("operation task failed: {e}"))),
        }
    }
}
