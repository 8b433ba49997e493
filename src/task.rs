//! Task helpers.

/// A handle to a background task, which is only used to stop it. The task is aborted when the
/// handle is dropped.
pub struct AbortHandle(tokio::task::AbortHandle);

impl Drop for AbortHandle {
    #[inline]
    fn drop(&mut self) {
        self.0.abort()
    }
}

impl From<tokio::task::AbortHandle> for AbortHandle {
    #[inline]
    fn from(value: tokio::task::AbortHandle) -> Self {
        Self(value)
    }
}
