//! Cooperative cancellation for acquisitions.
//!
//! A [`CancelToken`] is polled by the scan loop before every Start round
//! and between image records. While a data channel is open the loop arms
//! the token with an abort hook that shuts the data socket down, so a
//! cancel also interrupts a read that is blocked waiting for the scanner.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Callback that unblocks a pending data-channel read
pub type AbortHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    abort: Mutex<Option<AbortHook>>,
}

/// Shared cancellation flag with an optional abort hook.
///
/// Clones observe the same state.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Creates a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation and fires the armed abort hook, if any
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let hook = self.inner.abort.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Installs an abort hook for the lifetime of the returned guard.
    ///
    /// If the token is already cancelled the hook runs immediately.
    pub(crate) fn arm(&self, hook: AbortHook) -> ArmedToken<'_> {
        let mut slot = self.inner.abort.lock();
        if self.is_cancelled() {
            drop(slot);
            hook();
        } else {
            *slot = Some(hook);
        }
        ArmedToken { token: self }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Disarms the abort hook when dropped
pub(crate) struct ArmedToken<'a> {
    token: &'a CancelToken,
}

impl Drop for ArmedToken<'_> {
    fn drop(&mut self) {
        self.token.inner.abort.lock().take();
    }
}
