//! # Scoped Completion Signals
//!
//! A signal created for one submission and destroyed on every path once the
//! wait returns.

use ember_core::sync::{SignalApi, SignalHandle, SignalVisibility, WaitCondition, WaitHint, WaitTimeout};
use ember_core::{Error, Result};

/// Completion signal destroyed when dropped
pub struct ScopedSignal<'s> {
    api: &'s dyn SignalApi,
    handle: SignalHandle,
    released: bool,
}

impl<'s> ScopedSignal<'s> {
    /// Create a signal holding `initial`
    pub fn new(api: &'s dyn SignalApi, initial: i64, visibility: SignalVisibility) -> Result<Self> {
        let handle = api.create(initial, visibility)?;
        Ok(Self {
            api,
            handle,
            released: false,
        })
    }

    /// Handle to attach to a slot
    #[inline]
    pub fn handle(&self) -> SignalHandle {
        self.handle
    }

    /// Wait and return the observed value
    pub fn wait(
        &self,
        cond: WaitCondition,
        value: i64,
        timeout: WaitTimeout,
        hint: WaitHint,
    ) -> Result<i64> {
        self.api.wait(self.handle, cond, value, timeout, hint)
    }

    /// Wait until the signal reads `expected`
    ///
    /// Fails with [`Error::UnexpectedSignalValue`] if the wait returns any
    /// other value (including on timeout).
    pub fn wait_for(&self, expected: i64, timeout: WaitTimeout, hint: WaitHint) -> Result<()> {
        let observed = self.wait(WaitCondition::Eq, expected, timeout, hint)?;
        if observed != expected {
            log::warn!(
                "signal {:?}: expected {}, observed {}",
                self.handle,
                expected,
                observed
            );
            return Err(Error::UnexpectedSignalValue);
        }
        Ok(())
    }

    /// Destroy the signal, reporting failure
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.api.destroy(self.handle)
    }
}

impl Drop for ScopedSignal<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.api.destroy(self.handle) {
            log::warn!("signal {:?}: destroy failed: {}", self.handle, e);
        }
    }
}

impl core::fmt::Debug for ScopedSignal<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScopedSignal")
            .field("handle", &self.handle)
            .field("released", &self.released)
            .finish()
    }
}
