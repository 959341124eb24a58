//! # Completion Signals
//!
//! Cross-context observable counters reporting completion of asynchronous
//! work. The consumer decrements a signal when the packet carrying it
//! retires; the producer waits for the value to reach a target.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::error::{Error, Result};

// =============================================================================
// SIGNAL HANDLE
// =============================================================================

/// Opaque signal handle as stored in queue slots
///
/// Handle `0` means "no signal".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct SignalHandle(u64);

impl SignalHandle {
    /// The "no signal" handle
    pub const NONE: Self = Self(0);

    /// Wrap a raw handle value
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw handle value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Check for the "no signal" handle
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for SignalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignalHandle({})", self.0)
    }
}

// =============================================================================
// WAIT PARAMETERS
// =============================================================================

/// Who may observe the signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalVisibility {
    /// Only the creating process polls it
    Process,
    /// The device may raise interrupts on it
    Interrupt,
}

/// Wait condition, evaluated as `observed <cond> value`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    /// observed == value
    Eq,
    /// observed != value
    Ne,
    /// observed < value
    Lt,
    /// observed >= value
    Gte,
}

impl WaitCondition {
    /// Evaluate the condition
    #[inline]
    pub const fn is_satisfied(self, observed: i64, value: i64) -> bool {
        match self {
            Self::Eq => observed == value,
            Self::Ne => observed != value,
            Self::Lt => observed < value,
            Self::Gte => observed >= value,
        }
    }
}

/// Bound on a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Wait until satisfied
    Forever,
    /// Give up after this many polls
    Polls(u64),
}

/// How the waiter should spend time between polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitHint {
    /// Busy-spin (lowest latency)
    #[default]
    Active,
    /// Yield the CPU between polls where the host allows it
    Blocked,
}

impl WaitHint {
    /// Pause between two polls
    #[inline]
    pub fn pause(self) {
        match self {
            Self::Active => core::hint::spin_loop(),
            Self::Blocked => {
                #[cfg(feature = "std")]
                std::thread::yield_now();
                #[cfg(not(feature = "std"))]
                core::hint::spin_loop();
            }
        }
    }
}

/// Poll `cell` until `cond` holds or the timeout runs out
///
/// Returns the last observed value, satisfied or not.
pub fn poll_until(
    cell: &AtomicI64,
    cond: WaitCondition,
    value: i64,
    timeout: WaitTimeout,
    hint: WaitHint,
) -> i64 {
    let mut polls = 0u64;

    loop {
        let observed = cell.load(Ordering::Acquire);
        if cond.is_satisfied(observed, value) {
            return observed;
        }

        if let WaitTimeout::Polls(limit) = timeout {
            if polls >= limit {
                return observed;
            }
        }

        hint.pause();
        polls += 1;
    }
}

// =============================================================================
// SIGNAL API
// =============================================================================

/// Signal provider consumed by the submission path
pub trait SignalApi: Sync {
    /// Create a signal holding `initial`
    fn create(&self, initial: i64, visibility: SignalVisibility) -> Result<SignalHandle>;

    /// Destroy a signal
    fn destroy(&self, handle: SignalHandle) -> Result<()>;

    /// Current value
    fn load(&self, handle: SignalHandle) -> Result<i64>;

    /// Overwrite the value
    fn store(&self, handle: SignalHandle, value: i64) -> Result<()>;

    /// Atomically subtract, returning the previous value (consumer side)
    fn subtract(&self, handle: SignalHandle, value: i64) -> Result<i64>;

    /// Wait until `observed <cond> value`, returning the observed value
    ///
    /// On timeout the last observed value is returned; callers compare it
    /// against what they expected.
    fn wait(
        &self,
        handle: SignalHandle,
        cond: WaitCondition,
        value: i64,
        timeout: WaitTimeout,
        hint: WaitHint,
    ) -> Result<i64>;
}

// =============================================================================
// HOST SIGNALS
// =============================================================================

#[derive(Debug)]
struct HostSignal {
    value: AtomicI64,
    visibility: SignalVisibility,
}

/// In-process signal table
#[derive(Debug)]
pub struct HostSignals {
    /// Next handle value
    next: AtomicU64,
    /// Live signals
    table: spin::Mutex<BTreeMap<u64, Arc<HostSignal>>>,
}

impl HostSignals {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            table: spin::Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of live signals
    pub fn live_count(&self) -> usize {
        self.table.lock().len()
    }

    /// Visibility a signal was created with
    pub fn visibility(&self, handle: SignalHandle) -> Result<SignalVisibility> {
        Ok(self.get(handle)?.visibility)
    }

    fn get(&self, handle: SignalHandle) -> Result<Arc<HostSignal>> {
        self.table
            .lock()
            .get(&handle.raw())
            .cloned()
            .ok_or(Error::InvalidSignal)
    }
}

impl Default for HostSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalApi for HostSignals {
    fn create(&self, initial: i64, visibility: SignalVisibility) -> Result<SignalHandle> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        let signal = Arc::new(HostSignal {
            value: AtomicI64::new(initial),
            visibility,
        });
        self.table.lock().insert(raw, signal);
        Ok(SignalHandle::from_raw(raw))
    }

    fn destroy(&self, handle: SignalHandle) -> Result<()> {
        self.table
            .lock()
            .remove(&handle.raw())
            .map(|_| ())
            .ok_or(Error::InvalidSignal)
    }

    fn load(&self, handle: SignalHandle) -> Result<i64> {
        Ok(self.get(handle)?.value.load(Ordering::Acquire))
    }

    fn store(&self, handle: SignalHandle, value: i64) -> Result<()> {
        self.get(handle)?.value.store(value, Ordering::Release);
        Ok(())
    }

    fn subtract(&self, handle: SignalHandle, value: i64) -> Result<i64> {
        Ok(self.get(handle)?.value.fetch_sub(value, Ordering::AcqRel))
    }

    fn wait(
        &self,
        handle: SignalHandle,
        cond: WaitCondition,
        value: i64,
        timeout: WaitTimeout,
        hint: WaitHint,
    ) -> Result<i64> {
        // Table lock is not held while polling
        let signal = self.get(handle)?;
        Ok(poll_until(&signal.value, cond, value, timeout, hint))
    }
}

static_assertions::assert_impl_all!(HostSignals: Send, Sync);
static_assertions::assert_impl_all!(SignalHandle: Send, Sync, Copy);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditions() {
        assert!(WaitCondition::Eq.is_satisfied(0, 0));
        assert!(WaitCondition::Ne.is_satisfied(1, 0));
        assert!(WaitCondition::Lt.is_satisfied(0, 1));
        assert!(!WaitCondition::Lt.is_satisfied(1, 1));
        assert!(WaitCondition::Gte.is_satisfied(1, 1));
    }

    #[test]
    fn test_create_destroy() {
        let signals = HostSignals::new();
        let h = signals.create(1, SignalVisibility::Interrupt).unwrap();
        assert!(!h.is_none());
        assert_eq!(signals.load(h).unwrap(), 1);
        assert_eq!(signals.visibility(h).unwrap(), SignalVisibility::Interrupt);
        assert_eq!(signals.live_count(), 1);

        signals.destroy(h).unwrap();
        assert_eq!(signals.destroy(h), Err(Error::InvalidSignal));
        assert_eq!(signals.load(h), Err(Error::InvalidSignal));
        assert_eq!(signals.live_count(), 0);
    }

    #[test]
    fn test_wait_times_out_with_observed_value() {
        let signals = HostSignals::new();
        let h = signals.create(1, SignalVisibility::Process).unwrap();
        let observed = signals
            .wait(h, WaitCondition::Eq, 0, WaitTimeout::Polls(16), WaitHint::Active)
            .unwrap();
        assert_eq!(observed, 1);
    }

    #[test]
    fn test_wait_observes_other_thread() {
        let signals = HostSignals::new();
        let h = signals.create(1, SignalVisibility::Process).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(signals.subtract(h, 1).unwrap(), 1);
            });
            let observed = signals
                .wait(h, WaitCondition::Lt, 1, WaitTimeout::Forever, WaitHint::Blocked)
                .unwrap();
            assert_eq!(observed, 0);
        });
    }
}
