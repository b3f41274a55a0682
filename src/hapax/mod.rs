//! Hapax visible-waiter lock implementation.
//!
//! A classic visible-waiter handoff lock built on an ingress/egress counter
//! pair, with a hashed slot table as the meeting place between a releasing
//! thread and its successor. What sets it apart is the key used for the
//! handoff: a *hapax* - a 64-bit, nonzero token drawn from a per-thread,
//! process-unique, monotonically increasing sequence, used for exactly one
//! lock-unlock episode and never again. Because slots are reused across
//! episodes, keying them by pointers or small counters invites A-B-A
//! confusion between unrelated episodes; single-use tokens make every
//! `(slot, token)` pair unambiguous.
//!
//! Tokens are drawn from a [`Tokens`] source owned by the calling thread:
//! a fresh 48-bit zone is provisioned from a process-wide allocator whenever
//! the thread exhausts its 16-bit sub-sequence, so threads allocate locally
//! almost always. Acquisitions are FIFO between any two threads that observe
//! each other via the ingress counter; a hash collision on the slot table
//! degrades the loser to polling the egress counter, which remains globally
//! consistent with arrival order.
//!
//! This mutex is generic over the relax policy. User may choose a policy as
//! long as it implements the [`Relax`] trait.
//!
//! [`Relax`]: crate::relax::Relax

mod mutex;
pub use mutex::{Mutex, MutexGuard, Tokens};

/// A hapax lock that implements a `spin` relax policy.
///
/// During lock contention, this lock spins while signaling the processor that
/// it is running a busy-wait spin-loop.
pub mod spins {
    use super::mutex;
    use crate::relax::Spin;

    /// A [`hapax::Mutex`] that implements the [`Spin`] relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use queuelock::hapax::{spins::Mutex, Tokens};
    ///
    /// let mutex = Mutex::new(0);
    /// let mut tokens = Tokens::new();
    /// let value = *mutex.lock(&mut tokens);
    /// assert_eq!(value, 0);
    /// ```
    /// [`hapax::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Spin>;

    /// A hapax lock that implements a `spin with backoff` relax policy.
    pub mod backoff {
        use super::mutex;
        use crate::relax::SpinBackoff;

        /// A [`hapax::Mutex`] that implements the [`SpinBackoff`] relax
        /// policy.
        ///
        /// [`hapax::Mutex`]: mutex::Mutex
        pub type Mutex<T> = mutex::Mutex<T, SpinBackoff>;
    }
}

/// A hapax lock that implements a `yield` relax policy.
#[cfg(any(feature = "yield", loom, test))]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
pub mod yields {
    use super::mutex;
    use crate::relax::Yield;

    /// A [`hapax::Mutex`] that implements the [`Yield`] relax policy.
    ///
    /// [`hapax::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Yield>;

    /// A hapax lock that implements a `yield with backoff` relax policy.
    pub mod backoff {
        use super::mutex;
        use crate::relax::YieldBackoff;

        /// A [`hapax::Mutex`] that implements the [`YieldBackoff`] relax
        /// policy.
        ///
        /// [`hapax::Mutex`]: mutex::Mutex
        pub type Mutex<T> = mutex::Mutex<T, YieldBackoff>;
    }
}

/// A hapax lock that implements a `loop` relax policy.
pub mod loops {
    use super::mutex;
    use crate::relax::Loop;

    /// A [`hapax::Mutex`] that implements the [`Loop`] relax policy.
    ///
    /// [`hapax::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Loop>;
}
