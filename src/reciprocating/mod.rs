//! Reciprocating lock implementation.
//!
//! A single atomic word, `arrivals`, encodes the whole lock state and also
//! serves as the arrival stack. A null word means unlocked; a reserved
//! non-pointer sentinel means locked with no waiters; any other value is the
//! element of the newest arrival, which doubles as the head of a LIFO stack
//! of waiters. Arriving threads push themselves with one exchange; a
//! releasing thread either hands the lock to the waiter that arrived right
//! after it, or drains the whole stack to seed the next round.
//!
//! Waiters that arrive during one holder's tenure form a *segment* and are
//! served newest-first (LIFO); segments themselves are served in arrival
//! order (FIFO), so no waiter starves: a thread waits for at most two
//! segments worth of critical sections.
//!
//! Wait elements must be allocated by the callers and are represented by the
//! [`MutexNode`] type. An element is re-initialized by every lock acquisition
//! and can be reused once its associated guard is dropped.
//!
//! This mutex is generic over the relax policy. User may choose a policy as
//! long as it implements the [`Relax`] trait.
//!
//! [`Relax`]: crate::relax::Relax

mod mutex;
pub use mutex::{Mutex, MutexGuard, MutexNode};

/// A reciprocating lock that implements a `spin` relax policy.
///
/// During lock contention, this lock spins while signaling the processor that
/// it is running a busy-wait spin-loop.
pub mod spins {
    use super::mutex;
    use crate::relax::Spin;

    /// A [`reciprocating::Mutex`] that implements the [`Spin`] relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use queuelock::reciprocating::{spins::Mutex, MutexNode};
    ///
    /// let mutex = Mutex::new(0);
    /// let mut node = MutexNode::new();
    /// let value = *mutex.lock(&mut node);
    /// assert_eq!(value, 0);
    /// ```
    /// [`reciprocating::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Spin>;

    /// A reciprocating lock that implements a `spin with backoff` relax
    /// policy.
    pub mod backoff {
        use super::mutex;
        use crate::relax::SpinBackoff;

        /// A [`reciprocating::Mutex`] that implements the [`SpinBackoff`]
        /// relax policy.
        ///
        /// [`reciprocating::Mutex`]: mutex::Mutex
        pub type Mutex<T> = mutex::Mutex<T, SpinBackoff>;
    }
}

/// A reciprocating lock that implements a `yield` relax policy.
#[cfg(any(feature = "yield", loom, test))]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
pub mod yields {
    use super::mutex;
    use crate::relax::Yield;

    /// A [`reciprocating::Mutex`] that implements the [`Yield`] relax policy.
    ///
    /// [`reciprocating::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Yield>;

    /// A reciprocating lock that implements a `yield with backoff` relax
    /// policy.
    pub mod backoff {
        use super::mutex;
        use crate::relax::YieldBackoff;

        /// A [`reciprocating::Mutex`] that implements the [`YieldBackoff`]
        /// relax policy.
        ///
        /// [`reciprocating::Mutex`]: mutex::Mutex
        pub type Mutex<T> = mutex::Mutex<T, YieldBackoff>;
    }
}

/// A reciprocating lock that implements a `loop` relax policy.
pub mod loops {
    use super::mutex;
    use crate::relax::Loop;

    /// A [`reciprocating::Mutex`] that implements the [`Loop`] relax policy.
    ///
    /// [`reciprocating::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Loop>;
}
