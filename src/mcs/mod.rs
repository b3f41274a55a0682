//! MCS lock implementation.
//!
//! The Mellor-Crummey and Scott lock is fair: threads that have waited for
//! longer are granted the lock first (FIFO). Arriving threads append their
//! own queue node to the tail of a wait queue and spin against an atomic
//! flag inside that node, which avoids the coherence traffic of every waiter
//! polling one shared location.
//!
//! Queue nodes must be allocated by the callers and are represented by the
//! [`MutexNode`] type. A node is re-initialized by every lock acquisition and
//! can be reused once its associated guard is dropped.
//!
//! This mutex is generic over the relax policy. User may choose a policy as
//! long as it implements the [`Relax`] trait. The following modules provide
//! type aliases for [`Mutex`] associated with a relax policy.
//!
//! [`Relax`]: crate::relax::Relax

mod mutex;
pub use mutex::{Mutex, MutexGuard, MutexNode};

/// A MCS lock that implements a `spin` relax policy.
///
/// During lock contention, this lock spins while signaling the processor that
/// it is running a busy-wait spin-loop.
pub mod spins {
    use super::mutex;
    use crate::relax::Spin;

    /// A [`mcs::Mutex`] that implements the [`Spin`] relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use queuelock::mcs::{spins::Mutex, MutexNode};
    ///
    /// let mutex = Mutex::new(0);
    /// let mut node = MutexNode::new();
    /// let value = *mutex.lock(&mut node);
    /// assert_eq!(value, 0);
    /// ```
    /// [`mcs::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Spin>;

    /// A MCS lock that implements a `spin with backoff` relax policy.
    ///
    /// During lock contention, this lock will perform exponential backoff
    /// while spinning, signaling the processor that it is running a busy-wait
    /// spin-loop.
    pub mod backoff {
        use super::mutex;
        use crate::relax::SpinBackoff;

        /// A [`mcs::Mutex`] that implements the [`SpinBackoff`] relax policy.
        ///
        /// [`mcs::Mutex`]: mutex::Mutex
        pub type Mutex<T> = mutex::Mutex<T, SpinBackoff>;
    }
}

/// A MCS lock that implements a `yield` relax policy.
///
/// During lock contention, this lock will yield the current time slice to
/// the OS scheduler.
#[cfg(any(feature = "yield", loom, test))]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
pub mod yields {
    use super::mutex;
    use crate::relax::Yield;

    /// A [`mcs::Mutex`] that implements the [`Yield`] relax policy.
    ///
    /// [`mcs::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Yield>;

    /// A MCS lock that implements a `yield with backoff` relax policy.
    ///
    /// During lock contention, this lock will perform exponential backoff
    /// while spinning, up to a threshold, then yields back to the OS
    /// scheduler.
    pub mod backoff {
        use super::mutex;
        use crate::relax::YieldBackoff;

        /// A [`mcs::Mutex`] that implements the [`YieldBackoff`] relax policy.
        ///
        /// [`mcs::Mutex`]: mutex::Mutex
        pub type Mutex<T> = mutex::Mutex<T, YieldBackoff>;
    }
}

/// A MCS lock that implements a `loop` relax policy.
///
/// During lock contention, this lock will rapidly spin without telling the
/// CPU to do any power down.
pub mod loops {
    use super::mutex;
    use crate::relax::Loop;

    /// A [`mcs::Mutex`] that implements the [`Loop`] relax policy.
    ///
    /// [`mcs::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Loop>;
}
