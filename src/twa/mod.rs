//! TWA lock implementation (ticket lock with a waiting array).
//!
//! A plain ticket lock forces every waiter to poll one shared grant counter,
//! causing coherence traffic proportional to the number of waiters. The TWA
//! variant keeps the single grant counter but parks long-term waiters on a
//! hashed per-slot sequence counter: a releasing thread bumps exactly one
//! slot, waking (at most) the waiter whose ticket is about to come up, while
//! only near-term ticket holders poll the grant counter directly. Hash
//! collisions merely cause spurious wake-ups; woken waiters re-check the
//! grant and go back to sleeping on their slot.
//!
//! Acquisitions are granted in strict ticket (FIFO) order. No per-thread
//! queue cell is required: the handle is the ticket itself, carried by the
//! guard.
//!
//! This mutex is generic over the relax policy. User may choose a policy as
//! long as it implements the [`Relax`] trait.
//!
//! [`Relax`]: crate::relax::Relax

mod mutex;
pub use mutex::{Mutex, MutexGuard};

/// A TWA lock that implements a `spin` relax policy.
///
/// During lock contention, this lock spins while signaling the processor that
/// it is running a busy-wait spin-loop.
pub mod spins {
    use super::mutex;
    use crate::relax::Spin;

    /// A [`twa::Mutex`] that implements the [`Spin`] relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use queuelock::twa::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// let value = *mutex.lock();
    /// assert_eq!(value, 0);
    /// ```
    /// [`twa::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Spin>;

    /// A TWA lock that implements a `spin with backoff` relax policy.
    pub mod backoff {
        use super::mutex;
        use crate::relax::SpinBackoff;

        /// A [`twa::Mutex`] that implements the [`SpinBackoff`] relax policy.
        ///
        /// [`twa::Mutex`]: mutex::Mutex
        pub type Mutex<T> = mutex::Mutex<T, SpinBackoff>;
    }
}

/// A TWA lock that implements a `yield` relax policy.
#[cfg(any(feature = "yield", loom, test))]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
pub mod yields {
    use super::mutex;
    use crate::relax::Yield;

    /// A [`twa::Mutex`] that implements the [`Yield`] relax policy.
    ///
    /// [`twa::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Yield>;

    /// A TWA lock that implements a `yield with backoff` relax policy.
    pub mod backoff {
        use super::mutex;
        use crate::relax::YieldBackoff;

        /// A [`twa::Mutex`] that implements the [`YieldBackoff`] relax policy.
        ///
        /// [`twa::Mutex`]: mutex::Mutex
        pub type Mutex<T> = mutex::Mutex<T, YieldBackoff>;
    }
}

/// A TWA lock that implements a `loop` relax policy.
pub mod loops {
    use super::mutex;
    use crate::relax::Loop;

    /// A [`twa::Mutex`] that implements the [`Loop`] relax policy.
    ///
    /// [`twa::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Loop>;
}
