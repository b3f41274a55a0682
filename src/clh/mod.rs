//! CLH lock implementation.
//!
//! The Craig and Landin-Hagersten lock is a list-based queuing lock that is
//! fair (FIFO on the order of arrival) and spins on locally-accessible
//! memory: each waiter polls the flag inside its *predecessor's* queue cell.
//! On release, a thread publishes its own flag and then adopts the
//! predecessor's cell for its next acquisition, so the set of live cells is
//! conserved: no cell is ever freed while a successor may still observe it,
//! and none is ever owned twice.
//!
//! Queue cells are allocated in the heap and their ownership is transparently
//! moved from the lock holding thread to its successor. Allocating the cells
//! directly in the stack is not possible since the CLH lock protocol does not
//! guarantee that a predecessor thread will still be live by the time a
//! successor accesses its cell. Cells are managed through owning
//! [`MutexNode`] handles, which callers keep across acquisitions.
//!
//! This mutex is generic over the relax policy. User may choose a policy as
//! long as it implements the [`Relax`] trait.
//!
//! [`Relax`]: crate::relax::Relax

mod mutex;
pub use mutex::{Mutex, MutexGuard, MutexNode};

/// A CLH lock that implements a `spin` relax policy.
///
/// During lock contention, this lock spins while signaling the processor that
/// it is running a busy-wait spin-loop.
pub mod spins {
    use super::mutex;
    use crate::relax::Spin;

    /// A [`clh::Mutex`] that implements the [`Spin`] relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use queuelock::clh::{spins::Mutex, MutexNode};
    ///
    /// let mutex = Mutex::new(0);
    /// let mut node = MutexNode::new();
    /// let value = *mutex.lock(&mut node);
    /// assert_eq!(value, 0);
    /// ```
    /// [`clh::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Spin>;

    /// A CLH lock that implements a `spin with backoff` relax policy.
    pub mod backoff {
        use super::mutex;
        use crate::relax::SpinBackoff;

        /// A [`clh::Mutex`] that implements the [`SpinBackoff`] relax policy.
        ///
        /// [`clh::Mutex`]: mutex::Mutex
        pub type Mutex<T> = mutex::Mutex<T, SpinBackoff>;
    }
}

/// A CLH lock that implements a `yield` relax policy.
#[cfg(any(feature = "yield", loom, test))]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
pub mod yields {
    use super::mutex;
    use crate::relax::Yield;

    /// A [`clh::Mutex`] that implements the [`Yield`] relax policy.
    ///
    /// [`clh::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Yield>;

    /// A CLH lock that implements a `yield with backoff` relax policy.
    pub mod backoff {
        use super::mutex;
        use crate::relax::YieldBackoff;

        /// A [`clh::Mutex`] that implements the [`YieldBackoff`] relax policy.
        ///
        /// [`clh::Mutex`]: mutex::Mutex
        pub type Mutex<T> = mutex::Mutex<T, YieldBackoff>;
    }
}

/// A CLH lock that implements a `loop` relax policy.
pub mod loops {
    use super::mutex;
    use crate::relax::Loop;

    /// A [`clh::Mutex`] that implements the [`Loop`] relax policy.
    ///
    /// [`clh::Mutex`]: mutex::Mutex
    pub type Mutex<T> = mutex::Mutex<T, Loop>;
}
