//! Adapters giving every benchmarked lock one shape: construct unlocked
//! around a protected `u64`, prepare one thread's session state, run a
//! closure inside the critical section.

use queuelock::{clh, hapax, mcs, reciprocating, twa};

/// A lock driven by the benchmark.
///
/// `Session` is whatever per-thread state the lock needs across
/// acquisitions: a queue node, a token source, or nothing at all.
pub trait LockBench: Default + Send + Sync + 'static {
    /// Per-thread state, created once per worker and reused for every cycle.
    type Session: Default;

    /// Runs `f` against the protected counter while holding the lock.
    fn critical<R>(&self, session: &mut Self::Session, f: impl FnOnce(&mut u64) -> R) -> R;

    /// Reads the protected counter. Only meaningful once all workers have
    /// stopped.
    fn counter(&self) -> u64;
}

/// The platform mutex, as a reference point.
#[derive(Default)]
pub struct StdMutexBench {
    mutex: std::sync::Mutex<u64>,
}

impl LockBench for StdMutexBench {
    type Session = ();

    fn critical<R>(&self, _session: &mut Self::Session, f: impl FnOnce(&mut u64) -> R) -> R {
        let mut guard = self.mutex.lock().expect("benchmark workers do not panic");
        f(&mut guard)
    }

    fn counter(&self) -> u64 {
        *self.mutex.lock().expect("benchmark workers do not panic")
    }
}

/// The MCS queue lock.
#[derive(Default)]
pub struct McsLockBench {
    mutex: mcs::spins::Mutex<u64>,
}

impl LockBench for McsLockBench {
    type Session = mcs::MutexNode;

    fn critical<R>(&self, session: &mut Self::Session, f: impl FnOnce(&mut u64) -> R) -> R {
        let mut guard = self.mutex.lock(session);
        f(&mut guard)
    }

    fn counter(&self) -> u64 {
        self.mutex.lock_with(|guard| *guard)
    }
}

/// The CLH queue lock.
#[derive(Default)]
pub struct ClhLockBench {
    mutex: clh::spins::Mutex<u64>,
}

impl LockBench for ClhLockBench {
    type Session = clh::MutexNode;

    fn critical<R>(&self, session: &mut Self::Session, f: impl FnOnce(&mut u64) -> R) -> R {
        let mut guard = self.mutex.lock(session);
        f(&mut guard)
    }

    fn counter(&self) -> u64 {
        self.mutex.lock_with(|guard| *guard)
    }
}

/// The ticket-plus-waiting-array lock.
#[derive(Default)]
pub struct TwaLockBench {
    mutex: twa::spins::Mutex<u64>,
}

impl LockBench for TwaLockBench {
    type Session = ();

    fn critical<R>(&self, _session: &mut Self::Session, f: impl FnOnce(&mut u64) -> R) -> R {
        let mut guard = self.mutex.lock();
        f(&mut guard)
    }

    fn counter(&self) -> u64 {
        *self.mutex.lock()
    }
}

/// The reciprocating lock.
#[derive(Default)]
pub struct ReciprocatingLockBench {
    mutex: reciprocating::spins::Mutex<u64>,
}

impl LockBench for ReciprocatingLockBench {
    type Session = reciprocating::MutexNode;

    fn critical<R>(&self, session: &mut Self::Session, f: impl FnOnce(&mut u64) -> R) -> R {
        let mut guard = self.mutex.lock(session);
        f(&mut guard)
    }

    fn counter(&self) -> u64 {
        self.mutex.lock_with(|guard| *guard)
    }
}

/// The hapax visible-waiter lock.
#[derive(Default)]
pub struct HapaxLockBench {
    mutex: hapax::spins::Mutex<u64>,
}

impl LockBench for HapaxLockBench {
    type Session = hapax::Tokens;

    fn critical<R>(&self, session: &mut Self::Session, f: impl FnOnce(&mut u64) -> R) -> R {
        let mut guard = self.mutex.lock(session);
        f(&mut guard)
    }

    fn counter(&self) -> u64 {
        self.mutex.lock_with(|guard| *guard)
    }
}
