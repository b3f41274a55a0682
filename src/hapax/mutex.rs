use alloc::boxed::Box;
use alloc::vec::Vec;

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::AtomicU64;
use crate::cfg::cell::{UnsafeCell, WithUnchecked};
use crate::relax::Relax;

/// The number of visible-waiter slots per lock instance.
///
/// Must be a power of two. Two concurrent episodes may hash to one slot; the
/// loser of the slot falls back to polling the egress counter, so the table
/// size only affects throughput, never correctness.
#[cfg(not(all(loom, test)))]
const VW_SLOTS: usize = 256;

/// A reduced slot table for model checking runs.
#[cfg(all(loom, test))]
const VW_SLOTS: usize = 4;

const _: () = assert!(VW_SLOTS.is_power_of_two());

/// The process-wide allocator of 48-bit token zones.
///
/// Deliberately a plain core atomic even under Loom: zone handout order
/// carries no synchronization, it only has to be atomic.
static ZONES: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);

/// A per-thread source of single-use acquisition tokens.
///
/// Every [`Mutex::lock`] call consumes one token: a 64-bit, nonzero value
/// that is unique across all threads and all acquisitions in the process.
/// The upper 48 bits hold a zone obtained from a process-wide allocator; the
/// low 16 bits are a sub-sequence the owning thread walks through locally,
/// so the shared allocator is touched once per 65536 acquisitions.
///
/// A thread should keep one `Tokens` instance and reuse it across
/// acquisitions (of any number of hapax locks); creating one per call works
/// but burns a fresh zone every time.
///
/// # Examples
///
/// ```
/// use queuelock::hapax::Tokens;
///
/// let tokens = Tokens::new();
/// ```
#[derive(Debug)]
pub struct Tokens {
    next: u64,
}

impl Tokens {
    /// Creates a new token source.
    ///
    /// No zone is provisioned until the first token is drawn.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Draws the next token, provisioning a fresh zone when the current
    /// 16-bit sub-sequence is exhausted.
    fn next_token(&mut self) -> u64 {
        let mut token = self.next;
        self.next = self.next.wrapping_add(1);
        if token & 0xFFFF == 0 {
            // Also taken on first use: `next` starts at zero, and zone zero
            // is never handed out, so token zero is never produced.
            let zone = ZONES.fetch_add(1, Relaxed).wrapping_add(1);
            token = zone << 16;
            self.next = token + 1;
        }
        debug_assert_ne!(token, 0);
        token
    }
}

impl Default for Tokens {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// A mutual exclusion primitive implementing the hapax visible-waiter
/// protocol, useful for protecting shared data.
///
/// Arriving threads serialize on an ingress counter: the exchange returns
/// the token of the immediate predecessor, and the arriving thread either
/// observes that token already departed, or installs it into a hashed slot
/// and waits for the predecessor's release to clear it. Service is FIFO in
/// ingress order.
///
/// The data can only be accessed through the RAII guards returned from
/// [`lock`], which guarantees that the data is only ever accessed when the
/// mutex is locked.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use queuelock::hapax::{spins::Mutex, Tokens};
///
/// let mutex = Arc::new(Mutex::new(0));
/// let c_mutex = Arc::clone(&mutex);
///
/// thread::spawn(move || {
///     // A token source must be mutably accessible.
///     let mut tokens = Tokens::new();
///     *c_mutex.lock(&mut tokens) = 10;
/// })
/// .join().expect("thread::spawn failed");
///
/// let mut tokens = Tokens::new();
/// assert_eq!(*mutex.lock(&mut tokens), 10);
/// ```
/// [`lock`]: Mutex::lock
pub struct Mutex<T: ?Sized, R> {
    arrive: CachePadded<AtomicU64>,
    depart: CachePadded<AtomicU64>,
    waiting: Box<[CachePadded<AtomicU64>]>,
    marker: PhantomData<R>,
    data: UnsafeCell<T>,
}

// Same unsafe impls as `std::sync::Mutex`.
unsafe impl<T: ?Sized + Send, R> Send for Mutex<T, R> {}
unsafe impl<T: ?Sized + Send, R> Sync for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    /// Creates a new mutex in an unlocked state ready for use.
    ///
    /// The constructor allocates the visible-waiter slot table, so it cannot
    /// be evaluated in const contexts.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::hapax::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// ```
    #[inline]
    pub fn new(value: T) -> Self {
        let waiting: Vec<_> = (0..VW_SLOTS).map(|_| CachePadded::new(AtomicU64::new(0))).collect();
        Self {
            arrive: CachePadded::new(AtomicU64::new(0)),
            depart: CachePadded::new(AtomicU64::new(0)),
            waiting: waiting.into_boxed_slice(),
            marker: PhantomData,
            data: UnsafeCell::new(value),
        }
    }

    /// Consumes this mutex, returning the underlying data.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::hapax::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// assert_eq!(mutex.into_inner(), 0);
    /// ```
    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized, R> Mutex<T, R> {
    /// Maps a token to its slot of the visible-waiter table.
    ///
    /// Tokens drawn from one zone share a slot, which keeps a thread on the
    /// same slot for 65536 consecutive episodes.
    const fn slot_index(token: u64) -> usize {
        (((token >> 16) as u32).wrapping_mul(17) as usize) & (VW_SLOTS - 1)
    }
}

impl<T: ?Sized, R: Relax> Mutex<T, R> {
    /// Acquires this mutex, blocking the current thread until it is able to
    /// do so.
    ///
    /// This function will block the local thread until it is available to
    /// acquire the mutex. Upon returning, the thread is the only thread with
    /// the lock held. An RAII guard is returned to allow scoped unlock of the
    /// lock. When the guard goes out of scope, the mutex will be unlocked.
    /// Acquiring consumes one token from the mutably borrowed [`Tokens`]
    /// source.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::hapax::{spins::Mutex, Tokens};
    ///
    /// let mutex = Mutex::new(0);
    /// let mut tokens = Tokens::new();
    /// *mutex.lock(&mut tokens) = 10;
    ///
    /// assert_eq!(*mutex.lock(&mut tokens), 10);
    /// ```
    #[inline]
    pub fn lock(&self, tokens: &mut Tokens) -> MutexGuard<'_, T, R> {
        let token = tokens.next_token();
        let pred = self.arrive.swap(token, AcqRel);
        debug_assert_ne!(pred, token);

        if self.depart.load(Acquire) != pred {
            let slot = &self.waiting[Self::slot_index(pred)];
            if slot.compare_exchange(0, pred, AcqRel, Acquire).is_err() {
                // Collision with an unrelated episode: fall back to polling
                // the egress counter.
                let mut relax = R::new();
                while self.depart.load(Acquire) != pred {
                    relax.relax();
                }
            } else if self.depart.load(Acquire) == pred {
                // Raced with the predecessor's release: retract the
                // installation and proceed.
                let _ = slot.compare_exchange(pred, 0, AcqRel, Acquire);
            } else {
                // Preferred path: wait to be handed over via this slot.
                let mut relax = R::new();
                while slot.load(Acquire) == pred {
                    relax.relax();
                }
            }
        }

        MutexGuard::new(self, token)
    }

    /// Acquires this mutex and then runs the closure against its guard.
    ///
    /// This function instantiates a [`Tokens`] source for each call, which
    /// burns a fresh token zone every time; prefer calling [`lock`] with a
    /// per-thread source on hot paths.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::hapax::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// mutex.lock_with(|mut guard| *guard = 10);
    /// assert_eq!(mutex.lock_with(|guard| *guard), 10);
    /// ```
    ///
    /// Borrows of the guard or its data cannot escape the given closure.
    ///
    /// ```compile_fail,E0515
    /// use queuelock::hapax::spins::Mutex;
    ///
    /// let mutex = Mutex::new(1);
    /// let data = mutex.lock_with(|guard| &*guard);
    /// ```
    /// [`lock`]: Mutex::lock
    #[inline]
    pub fn lock_with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(MutexGuard<'_, T, R>) -> Ret,
    {
        let mut tokens = Tokens::new();
        f(self.lock(&mut tokens))
    }

    /// Unlocks this mutex: hands off through the visible-waiter slot when a
    /// successor installed itself there, publishing the departure otherwise.
    fn unlock(&self, token: u64) {
        debug_assert_ne!(token, 0);

        let slot = &self.waiting[Self::slot_index(token)];
        if slot.compare_exchange(token, 0, AcqRel, Acquire).is_ok() {
            // A successor installed our token and is spinning on the slot;
            // the clearing store is the handoff.
            return;
        }

        self.depart.store(token, Release);
        // Clear a late-arriving installer, which may have published our token
        // into the slot between the CAS above and the departure store.
        let _ = slot.compare_exchange(token, 0, AcqRel, Acquire);
    }
}

impl<T: ?Sized, R> Mutex<T, R> {
    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the `Mutex` mutably, no actual locking needs
    /// to take place - the mutable borrow statically guarantees no locks
    /// exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::hapax::{spins::Mutex, Tokens};
    ///
    /// let mut mutex = Mutex::new(0);
    /// *mutex.get_mut() = 10;
    ///
    /// let mut tokens = Tokens::new();
    /// assert_eq!(*mutex.lock(&mut tokens), 10);
    /// ```
    #[cfg(not(all(loom, test)))]
    #[inline(always)]
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: We hold exclusive access to the Mutex data.
        unsafe { &mut *self.data.get() }
    }
}

impl<T: Default, R> Default for Mutex<T, R> {
    /// Creates a `Mutex<T, R>`, with the `Default` value for `T`.
    #[inline]
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<T, R> From<T> for Mutex<T, R> {
    /// Creates a `Mutex<T, R>` from a instance of `T`.
    #[inline]
    fn from(data: T) -> Self {
        Self::new(data)
    }
}

impl<T: ?Sized + fmt::Debug, R: Relax> fmt::Debug for Mutex<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens = Tokens::new();
        let mut d = f.debug_struct("Mutex");
        self.lock(&mut tokens).with(|data| d.field("data", &data));
        d.finish()
    }
}

#[cfg(test)]
impl<T: ?Sized, R> crate::test::LockNew for Mutex<T, R> {
    type Target = T;

    fn new(value: Self::Target) -> Self
    where
        Self::Target: Sized,
    {
        Self::new(value)
    }
}

#[cfg(test)]
impl<T: ?Sized, R: Relax> crate::test::LockWith for Mutex<T, R> {
    type Guard<'a> = MutexGuard<'a, Self::Target, R>
    where
        Self: 'a,
        Self::Target: 'a;

    fn lock_with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(MutexGuard<'_, T, R>) -> Ret,
    {
        self.lock_with(f)
    }
}

#[cfg(all(not(loom), test))]
impl<T: ?Sized, R> crate::test::LockData for Mutex<T, R> {
    fn get_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}

/// An RAII implementation of a "scoped lock" of a mutex. When this structure
/// is dropped (falls out of scope), the lock will be unlocked.
///
/// The guard carries the acquisition's token, which identifies this episode
/// in the lock's handoff slots.
///
/// The data protected by the mutex can be access through this guard via its
/// [`Deref`] and [`DerefMut`] implementations.
///
/// This structure is returned by the [`lock`] method on [`Mutex`]. It is also
/// given as closure argument by the [`lock_with`] method.
///
/// [`Deref`]: core::ops::Deref
/// [`DerefMut`]: core::ops::DerefMut
/// [`lock`]: Mutex::lock
/// [`lock_with`]: Mutex::lock_with
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized, R: Relax> {
    lock: &'a Mutex<T, R>,
    token: u64,
}

// Same unsafe Sync impl as `std::sync::MutexGuard`.
unsafe impl<T: ?Sized + Sync, R: Relax> Sync for MutexGuard<'_, T, R> {}

impl<'a, T: ?Sized, R: Relax> MutexGuard<'a, T, R> {
    /// Creates a new `MutexGuard` instance.
    const fn new(lock: &'a Mutex<T, R>, token: u64) -> Self {
        Self { lock, token }
    }

    /// Returns the single-use token identifying this acquisition.
    ///
    /// Tokens are nonzero and strictly increase over the acquisitions made
    /// through one [`Tokens`] source.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::hapax::{spins::Mutex, Tokens};
    ///
    /// let mutex = Mutex::new(());
    /// let mut tokens = Tokens::new();
    ///
    /// let first = mutex.lock(&mut tokens).token();
    /// let second = mutex.lock(&mut tokens).token();
    /// assert!(second > first);
    /// ```
    #[must_use]
    #[inline]
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Runs `f` against a shared reference pointing to the underlying data.
    fn with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&T) -> Ret,
    {
        // SAFETY: A guard instance holds the lock locked.
        unsafe { self.lock.data.with_unchecked(f) }
    }
}

impl<'a, T: ?Sized, R: Relax> Drop for MutexGuard<'a, T, R> {
    #[inline]
    fn drop(&mut self) {
        self.lock.unlock(self.token);
    }
}

impl<'a, T: ?Sized + fmt::Debug, R: Relax> fmt::Debug for MutexGuard<'a, T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|data| fmt::Debug::fmt(data, f))
    }
}

impl<'a, T: ?Sized + fmt::Display, R: Relax> fmt::Display for MutexGuard<'a, T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|data| fmt::Display::fmt(data, f))
    }
}

#[cfg(not(all(loom, test)))]
impl<'a, T: ?Sized, R: Relax> core::ops::Deref for MutexGuard<'a, T, R> {
    type Target = T;

    /// Dereferences the guard to access the underlying data.
    #[inline(always)]
    fn deref(&self) -> &T {
        // SAFETY: A guard instance holds the lock locked.
        unsafe { &*self.lock.data.get() }
    }
}

#[cfg(not(all(loom, test)))]
impl<'a, T: ?Sized, R: Relax> core::ops::DerefMut for MutexGuard<'a, T, R> {
    /// Mutably dereferences the guard to access the underlying data.
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: A guard instance holds the lock locked.
        unsafe { &mut *self.lock.data.get() }
    }
}

/// SAFETY: A guard instance hold the lock locked, with exclusive access to
/// the underlying data.
#[cfg(all(loom, test))]
#[cfg(not(tarpaulin_include))]
unsafe impl<T: ?Sized, R: Relax> crate::loom::Guard for MutexGuard<'_, T, R> {
    type Target = T;

    fn get(&self) -> &loom::cell::UnsafeCell<Self::Target> {
        &self.lock.data
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use crate::hapax::yields::Mutex;
    use crate::test::tests;

    #[test]
    fn lots_and_lots_lock() {
        tests::lots_and_lots_lock::<Mutex<_>>();
    }

    #[test]
    fn smoke() {
        tests::smoke::<Mutex<_>>();
    }

    #[test]
    fn test_guard_debug_display() {
        tests::test_guard_debug_display::<Mutex<_>>();
    }

    #[test]
    fn test_mutex_debug() {
        tests::test_mutex_debug::<Mutex<_>>();
    }

    #[test]
    fn test_mutex_from() {
        tests::test_mutex_from::<Mutex<_>>();
    }

    #[test]
    fn test_mutex_default() {
        tests::test_mutex_default::<Mutex<_>>();
    }

    #[test]
    fn test_get_mut() {
        tests::test_get_mut::<Mutex<_>>();
    }

    #[test]
    fn test_lock_arc_nested() {
        tests::test_lock_arc_nested::<Mutex<_>, Mutex<_>>();
    }

    #[test]
    fn test_acquire_more_than_one_lock() {
        tests::test_acquire_more_than_one_lock::<Mutex<_>>();
    }

    #[test]
    fn test_lock_arc_access_in_unwind() {
        tests::test_lock_arc_access_in_unwind::<Mutex<_>>();
    }

    #[test]
    fn test_lock_unsized() {
        tests::test_lock_unsized::<Mutex<_>>();
    }

    #[test]
    fn test_into_inner() {
        let mutex = Mutex::new(7_u32);
        assert_eq!(mutex.into_inner(), 7);
    }

    #[test]
    fn tokens_increase_and_cross_a_zone_boundary() {
        use super::Tokens;

        const ITERS: usize = 70_000;

        let mutex = Mutex::new(());
        let mut tokens = Tokens::new();
        let mut last = 0;
        let mut zones_seen = 0;
        let mut zone = 0;

        for _ in 0..ITERS {
            let guard = mutex.lock(&mut tokens);
            let token = guard.token();
            assert!(token > last);
            if token >> 16 != zone {
                zone = token >> 16;
                zones_seen += 1;
            }
            last = token;
        }

        // 70k episodes cannot fit in one 16-bit sub-sequence.
        assert!(zones_seen >= 2);
    }

    #[test]
    fn tokens_are_unique_across_threads() {
        use super::Tokens;
        use std::collections::HashSet;
        use std::sync::mpsc::channel;
        use std::sync::Arc;
        use std::thread;
        use std::vec::Vec;

        const THREADS: usize = 4;
        const ITERS: usize = 50_000;

        let mutex = Arc::new(Mutex::new(()));
        let (tx, rx) = channel();
        for _ in 0..THREADS {
            let mutex = Arc::clone(&mutex);
            let tx = tx.clone();
            thread::spawn(move || {
                let mut tokens = Tokens::new();
                let mut seen = Vec::with_capacity(ITERS);
                for _ in 0..ITERS {
                    seen.push(mutex.lock(&mut tokens).token());
                }
                tx.send(seen).unwrap();
            });
        }

        drop(tx);
        let mut all = HashSet::new();
        for seen in rx.iter() {
            for token in seen {
                assert_ne!(token, 0);
                assert!(all.insert(token));
            }
        }
        assert_eq!(all.len(), THREADS * ITERS);
    }

    #[test]
    fn counters_meet_at_rest() {
        use super::Tokens;
        use core::sync::atomic::Ordering::Relaxed;

        let mutex = Mutex::new(());
        let mut tokens = Tokens::new();

        let mut last = 0;
        for _ in 0..100 {
            let guard = mutex.lock(&mut tokens);
            last = guard.token();
        }

        // With no waiter to meet in a slot, every release publishes through
        // the egress counter.
        assert_eq!(mutex.arrive.load(Relaxed), last);
        assert_eq!(mutex.depart.load(Relaxed), last);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::hapax::yields::Mutex;
    use crate::loom::models;

    #[test]
    fn lock_join() {
        models::lock_join::<Mutex<_>>();
    }
}
