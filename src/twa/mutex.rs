use alloc::boxed::Box;
use alloc::vec::Vec;

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::{AtomicU32, AtomicU64};
use crate::cfg::cell::{UnsafeCell, WithUnchecked};
use crate::relax::Relax;

/// The number of wake-up slots in the waiting array.
///
/// Must be a power of two. More slots mean fewer hash collisions between
/// concurrently sleeping tickets, at the cost of a larger (heap allocated)
/// lock.
#[cfg(not(all(loom, test)))]
const WAIT_SLOTS: usize = 4096;

/// A reduced waiting array for model checking runs.
#[cfg(all(loom, test))]
const WAIT_SLOTS: usize = 4;

/// Tickets within this distance of the grant counter poll it directly; all
/// others sleep on their hashed waiting array slot.
const LONG_TERM_THRESHOLD: u64 = 1;

const _: () = assert!(WAIT_SLOTS.is_power_of_two());

/// A mutual exclusion primitive implementing a ticket lock with a waiting
/// array, useful for protecting shared data.
///
/// Arriving threads draw a ticket from a monotone counter and are admitted
/// in ticket order, so the lock is fair (FIFO). A thread whose ticket is far
/// from being granted does not poll the shared grant counter; it sleeps on a
/// hashed slot of the waiting array, which the releasing thread bumps for
/// exactly the ticket that is about to become runnable.
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
/// use queuelock::twa::spins::Mutex;
///
/// let mutex = Arc::new(Mutex::new(0));
/// let c_mutex = Arc::clone(&mutex);
///
/// thread::spawn(move || {
///     *c_mutex.lock() = 10;
/// })
/// .join().expect("thread::spawn failed");
///
/// assert_eq!(*mutex.lock(), 10);
/// ```
/// [`lock`]: Mutex::lock
pub struct Mutex<T: ?Sized, R> {
    next_ticket: CachePadded<AtomicU64>,
    grant: CachePadded<AtomicU64>,
    waiting: Box<[CachePadded<AtomicU32>]>,
    marker: PhantomData<R>,
    data: UnsafeCell<T>,
}

// Same unsafe impls as `std::sync::Mutex`.
unsafe impl<T: ?Sized + Send, R> Send for Mutex<T, R> {}
unsafe impl<T: ?Sized + Send, R> Sync for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    /// Creates a new mutex in an unlocked state ready for use.
    ///
    /// The constructor allocates the waiting array, so it cannot be evaluated
    /// in const contexts.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::twa::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// ```
    #[inline]
    pub fn new(value: T) -> Self {
        let waiting: Vec<_> = (0..WAIT_SLOTS).map(|_| CachePadded::new(AtomicU32::new(0))).collect();
        Self {
            next_ticket: CachePadded::new(AtomicU64::new(0)),
            grant: CachePadded::new(AtomicU64::new(0)),
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
    /// use queuelock::twa::spins::Mutex;
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
    /// The MurmurHash3 64-bit finalizer, used to spread consecutive tickets
    /// over the waiting array.
    const fn mix64(mut x: u64) -> u64 {
        x ^= x >> 33;
        x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
        x ^= x >> 33;
        x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        x ^= x >> 33;
        x
    }

    /// Maps a ticket to its slot of the waiting array.
    const fn slot_index(ticket: u64) -> usize {
        (Self::mix64(ticket) as usize) & (WAIT_SLOTS - 1)
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
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::twa::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// *mutex.lock() = 10;
    ///
    /// assert_eq!(*mutex.lock(), 10);
    /// ```
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        let ticket = self.next_ticket.fetch_add(1, Relaxed);
        let mut grant = self.grant.load(Acquire);
        if grant != ticket {
            let slot = &self.waiting[Self::slot_index(ticket)];
            let mut sequence = slot.load(Relaxed);
            let mut relax = R::new();
            // Distance is computed with wrapping arithmetic; tickets cannot
            // plausibly lap a 64-bit counter.
            while ticket.wrapping_sub(grant) > LONG_TERM_THRESHOLD {
                // Sleep on the hashed slot until a release bumps it. A hash
                // collision wakes us spuriously; the outer loop re-checks the
                // grant and goes back to sleep on a refreshed sequence.
                while slot.load(Acquire) == sequence {
                    relax.relax();
                    grant = self.grant.load(Acquire);
                    if ticket.wrapping_sub(grant) <= LONG_TERM_THRESHOLD {
                        break;
                    }
                }
                sequence = slot.load(Relaxed);
                grant = self.grant.load(Acquire);
            }
            // Near-term: poll the grant counter directly.
            while grant != ticket {
                relax.relax();
                grant = self.grant.load(Acquire);
            }
        }
        MutexGuard::new(self, ticket)
    }

    /// Acquires this mutex and then runs the closure against its guard.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::twa::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// mutex.lock_with(|mut guard| *guard = 10);
    /// assert_eq!(mutex.lock_with(|guard| *guard), 10);
    /// ```
    ///
    /// Borrows of the guard or its data cannot escape the given closure.
    ///
    /// ```compile_fail,E0515
    /// use queuelock::twa::spins::Mutex;
    ///
    /// let mutex = Mutex::new(1);
    /// let data = mutex.lock_with(|guard| &*guard);
    /// ```
    #[inline]
    pub fn lock_with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(MutexGuard<'_, T, R>) -> Ret,
    {
        f(self.lock())
    }

    /// Unlocks this mutex: admits the next ticket and bumps the waiting
    /// array slot of the ticket that just became near-term.
    fn unlock(&self, ticket: u64) {
        let granted = ticket.wrapping_add(1);
        self.grant.store(granted, Release);

        let wake = granted.wrapping_add(LONG_TERM_THRESHOLD);
        self.waiting[Self::slot_index(wake)].fetch_add(1, Relaxed);
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
    /// use queuelock::twa::spins::Mutex;
    ///
    /// let mut mutex = Mutex::new(0);
    /// *mutex.get_mut() = 10;
    ///
    /// assert_eq!(*mutex.lock(), 10);
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
        let mut d = f.debug_struct("Mutex");
        self.lock().with(|data| d.field("data", &data));
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
/// The guard carries the acquisition's ticket; dropping the guard admits the
/// next ticket in line.
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
    ticket: u64,
}

// Same unsafe Sync impl as `std::sync::MutexGuard`.
unsafe impl<T: ?Sized + Sync, R: Relax> Sync for MutexGuard<'_, T, R> {}

impl<'a, T: ?Sized, R: Relax> MutexGuard<'a, T, R> {
    /// Creates a new `MutexGuard` instance.
    const fn new(lock: &'a Mutex<T, R>, ticket: u64) -> Self {
        Self { lock, ticket }
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
        self.lock.unlock(self.ticket);
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
    use crate::test::tests;
    use crate::twa::yields::Mutex;

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
    fn counters_advance_in_lockstep() {
        use core::sync::atomic::Ordering::Relaxed;

        const ITERS: u64 = 100;

        let mutex = Mutex::new(());
        for _ in 0..ITERS {
            drop(mutex.lock());
        }
        assert_eq!(mutex.next_ticket.load(Relaxed), ITERS);
        assert_eq!(mutex.grant.load(Relaxed), ITERS);
    }

    #[test]
    fn grant_is_monotone_and_bounded() {
        use std::sync::atomic::Ordering::Acquire;
        use std::sync::mpsc::channel;
        use std::sync::Arc;
        use std::thread;

        const THREADS: u64 = 4;
        const ITERS: u64 = 10_000;

        let mutex = Arc::new(Mutex::new(0_u64));

        let sampler = thread::spawn({
            let mutex = Arc::clone(&mutex);
            move || {
                let mut last = 0;
                while last < THREADS * ITERS {
                    let grant = mutex.grant.load(Acquire);
                    let tickets = mutex.next_ticket.load(Acquire);
                    assert!(grant >= last);
                    assert!(grant <= tickets);
                    last = grant;
                }
            }
        });

        let (tx, rx) = channel();
        for _ in 0..THREADS {
            let mutex = Arc::clone(&mutex);
            let tx = tx.clone();
            thread::spawn(move || {
                for _ in 0..ITERS {
                    *mutex.lock() += 1;
                }
                tx.send(()).unwrap();
            });
        }

        drop(tx);
        for _ in 0..THREADS {
            rx.recv().unwrap();
        }
        sampler.join().unwrap();
        assert_eq!(*mutex.lock(), THREADS * ITERS);
    }

    #[test]
    fn tickets_are_granted_in_draw_order() {
        use std::sync::atomic::Ordering::Relaxed;
        use std::sync::{Arc, Mutex as StdMutex};
        use std::thread;
        use std::vec::Vec;

        let mutex = Arc::new(Mutex::new(()));
        let order = Arc::new(StdMutex::new(Vec::new()));

        let guard = mutex.lock();

        let spawn_waiter = |id: u8, expected_tickets: u64| {
            let handle = thread::spawn({
                let mutex = Arc::clone(&mutex);
                let order = Arc::clone(&order);
                move || {
                    let _guard = mutex.lock();
                    order.lock().unwrap().push(id);
                }
            });
            // The spawned thread holds a ticket once the counter advances.
            while mutex.next_ticket.load(Relaxed) < expected_tickets {
                thread::yield_now();
            }
            handle
        };

        let first = spawn_waiter(1, 2);
        let second = spawn_waiter(2, 3);

        drop(guard);
        first.join().unwrap();
        second.join().unwrap();

        assert_eq!(*order.lock().unwrap(), [1, 2]);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;
    use crate::twa::yields::Mutex;

    #[test]
    fn lock_join() {
        models::lock_join::<Mutex<_>>();
    }
}
