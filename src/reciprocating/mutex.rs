use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::AtomicPtr;
use crate::cfg::cell::{UnsafeCell, WithUnchecked};
use crate::relax::Relax;

/// The wait element proper. A waiter spins on its own `gate` until the
/// current holder (or a draining releaser) stores a non-null end-of-segment
/// value into it.
#[derive(Debug)]
struct Element {
    gate: AtomicPtr<Element>,
}

impl Element {
    /// Creates a new wait element with a closed gate.
    #[cfg(not(all(loom, test)))]
    const fn new() -> Self {
        Self { gate: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Creates a new, Loom based wait element (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    fn new() -> Self {
        Self { gate: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Returns a raw mutable pointer of this element.
    fn as_ptr(&self) -> *mut Self {
        (self as *const Self).cast_mut()
    }
}

/// The reserved `arrivals` value encoding "locked, no waiters queued".
///
/// Elements are word aligned, so bit 0 of a real element address is always
/// clear and the all-but-tag mask of this sentinel is null.
const LOCKED_EMPTY: *mut Element = 1 as *mut Element;

/// Strips the sentinel tag bit, mapping `LOCKED_EMPTY` to null and leaving
/// real element addresses unchanged.
fn untagged(ptr: *mut Element) -> *mut Element {
    (ptr as usize & !1) as *mut Element
}

/// A locally-accessible wait element for joining the arrival stack.
///
/// `MutexNode` is an opaque type that holds the wait element required to
/// acquire a [`Mutex`]. The element must be reachable and mutably borrowed
/// for the duration of some associated [`MutexGuard`]. Once the guard is
/// dropped, a node instance can be reused as the backing allocation for
/// another lock acquisition. See the [`lock`] method on [`Mutex`].
///
/// [`lock`]: Mutex::lock
#[derive(Debug)]
pub struct MutexNode {
    inner: CachePadded<Element>,
}

impl MutexNode {
    /// Creates new `MutexNode` instance.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::reciprocating::MutexNode;
    ///
    /// let node = MutexNode::new();
    /// ```
    #[cfg(not(all(loom, test)))]
    #[must_use]
    #[inline(always)]
    pub const fn new() -> Self {
        Self { inner: CachePadded::new(Element::new()) }
    }

    /// Creates new, Loom based `MutexNode` instance (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn new() -> Self {
        Self { inner: CachePadded::new(Element::new()) }
    }

    /// Closes the gate and returns a shared reference to the inner element.
    ///
    /// Must be called before every arrival, since the previous acquisition
    /// left the gate holding its end-of-segment value.
    fn reset(&mut self) -> &Element {
        self.inner.gate.store(ptr::null_mut(), Relaxed);
        &self.inner
    }
}

impl Default for MutexNode {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

/// A mutual exclusion primitive implementing the reciprocating lock
/// protocol, useful for protecting shared data.
///
/// The entire lock state lives in one atomic word that also serves as the
/// LIFO stack of arrivals. Waiters that arrive during one holder's tenure are
/// served newest-first; across tenures, service is FIFO, which bounds any
/// waiter's delay by two rounds of its rivals.
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
/// use queuelock::reciprocating::{spins::Mutex, MutexNode};
///
/// let mutex = Arc::new(Mutex::new(0));
/// let c_mutex = Arc::clone(&mutex);
///
/// thread::spawn(move || {
///     // A wait element must be mutably accessible.
///     let mut node = MutexNode::new();
///     *c_mutex.lock(&mut node) = 10;
/// })
/// .join().expect("thread::spawn failed");
///
/// let mut node = MutexNode::new();
/// assert_eq!(*mutex.lock(&mut node), 10);
/// ```
/// [`lock`]: Mutex::lock
pub struct Mutex<T: ?Sized, R> {
    /// Encoding: null = unlocked; [`LOCKED_EMPTY`] = locked, no waiters;
    /// anything else = locked, with the newest arrival's element as the
    /// stack head.
    arrivals: CachePadded<AtomicPtr<Element>>,
    marker: PhantomData<R>,
    data: UnsafeCell<T>,
}

// Same unsafe impls as `std::sync::Mutex`.
unsafe impl<T: ?Sized + Send, R> Send for Mutex<T, R> {}
unsafe impl<T: ?Sized + Send, R> Sync for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    /// Creates a new mutex in an unlocked state ready for use.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::reciprocating::Mutex;
    /// use queuelock::relax::Spin;
    ///
    /// type SpinMutex<T> = Mutex<T, Spin>;
    ///
    /// const MUTEX: SpinMutex<i32> = SpinMutex::new(0);
    /// let mutex = SpinMutex::new(0);
    /// ```
    #[cfg(not(all(loom, test)))]
    #[inline]
    pub const fn new(value: T) -> Self {
        let arrivals = CachePadded::new(AtomicPtr::new(ptr::null_mut()));
        let data = UnsafeCell::new(value);
        Self { arrivals, data, marker: PhantomData }
    }

    /// Creates a new unlocked mutex with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub(crate) fn new(value: T) -> Self {
        let arrivals = CachePadded::new(AtomicPtr::new(ptr::null_mut()));
        let data = UnsafeCell::new(value);
        Self { arrivals, data, marker: PhantomData }
    }

    /// Consumes this mutex, returning the underlying data.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::reciprocating::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// assert_eq!(mutex.into_inner(), 0);
    /// ```
    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized, R: Relax> Mutex<T, R> {
    /// Acquires this mutex, blocking the current thread until it is able to
    /// do so.
    ///
    /// This function will block the local thread until it is available to
    /// acquire the mutex. Upon returning, the thread is the only thread with
    /// the lock held. An RAII guard is returned to allow scoped unlock of the
    /// lock. When the guard goes out of scope, the mutex will be unlocked. To
    /// acquire the lock, it's also required a mutably borrowed wait element,
    /// see [`MutexNode`].
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::reciprocating::{spins::Mutex, MutexNode};
    ///
    /// let mutex = Mutex::new(0);
    /// let mut node = MutexNode::new();
    /// *mutex.lock(&mut node) = 10;
    ///
    /// let mut node = MutexNode::new();
    /// assert_eq!(*mutex.lock(&mut node), 10);
    /// ```
    #[inline]
    pub fn lock<'a>(&'a self, node: &'a mut MutexNode) -> MutexGuard<'a, T, R> {
        let element = node.reset();
        let this = element.as_ptr();

        // Fast-path assumption: no holder, our own element marks the end of
        // segment for the round we are about to open.
        let mut succ = ptr::null_mut();
        let mut eos = this;

        let prior = self.arrivals.swap(this, AcqRel);
        debug_assert!(prior != this);
        if !prior.is_null() {
            // The thread that installed `prior` is either the current holder
            // (sentinel) or an earlier waiter of this segment.
            succ = untagged(prior);
            debug_assert!(succ != this);

            let mut relax = R::new();
            loop {
                eos = element.gate.load(Acquire);
                if !eos.is_null() {
                    break;
                }
                relax.relax();
            }

            debug_assert!(eos != this);
            if succ == eos {
                // We are the last waiter of our segment: nobody is left to
                // hand off to, so release must treat the lock as held-empty.
                succ = ptr::null_mut();
                eos = LOCKED_EMPTY;
            }
        }

        debug_assert!(!eos.is_null());
        MutexGuard::new(self, element, succ, eos)
    }

    /// Acquires this mutex and then runs the closure against its guard.
    ///
    /// This function instantiates a [`MutexNode`] for each call, which is
    /// convenient for one-liners but not particularly efficient on hot paths.
    /// If that is your use case, consider calling [`lock`] in the busy loop
    /// while reusing one single node allocation.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::reciprocating::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// mutex.lock_with(|mut guard| *guard = 10);
    /// assert_eq!(mutex.lock_with(|guard| *guard), 10);
    /// ```
    ///
    /// Borrows of the guard or its data cannot escape the given closure.
    ///
    /// ```compile_fail,E0515
    /// use queuelock::reciprocating::spins::Mutex;
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
        let mut node = MutexNode::new();
        f(self.lock(&mut node))
    }

    /// Unlocks this mutex: hands the lock to the known successor, or closes
    /// the round, draining any waiters that arrived during release.
    fn unlock(&self, element: &Element, succ: *mut Element, eos: *mut Element) {
        debug_assert!(!eos.is_null());

        if !succ.is_null() {
            debug_assert!(eos != element.as_ptr());
            // SAFETY: The successor registered itself during our tenure and
            // is still spinning on its gate, so its element is live.
            unsafe { &*succ }.gate.store(eos, Release);
            return;
        }

        // No known successor: either we came in uncontended (eos is our own
        // element) or we were the last of our segment (eos is the sentinel).
        // In both cases `arrivals` still holds eos unless someone arrived.
        debug_assert!(eos == LOCKED_EMPTY || eos == element.as_ptr());
        if self.arrivals.compare_exchange(eos, ptr::null_mut(), AcqRel, Acquire).is_ok() {
            return;
        }

        // A new waiter arrived during release: drain the stack, handing the
        // lock to its top and seeding the next round as held-empty.
        let top = self.arrivals.swap(LOCKED_EMPTY, AcqRel);
        debug_assert!(!top.is_null() && top != LOCKED_EMPTY && top != element.as_ptr());
        // SAFETY: The stack top is a waiter spinning on its gate, so its
        // element is live.
        unsafe { &*top }.gate.store(eos, Release);
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
    /// use queuelock::reciprocating::{spins::Mutex, MutexNode};
    ///
    /// let mut mutex = Mutex::new(0);
    /// *mutex.get_mut() = 10;
    ///
    /// let mut node = MutexNode::new();
    /// assert_eq!(*mutex.lock(&mut node), 10);
    /// ```
    #[cfg(not(all(loom, test)))]
    #[inline(always)]
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: We hold exclusive access to the Mutex data.
        unsafe { &mut *self.data.get() }
    }
}

impl<T: ?Sized + Default, R> Default for Mutex<T, R> {
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
        let mut node = MutexNode::new();
        let mut d = f.debug_struct("Mutex");
        self.lock(&mut node).with(|data| d.field("data", &data));
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
/// The guard carries the handoff state of this acquisition: the successor to
/// hand the lock to (if any is known) and the end-of-segment marker threaded
/// through the waiter chain.
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
    element: &'a Element,
    succ: *mut Element,
    eos: *mut Element,
}

// Same unsafe Sync impl as `std::sync::MutexGuard`.
unsafe impl<T: ?Sized + Sync, R: Relax> Sync for MutexGuard<'_, T, R> {}

impl<'a, T: ?Sized, R: Relax> MutexGuard<'a, T, R> {
    /// Creates a new `MutexGuard` instance.
    const fn new(
        lock: &'a Mutex<T, R>,
        element: &'a Element,
        succ: *mut Element,
        eos: *mut Element,
    ) -> Self {
        Self { lock, element, succ, eos }
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
        self.lock.unlock(self.element, self.succ, self.eos);
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
    use crate::reciprocating::yields::Mutex;
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
    fn arrivals_word_tracks_lock_state() {
        use super::{MutexNode, LOCKED_EMPTY};
        use core::sync::atomic::Ordering::Relaxed;

        let mutex = Mutex::new(());
        assert!(mutex.arrivals.load(Relaxed).is_null());

        let mut node = MutexNode::new();
        let guard = mutex.lock(&mut node);
        assert!(!mutex.arrivals.load(Relaxed).is_null());
        drop(guard);

        assert!(mutex.arrivals.load(Relaxed).is_null());

        // The sentinel is parked only while the lock is held; an immediate
        // reacquisition starts from the unlocked encoding again.
        let guard = mutex.lock(&mut node);
        assert_ne!(mutex.arrivals.load(Relaxed), LOCKED_EMPTY);
        drop(guard);
        assert!(mutex.arrivals.load(Relaxed).is_null());
    }

    #[test]
    fn waiters_within_a_segment_are_served_newest_first() {
        use super::{MutexNode, LOCKED_EMPTY};
        use core::sync::atomic::Ordering::Relaxed;
        use std::sync::{Arc, Mutex as StdMutex};
        use std::thread;
        use std::vec::Vec;

        let mutex = Arc::new(Mutex::new(()));
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut node = MutexNode::new();
        let guard = mutex.lock(&mut node);

        let spawn_waiter = |id: u8| {
            let mutex = Arc::clone(&mutex);
            let order = Arc::clone(&order);
            let before = mutex.arrivals.load(Relaxed);
            let thread_mutex = Arc::clone(&mutex);
            let handle = thread::spawn(move || {
                let mut node = MutexNode::new();
                let _guard = thread_mutex.lock(&mut node);
                order.lock().unwrap().push(id);
            });
            // The arrival stack head changes once the waiter has pushed
            // itself; only then may the next waiter be spawned.
            while mutex.arrivals.load(Relaxed) == before {
                thread::yield_now();
            }
            handle
        };

        let first = spawn_waiter(1);
        let second = spawn_waiter(2);
        assert_ne!(mutex.arrivals.load(Relaxed), LOCKED_EMPTY);

        drop(guard);
        first.join().unwrap();
        second.join().unwrap();

        // Both arrived during the holder's tenure: one segment, LIFO.
        assert_eq!(*order.lock().unwrap(), [2, 1]);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;
    use crate::reciprocating::yields::Mutex;

    #[test]
    fn lock_join() {
        models::lock_join::<Mutex<_>>();
    }
}
