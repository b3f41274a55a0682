use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::{fence, AtomicBool, AtomicPtr};
use crate::cfg::cell::{UnsafeCell, WithUnchecked};
use crate::relax::Relax;

/// The actual queue record. Each waiter spins on the `locked` flag of its own
/// record, and a releasing thread reaches its successor through `next`.
#[derive(Debug)]
struct Node {
    next: AtomicPtr<Node>,
    locked: AtomicBool,
}

impl Node {
    /// Creates a new queue record, detached and marked as locked.
    #[cfg(not(all(loom, test)))]
    const fn new() -> Self {
        let next = AtomicPtr::new(ptr::null_mut());
        let locked = AtomicBool::new(true);
        Self { next, locked }
    }

    /// Creates a new, Loom based queue record (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    fn new() -> Self {
        let next = AtomicPtr::new(ptr::null_mut());
        let locked = AtomicBool::new(true);
        Self { next, locked }
    }

    /// Returns a raw mutable pointer of this record.
    fn as_ptr(&self) -> *mut Self {
        (self as *const Self).cast_mut()
    }
}

/// A locally-accessible record for forming the waiting queue.
///
/// `MutexNode` is an opaque type that holds metadata for the [`Mutex`]'s
/// waiting queue. To acquire a MCS lock, an instance of queue node must be
/// reachable and mutably borrowed for the duration of some associated
/// [`MutexGuard`]. Once the guard is dropped, a node instance can be reused
/// as the backing allocation for another lock acquisition. See [`lock`] and
/// [`try_lock`] methods on [`Mutex`].
///
/// The queue record is padded to occupy a full cache line, so that waiters
/// spinning on distinct nodes do not interfere with each other.
///
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
#[derive(Debug)]
pub struct MutexNode {
    inner: CachePadded<Node>,
}

impl MutexNode {
    /// Creates new `MutexNode` instance.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::mcs::MutexNode;
    ///
    /// let node = MutexNode::new();
    /// ```
    #[cfg(not(all(loom, test)))]
    #[must_use]
    #[inline(always)]
    pub const fn new() -> Self {
        Self { inner: CachePadded::new(Node::new()) }
    }

    /// Creates new, Loom based `MutexNode` instance (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn new() -> Self {
        Self { inner: CachePadded::new(Node::new()) }
    }

    /// Resets this node to the detached, locked state and returns a shared
    /// reference to the inner record.
    ///
    /// Must be called before every enqueue attempt, since the previous
    /// acquisition may have left both fields set.
    fn reset(&mut self) -> &Node {
        self.inner.next.store(ptr::null_mut(), Relaxed);
        self.inner.locked.store(true, Relaxed);
        &self.inner
    }
}

impl Default for MutexNode {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

/// A mutual exclusion primitive implementing the MCS lock protocol, useful
/// for protecting shared data.
///
/// This mutex will block threads waiting for the lock to become available.
/// The mutex can also be statically initialized or created via a [`new`]
/// constructor. Each mutex has a type parameter which represents the data
/// that it is protecting. The data can only be accessed through the RAII
/// guards returned from [`lock`] and [`try_lock`], which guarantees that the
/// data is only ever accessed when the mutex is locked.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use queuelock::mcs::{Mutex, MutexNode};
/// use queuelock::relax::Spin;
///
/// type SpinMutex<T> = Mutex<T, Spin>;
///
/// let mutex = Arc::new(SpinMutex::new(0));
/// let c_mutex = Arc::clone(&mutex);
///
/// thread::spawn(move || {
///     // A queue node must be mutably accessible.
///     let mut node = MutexNode::new();
///     *c_mutex.lock(&mut node) = 10;
/// })
/// .join().expect("thread::spawn failed");
///
/// let mut node = MutexNode::new();
/// assert_eq!(*mutex.lock(&mut node), 10);
/// ```
/// [`new`]: Mutex::new
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
pub struct Mutex<T: ?Sized, R> {
    tail: CachePadded<AtomicPtr<Node>>,
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
    /// use queuelock::mcs::Mutex;
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
        let tail = CachePadded::new(AtomicPtr::new(ptr::null_mut()));
        let data = UnsafeCell::new(value);
        Self { tail, data, marker: PhantomData }
    }

    /// Creates a new unlocked mutex with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub(crate) fn new(value: T) -> Self {
        let tail = CachePadded::new(AtomicPtr::new(ptr::null_mut()));
        let data = UnsafeCell::new(value);
        Self { tail, data, marker: PhantomData }
    }

    /// Consumes this mutex, returning the underlying data.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::mcs::Mutex;
    /// use queuelock::relax::Spin;
    ///
    /// type SpinMutex<T> = Mutex<T, Spin>;
    ///
    /// let mutex = SpinMutex::new(0);
    /// assert_eq!(mutex.into_inner(), 0);
    /// ```
    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized, R: Relax> Mutex<T, R> {
    /// Attempts to acquire this mutex without blocking the thread.
    ///
    /// If the lock could not be acquired at this time, then [`None`] is
    /// returned. Otherwise, an RAII guard is returned. The lock will be
    /// unlocked when the guard is dropped. To acquire a MCS lock, it's also
    /// required a mutably borrowed queue node, see [`MutexNode`].
    ///
    /// This function does not block.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::mcs::{spins::Mutex, MutexNode};
    ///
    /// let mutex = Mutex::new(0);
    /// let mut node = MutexNode::new();
    ///
    /// if let Some(mut guard) = mutex.try_lock(&mut node) {
    ///     *guard = 10;
    /// }
    ///
    /// let mut node = MutexNode::new();
    /// assert_eq!(*mutex.lock(&mut node), 10);
    /// ```
    #[inline]
    pub fn try_lock<'a>(&'a self, node: &'a mut MutexNode) -> Option<MutexGuard<'a, T, R>> {
        let node = node.reset();
        self.tail
            .compare_exchange(ptr::null_mut(), node.as_ptr(), AcqRel, Relaxed)
            .map(|_| MutexGuard::new(self, node))
            .ok()
    }

    /// Acquires this mutex, blocking the current thread until it is able to
    /// do so.
    ///
    /// This function will block the local thread until it is available to
    /// acquire the mutex. Upon returning, the thread is the only thread with
    /// the lock held. An RAII guard is returned to allow scoped unlock of the
    /// lock. When the guard goes out of scope, the mutex will be unlocked. To
    /// acquire a MCS lock, it's also required a mutably borrowed queue node,
    /// see [`MutexNode`].
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::mcs::{spins::Mutex, MutexNode};
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
        let node = node.reset();
        let pred = self.tail.swap(node.as_ptr(), AcqRel);
        // If we have a predecessor, complete the link so it will notify us.
        if !pred.is_null() {
            // SAFETY: Already verified that our predecessor is not null, and
            // it cannot be dequeued while its `next` link is still unset.
            unsafe { &*pred }.next.store(node.as_ptr(), Release);
            let mut relax = R::new();
            while node.locked.load(Relaxed) {
                relax.relax();
            }
            fence(Acquire);
        }
        MutexGuard::new(self, node)
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
    /// use queuelock::mcs::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// mutex.lock_with(|mut guard| *guard = 10);
    /// assert_eq!(mutex.lock_with(|guard| *guard), 10);
    /// ```
    ///
    /// Borrows of the guard or its data cannot escape the given closure.
    ///
    /// ```compile_fail,E0515
    /// use queuelock::mcs::spins::Mutex;
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

    /// Unlocks this mutex. If there is a successor node in the queue, the
    /// lock is passed directly to it.
    fn unlock(&self, node: &Node) {
        let mut next = node.next.load(Relaxed);
        // If we don't have a known successor currently,
        if next.is_null() {
            // and we are the tail, then dequeue and free the lock.
            let false = self.try_unlock(node.as_ptr()) else { return };
            // But if we are not the tail, then we have a pending successor. We
            // must wait for it to finish linking with us.
            let mut relax = R::new();
            loop {
                next = node.next.load(Relaxed);
                let true = next.is_null() else { break };
                relax.relax();
            }
        }
        fence(Acquire);
        // SAFETY: We already verified that our successor is not null.
        unsafe { &*next }.locked.store(false, Release);
    }
}

impl<T: ?Sized, R> Mutex<T, R> {
    /// Returns `true` if the lock is currently held.
    ///
    /// This method does not provide any synchronization guarantees, so its
    /// only useful as a heuristic, and so must be considered not up to date.
    ///
    /// # Example
    ///
    /// ```
    /// use queuelock::mcs::{spins::Mutex, MutexNode};
    ///
    /// let mutex = Mutex::new(0);
    /// let mut node = MutexNode::new();
    ///
    /// let guard = mutex.lock(&mut node);
    /// drop(guard);
    ///
    /// assert_eq!(mutex.is_locked(), false);
    /// ```
    #[inline]
    pub fn is_locked(&self) -> bool {
        // Relaxed is sufficient because this method only guarantees atomicity.
        !self.tail.load(Relaxed).is_null()
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the `Mutex` mutably, no actual locking needs
    /// to take place - the mutable borrow statically guarantees no locks
    /// exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::mcs::{spins::Mutex, MutexNode};
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

    /// Unlocks the lock if the candidate node is the queue's tail.
    fn try_unlock(&self, node: *mut Node) -> bool {
        self.tail.compare_exchange(node, ptr::null_mut(), AcqRel, Acquire).is_ok()
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
        match self.try_lock(&mut node) {
            Some(guard) => guard.with(|data| d.field("data", &data)),
            None => d.field("data", &format_args!("<locked>")),
        };
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
/// The data protected by the mutex can be access through this guard via its
/// [`Deref`] and [`DerefMut`] implementations.
///
/// This structure is returned by [`lock`] and [`try_lock`] methods on
/// [`Mutex`]. It is also given as closure argument by the [`lock_with`]
/// method.
///
/// [`Deref`]: core::ops::Deref
/// [`DerefMut`]: core::ops::DerefMut
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
/// [`lock_with`]: Mutex::lock_with
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized, R: Relax> {
    lock: &'a Mutex<T, R>,
    node: &'a Node,
}

// Same unsafe Sync impl as `std::sync::MutexGuard`.
unsafe impl<T: ?Sized + Sync, R: Relax> Sync for MutexGuard<'_, T, R> {}

impl<'a, T: ?Sized, R: Relax> MutexGuard<'a, T, R> {
    /// Creates a new `MutexGuard` instance.
    const fn new(lock: &'a Mutex<T, R>, node: &'a Node) -> Self {
        Self { lock, node }
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
        self.lock.unlock(self.node);
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
    use crate::mcs::yields::Mutex;
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
    fn try_lock() {
        use super::MutexNode;

        let mutex = Mutex::new(());
        let mut node = MutexNode::new();
        *mutex.try_lock(&mut node).unwrap() = ();
    }

    #[test]
    fn try_lock_fails_when_held() {
        use super::MutexNode;

        let mutex = Mutex::new(0);
        let mut node1 = MutexNode::new();
        let mut node2 = MutexNode::new();

        let guard = mutex.lock(&mut node1);
        assert!(mutex.try_lock(&mut node2).is_none());
        assert!(mutex.is_locked());
        drop(guard);

        assert!(mutex.try_lock(&mut node2).is_some());
    }

    #[test]
    fn test_into_inner() {
        #[derive(Eq, PartialEq, Debug)]
        struct NonCopy(i32);

        let mutex = Mutex::new(NonCopy(10));
        assert_eq!(mutex.into_inner(), NonCopy(10));
    }

    #[test]
    fn waiters_enter_in_arrival_order() {
        use super::MutexNode;
        use core::sync::atomic::Ordering::Relaxed;
        use std::sync::{Arc, Mutex as StdMutex};
        use std::thread;
        use std::vec::Vec;

        let mutex = Arc::new(Mutex::new(()));
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut node = MutexNode::new();
        let guard = mutex.lock(&mut node);

        let spawn_waiter = |id: u8| {
            let before = mutex.tail.load(Relaxed);
            let handle = thread::spawn({
                let mutex = Arc::clone(&mutex);
                let order = Arc::clone(&order);
                move || {
                    let mut node = MutexNode::new();
                    let _guard = mutex.lock(&mut node);
                    order.lock().unwrap().push(id);
                }
            });
            // The tail moves once the waiter has exchanged itself in; only
            // then may the next waiter be spawned.
            while mutex.tail.load(Relaxed) == before {
                thread::yield_now();
            }
            handle
        };

        let first = spawn_waiter(1);
        let second = spawn_waiter(2);
        let third = spawn_waiter(3);

        drop(guard);
        first.join().unwrap();
        second.join().unwrap();
        third.join().unwrap();

        assert_eq!(*order.lock().unwrap(), [1, 2, 3]);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;
    use crate::mcs::yields::Mutex;

    #[test]
    fn lock_join() {
        models::lock_join::<Mutex<_>>();
    }
}
