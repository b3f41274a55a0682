use alloc::boxed::Box;

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::{fence, AtomicBool, AtomicPtr};
use crate::cfg::cell::{UnsafeCell, WithUnchecked};
use crate::relax::Relax;

/// The heap allocated queue cell.
///
/// The `lock` flag is polled by the cell's successor, while `prev` is only
/// ever accessed by the thread that currently owns the cell, so it does not
/// need to be atomic.
#[derive(Debug)]
struct Node {
    lock: AtomicBool,
    prev: Cell<NodePtr>,
}

/// A raw pointer to a heap allocated, cache padded queue cell.
type NodePtr = *mut CachePadded<Node>;

impl Node {
    /// Creates a new cell with the given lock state.
    fn new(locked: bool) -> Self {
        let lock = AtomicBool::new(locked);
        let prev = Cell::new(ptr::null_mut());
        Self { lock, prev }
    }

    /// Creates a new, heap allocated and cache padded cell, returning a
    /// leaked, raw pointer to it.
    ///
    /// Caller is responsible for freeing the cell.
    fn alloc(locked: bool) -> NodePtr {
        Box::into_raw(Box::new(CachePadded::new(Self::new(locked))))
    }
}

/// A locally-accessible handle to a heap allocated cell for forming the
/// waiting queue.
///
/// `MutexNode` is an opaque type that manages the queue cell required by the
/// [`Mutex`]'s waiting queue. To acquire a CLH lock, an instance of a node
/// handle must be mutably borrowed for the duration of some associated
/// [`MutexGuard`]. Once the guard is dropped, the handle points at a
/// *different* cell - the one its predecessor surrendered - and can be reused
/// for the next acquisition. See the [`lock`] method on [`Mutex`].
///
/// [`lock`]: Mutex::lock
#[derive(Debug)]
pub struct MutexNode {
    inner: NonNull<CachePadded<Node>>,
}

// SAFETY: Public APIs that mutate state require exclusive references.
unsafe impl Send for MutexNode {}
unsafe impl Sync for MutexNode {}

impl MutexNode {
    /// Creates new `MutexNode` instance.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::clh::MutexNode;
    ///
    /// let node = MutexNode::new();
    /// ```
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        // SAFETY: `Node::alloc` returns a `Box` allocation, which is non-null.
        Self { inner: unsafe { NonNull::new_unchecked(Node::alloc(true)) } }
    }

    /// Replaces the cell this handle owns.
    ///
    /// The previously owned allocation is not freed; ownership of it has been
    /// surrendered to a successor (or to the lock's tail).
    ///
    /// # Safety
    ///
    /// The pointer is required to be non-null, it must have been allocated
    /// by [`Node::alloc`], and no other handle may own it.
    unsafe fn replace(&mut self, ptr: NodePtr) {
        // SAFETY: Caller guaranteed that `ptr` is non-null.
        self.inner = unsafe { NonNull::new_unchecked(ptr) };
    }
}

impl Default for MutexNode {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MutexNode {
    fn drop(&mut self) {
        // SAFETY: The allocation was created through the Box API, the handle
        // is the sole owner of its current cell, and drop runs at most once.
        drop(unsafe { Box::from_raw(self.inner.as_ptr()) });
    }
}

/// A mutual exclusion primitive implementing the CLH lock protocol, useful
/// for protecting shared data.
///
/// This mutex will block threads waiting for the lock to become available.
/// Each mutex has a type parameter which represents the data that it is
/// protecting. The data can only be accessed through the RAII guards returned
/// by the [`lock`] method, which guarantees that the data is only ever
/// accessed when the mutex is locked.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use queuelock::clh::{spins::Mutex, MutexNode};
///
/// let mutex = Arc::new(Mutex::new(0));
/// let c_mutex = Arc::clone(&mutex);
///
/// thread::spawn(move || {
///     // A queue node handle must be mutably accessible.
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
    tail: CachePadded<AtomicPtr<CachePadded<Node>>>,
    marker: PhantomData<R>,
    data: UnsafeCell<T>,
}

// Same unsafe impls as `std::sync::Mutex`.
unsafe impl<T: ?Sized + Send, R> Send for Mutex<T, R> {}
unsafe impl<T: ?Sized + Send, R> Sync for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    /// Creates a new mutex in an unlocked state ready for use.
    ///
    /// The constructor allocates the queue's sentinel cell, which the first
    /// acquiring thread will observe as its unlocked predecessor.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::clh::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// ```
    #[inline]
    pub fn new(value: T) -> Self {
        let tail = CachePadded::new(AtomicPtr::new(Node::alloc(false)));
        let data = UnsafeCell::new(value);
        Self { tail, data, marker: PhantomData }
    }
}

impl<T: ?Sized, R: Relax> Mutex<T, R> {
    /// Acquires this mutex, blocking the current thread until it is able to
    /// do so.
    ///
    /// This function will block the local thread until it is available to
    /// acquire the mutex. Upon returning, the thread is the only thread with
    /// the lock held. An RAII guard is returned to allow scoped unlock of the
    /// lock. When the guard goes out of scope, the mutex will be unlocked and
    /// the node handle will have adopted the predecessor's cell.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::clh::{spins::Mutex, MutexNode};
    ///
    /// let mutex = Mutex::new(0);
    /// let mut node = MutexNode::new();
    /// *mutex.lock(&mut node) = 10;
    ///
    /// assert_eq!(*mutex.lock(&mut node), 10);
    /// ```
    #[inline]
    pub fn lock<'a>(&'a self, node: &'a mut MutexNode) -> MutexGuard<'a, T, R> {
        let my = node.inner.as_ptr();
        // SAFETY: The handle owns its cell exclusively until it is enqueued,
        // and a just-enqueued cell is only polled, never written, by others.
        unsafe { &**my }.lock.store(true, Relaxed);
        let pred = self.tail.swap(my, AcqRel);
        // SAFETY: The tail is never null: it is initialized with the sentinel
        // allocation and all updates store valid cell pointers.
        unsafe { &**my }.prev.set(pred);
        let mut relax = R::new();
        // SAFETY: The predecessor's cell is freed only by the handle that
        // adopts it, which cannot happen before this thread stops polling.
        while unsafe { &**pred }.lock.load(Relaxed) {
            relax.relax();
        }
        fence(Acquire);
        MutexGuard::new(self, node)
    }

    /// Acquires this mutex and then runs the closure against its guard.
    ///
    /// This function instantiates a [`MutexNode`] for each call, which is
    /// convenient for one-liners but not particularly efficient on hot paths.
    /// If that is your use case, consider calling [`lock`] in the busy loop
    /// while reusing one single node handle.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuelock::clh::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// mutex.lock_with(|mut guard| *guard = 10);
    /// assert_eq!(mutex.lock_with(|guard| *guard), 10);
    /// ```
    ///
    /// Borrows of the guard or its data cannot escape the given closure.
    ///
    /// ```compile_fail,E0515
    /// use queuelock::clh::spins::Mutex;
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
    /// use queuelock::clh::{spins::Mutex, MutexNode};
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

impl<T: ?Sized, R> Drop for Mutex<T, R> {
    fn drop(&mut self) {
        let tail = self.tail.load(Relaxed);
        // SAFETY: With the mutex dropped, no thread holds or waits, so the
        // cell left in the tail is owned by the lock alone: every node handle
        // owns the (distinct) cell it last adopted. Freed exactly once here.
        drop(unsafe { Box::from_raw(tail) });
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
/// is dropped (falls out of scope), the lock will be unlocked and the
/// borrowed node handle will own the predecessor's cell.
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
    node: &'a mut MutexNode,
}

// Same unsafe Sync impl as `std::sync::MutexGuard`.
unsafe impl<T: ?Sized + Sync, R: Relax> Sync for MutexGuard<'_, T, R> {}

impl<'a, T: ?Sized, R: Relax> MutexGuard<'a, T, R> {
    /// Creates a new `MutexGuard` instance.
    fn new(lock: &'a Mutex<T, R>, node: &'a mut MutexNode) -> Self {
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
        let my = self.node.inner.as_ptr();
        // The predecessor pointer must be read before the release store:
        // afterwards the cell may be adopted and reinitialized at any moment.
        // SAFETY: The guard still owns the cell until the store below.
        let pred = unsafe { &**my }.prev.get();
        unsafe { &**my }.lock.store(false, Release);
        // The cell that was `my` is now owned by whichever thread was polling
        // it (or by the lock's tail); the handle adopts `pred` in exchange.
        // SAFETY: `pred` came from the tail, so it is a valid cell allocation,
        // and its previous owner surrendered it by enqueueing behind it.
        unsafe { self.node.replace(pred) };
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
    use crate::clh::yields::Mutex;
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
    fn node_adopts_predecessor_cell() {
        use super::MutexNode;

        let mutex = Mutex::new(0);
        let mut node = MutexNode::new();

        let sentinel = mutex.tail.load(core::sync::atomic::Ordering::Relaxed);
        let mine = node.inner.as_ptr();

        drop(mutex.lock(&mut node));

        // Uncontended: the handle must have adopted the sentinel cell, while
        // our original cell became the queue's tail.
        assert_eq!(node.inner.as_ptr(), sentinel);
        assert_eq!(mutex.tail.load(core::sync::atomic::Ordering::Relaxed), mine);

        // A second acquisition swaps the two cells right back.
        drop(mutex.lock(&mut node));
        assert_eq!(node.inner.as_ptr(), mine);
        assert_eq!(mutex.tail.load(core::sync::atomic::Ordering::Relaxed), sentinel);
    }

    #[test]
    fn cell_pool_is_conserved() {
        use super::MutexNode;
        use std::collections::HashSet;
        use std::sync::mpsc::channel;
        use std::sync::Arc;
        use std::thread;

        const THREADS: usize = 4;
        const ITERS: usize = 1000;

        let mutex = Arc::new(Mutex::new(()));
        let initial = mutex.tail.load(core::sync::atomic::Ordering::Relaxed) as usize;

        let (tx, rx) = channel();
        for _ in 0..THREADS {
            let mutex = Arc::clone(&mutex);
            let tx = tx.clone();
            thread::spawn(move || {
                let mut node = MutexNode::new();
                let first = node.inner.as_ptr() as usize;
                for _ in 0..ITERS {
                    drop(mutex.lock(&mut node));
                }
                tx.send((first, node.inner.as_ptr() as usize)).unwrap();
            });
        }

        drop(tx);
        let mut pool: HashSet<usize> = HashSet::from([initial]);
        let mut current = std::vec::Vec::new();
        for (first, last) in rx.iter() {
            pool.insert(first);
            current.push(last);
        }
        current.push(mutex.tail.load(core::sync::atomic::Ordering::Relaxed) as usize);

        // Every cell in circulation at the end entered the pool at the start,
        // and no cell ended up owned twice.
        assert_eq!(current.len(), THREADS + 1);
        for cell in &current {
            assert!(pool.contains(cell));
        }
        let distinct: HashSet<usize> = current.iter().copied().collect();
        assert_eq!(distinct.len(), current.len());
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
            // The tail moves once the waiter has exchanged its cell in; only
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
    use crate::clh::yields::Mutex;
    use crate::loom::models;

    #[test]
    fn lock_join() {
        models::lock_join::<Mutex<_>>();
    }
}
