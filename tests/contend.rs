//! Contention scenarios shared by all lock implementations: a plain counter
//! protected by each lock must come out exact, from a single thread up to one
//! worker per hardware thread with work burned on both sides of the critical
//! section.

use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;

use once_cell::sync::Lazy;

use queuelock::{clh, hapax, mcs, reciprocating, twa};

/// A lock under test: how to build it, how to prepare one thread's session
/// state, and how to run one protected increment.
trait TestCase: Send + Sync + 'static {
    type Session;

    fn create() -> Self;
    fn session() -> Self::Session;
    fn bump(&self, session: &mut Self::Session, work: u64);
    fn read(&self) -> u64;
}

struct McsCase(mcs::spins::Mutex<u64>);

impl TestCase for McsCase {
    type Session = mcs::MutexNode;

    fn create() -> Self {
        Self(mcs::spins::Mutex::new(0))
    }

    fn session() -> Self::Session {
        mcs::MutexNode::new()
    }

    fn bump(&self, session: &mut Self::Session, work: u64) {
        let mut guard = self.0.lock(session);
        *guard += 1;
        burn(work);
    }

    fn read(&self) -> u64 {
        self.0.lock_with(|guard| *guard)
    }
}

struct ClhCase(clh::spins::Mutex<u64>);

impl TestCase for ClhCase {
    type Session = clh::MutexNode;

    fn create() -> Self {
        Self(clh::spins::Mutex::new(0))
    }

    fn session() -> Self::Session {
        clh::MutexNode::new()
    }

    fn bump(&self, session: &mut Self::Session, work: u64) {
        let mut guard = self.0.lock(session);
        *guard += 1;
        burn(work);
    }

    fn read(&self) -> u64 {
        self.0.lock_with(|guard| *guard)
    }
}

struct TwaCase(twa::spins::Mutex<u64>);

impl TestCase for TwaCase {
    type Session = ();

    fn create() -> Self {
        Self(twa::spins::Mutex::new(0))
    }

    fn session() -> Self::Session {}

    fn bump(&self, _session: &mut Self::Session, work: u64) {
        let mut guard = self.0.lock();
        *guard += 1;
        burn(work);
    }

    fn read(&self) -> u64 {
        *self.0.lock()
    }
}

struct ReciprocatingCase(reciprocating::spins::Mutex<u64>);

impl TestCase for ReciprocatingCase {
    type Session = reciprocating::MutexNode;

    fn create() -> Self {
        Self(reciprocating::spins::Mutex::new(0))
    }

    fn session() -> Self::Session {
        reciprocating::MutexNode::new()
    }

    fn bump(&self, session: &mut Self::Session, work: u64) {
        let mut guard = self.0.lock(session);
        *guard += 1;
        burn(work);
    }

    fn read(&self) -> u64 {
        self.0.lock_with(|guard| *guard)
    }
}

struct HapaxCase(hapax::spins::Mutex<u64>);

impl TestCase for HapaxCase {
    type Session = hapax::Tokens;

    fn create() -> Self {
        Self(hapax::spins::Mutex::new(0))
    }

    fn session() -> Self::Session {
        hapax::Tokens::new()
    }

    fn bump(&self, session: &mut Self::Session, work: u64) {
        let mut guard = self.0.lock(session);
        *guard += 1;
        burn(work);
    }

    fn read(&self) -> u64 {
        self.0.lock_with(|guard| *guard)
    }
}

/// Burns a few cycles through the same linear congruential step the
/// benchmark harness uses to simulate work.
fn burn(iters: u64) {
    let mut x = 0_u64;
    for i in 0..iters {
        x = x.wrapping_mul(1664525).wrapping_add(1013904223).wrapping_add(i);
    }
    std::hint::black_box(x);
}

fn single_thread<C: TestCase>(iters: u64) {
    let case = C::create();
    let mut session = C::session();
    for _ in 0..iters {
        case.bump(&mut session, 0);
    }
    assert_eq!(case.read(), iters);
}

fn herd<C: TestCase>(threads: usize, iters: u64, critical_burn: u64, outside_burn: u64) {
    let case = Arc::new(C::create());
    let (tx, rx) = channel();
    for _ in 0..threads {
        let case = Arc::clone(&case);
        let tx = tx.clone();
        thread::spawn(move || {
            let mut session = C::session();
            for _ in 0..iters {
                case.bump(&mut session, critical_burn);
                burn(outside_burn);
            }
            tx.send(()).unwrap();
        });
    }

    drop(tx);
    for _ in 0..threads {
        rx.recv().unwrap();
    }
    assert_eq!(case.read(), threads as u64 * iters);
}

fn n_cpus() -> usize {
    thread::available_parallelism().map_or(4, |n| n.get())
}

mod mcs_lock {
    use super::*;

    #[test]
    fn single_thread_million() {
        single_thread::<McsCase>(1_000_000);
    }

    #[test]
    fn two_threads() {
        herd::<McsCase>(2, 100_000, 0, 0);
    }

    #[test]
    fn one_thread_per_cpu() {
        herd::<McsCase>(n_cpus(), 20_000, 50, 50);
    }
}

mod clh_lock {
    use super::*;

    #[test]
    fn single_thread_million() {
        single_thread::<ClhCase>(1_000_000);
    }

    #[test]
    fn two_threads() {
        herd::<ClhCase>(2, 100_000, 0, 0);
    }

    #[test]
    fn one_thread_per_cpu() {
        herd::<ClhCase>(n_cpus(), 20_000, 50, 50);
    }
}

mod twa_lock {
    use super::*;

    #[test]
    fn single_thread_million() {
        single_thread::<TwaCase>(1_000_000);
    }

    #[test]
    fn two_threads() {
        herd::<TwaCase>(2, 100_000, 0, 0);
    }

    #[test]
    fn one_thread_per_cpu() {
        herd::<TwaCase>(n_cpus(), 20_000, 50, 50);
    }
}

mod reciprocating_lock {
    use super::*;

    #[test]
    fn single_thread_million() {
        single_thread::<ReciprocatingCase>(1_000_000);
    }

    #[test]
    fn two_threads() {
        herd::<ReciprocatingCase>(2, 100_000, 0, 0);
    }

    #[test]
    fn one_thread_per_cpu() {
        herd::<ReciprocatingCase>(n_cpus(), 20_000, 50, 50);
    }
}

mod hapax_lock {
    use super::*;

    #[test]
    fn single_thread_million() {
        single_thread::<HapaxCase>(1_000_000);
    }

    #[test]
    fn two_threads() {
        herd::<HapaxCase>(2, 100_000, 0, 0);
    }

    #[test]
    fn one_thread_per_cpu() {
        herd::<HapaxCase>(n_cpus(), 20_000, 50, 50);
    }
}

// A statically initialized MCS lock, usable before main.
static STATIC_LOCK: Lazy<mcs::spins::Mutex<u64>> = Lazy::new(|| mcs::spins::Mutex::new(0));

#[test]
fn static_lock_round_trip() {
    let mut node = mcs::MutexNode::new();
    *STATIC_LOCK.lock(&mut node) += 1;
    assert_eq!(*STATIC_LOCK.lock(&mut node), 1);
}
