//! A collection of queue-based mutual exclusion locks for busy-wait
//! synchronization on shared-memory multiprocessors.
//!
//! All locks in this crate hand the lock off directly from a releasing thread
//! to a specific successor and keep waiter spinning local, rather than having
//! every waiter pound on one shared flag. Five algorithms are provided, each
//! in its own module:
//!
//! - [`mcs`]: the classic Mellor-Crummey and Scott list-based queue lock.
//!   Waiters link their own queue node after the predecessor's and spin on a
//!   flag inside that node. Strict FIFO.
//! - [`clh`]: the Craig and Landin-Hagersten queue lock. Waiters spin on the
//!   *predecessor's* cell, and a releasing thread adopts its predecessor's
//!   cell for its next acquisition. Strict FIFO.
//! - [`twa`]: a ticket lock augmented with a hashed waiting array, so that
//!   only near-term ticket holders poll the global grant counter while
//!   long-term waiters sleep on a per-slot sequence. Strict FIFO.
//! - [`reciprocating`]: a single-word lock whose tail pointer doubles as both
//!   the "locked" indicator and the head of a LIFO arrival stack, using a
//!   low-bit tag. LIFO within an arrival segment, FIFO across segments.
//! - [`hapax`]: a visible-waiter handoff lock keyed by single-use,
//!   process-unique acquisition tokens, which sidestep the A-B-A hazards of
//!   pointer-keyed handoff slots.
//!
//! # Spinlock use cases
//!
//! It is noteworthy to mention that [spinlocks are usually not what you
//! want]. The majority of use cases are well covered by OS-based mutexes like
//! [`std::sync::Mutex`]. These implementations will notify the system that
//! the waiting thread should be parked, freeing the processor to work on
//! something else.
//!
//! Spinlocks are only efficient in very few circumstances where the overhead
//! of context switching or process rescheduling are greater than busy waiting
//! for very short periods. Spinlocks can be useful inside operating-system
//! kernels, on embedded systems or even complement other locking designs.
//!
//! # Waiting policies
//!
//! Every mutex is generic over a relax policy implementing [`relax::Relax`],
//! applied between iterations of its busy-wait loops. Each lock module
//! exports `spins`, `spins::backoff` and `loops` type aliases, and, under the
//! `yield` feature, `yields` and `yields::backoff` aliases.
//!
//! # Queue node handles
//!
//! The [`mcs`], [`clh`] and [`reciprocating`] locks require a small cell
//! owned by the waiting thread, and [`hapax`] requires a per-thread token
//! sequence. These are owned by the caller as node handle values and reused
//! across acquisitions; locking mutably borrows (or, for [`clh`], recycles)
//! the handle for the duration of the guard. See each module for details.
//!
//! # Features
//!
//! This crate does not provide any default features. Features that can be
//! enabled are:
//!
//! ## yield
//!
//! The `yield` feature requires linking to the standard library, so it is not
//! suitable for `no_std` environments. By enabling the `yield` feature,
//! instead of busy-waiting during lock acquisitions and releases, locks will
//! call [`std::thread::yield_now`], which cooperatively gives up a timeslice
//! to the OS scheduler.
//!
//! [spinlocks are usually not what you want]: https://matklad.github.io/2020/01/02/spinlocks-considered-harmful.html
//! [`std::sync::Mutex`]: https://doc.rust-lang.org/std/sync/struct.Mutex.html
//! [`std::thread::yield_now`]: https://doc.rust-lang.org/std/thread/fn.yield_now.html

#![no_std]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::inline_always)]
#![allow(clippy::doc_markdown)]
#![warn(rust_2021_compatibility)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(any(feature = "yield", loom, test))]
extern crate std;

pub mod clh;
pub mod hapax;
pub mod mcs;
pub mod reciprocating;
pub mod relax;
pub mod twa;

pub(crate) mod cfg;

#[cfg(test)]
pub(crate) mod test;

#[cfg(all(loom, test))]
#[cfg(not(tarpaulin))]
pub(crate) mod loom;
