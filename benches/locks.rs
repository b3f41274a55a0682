use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Bencher, Criterion};

use queuelock::{clh, hapax, mcs, reciprocating, twa};

fn mcs_create(bencher: &mut Bencher) {
    bencher.iter(|| {
        let value = black_box(0_u32);
        mcs::spins::Mutex::new(value)
    });
}

fn mcs_lock_unlock(bencher: &mut Bencher) {
    let mutex = mcs::spins::Mutex::new(0_u32);
    let mut node = mcs::MutexNode::new();

    bencher.iter(|| {
        let mut guard = mutex.lock(&mut node);
        *guard = guard.wrapping_add(1);
        drop(guard);
    });
}

fn mcs_lock_unlock_write_contention(bencher: &mut Bencher) {
    let data = Arc::new(mcs::spins::Mutex::new(0_u32));

    let thread = thread::spawn({
        let data = Arc::clone(&data);
        move || {
            let mut node = mcs::MutexNode::new();
            while Arc::strong_count(&data) > 1 {
                for _ in 0..1000 {
                    let mut guard = data.lock(&mut node);
                    *guard = guard.wrapping_add(1);
                    drop(guard);
                }
            }
        }
    });

    let mut node = mcs::MutexNode::new();
    bencher.iter(|| {
        let mut guard = data.lock(&mut node);
        *guard = guard.wrapping_add(1);
        drop(guard);
    });

    drop(data);
    thread.join().unwrap();
}

fn clh_create(bencher: &mut Bencher) {
    bencher.iter(|| {
        let value = black_box(0_u32);
        clh::spins::Mutex::new(value)
    });
}

fn clh_lock_unlock(bencher: &mut Bencher) {
    let mutex = clh::spins::Mutex::new(0_u32);
    let mut node = clh::MutexNode::new();

    bencher.iter(|| {
        let mut guard = mutex.lock(&mut node);
        *guard = guard.wrapping_add(1);
        drop(guard);
    });
}

fn clh_lock_unlock_write_contention(bencher: &mut Bencher) {
    let data = Arc::new(clh::spins::Mutex::new(0_u32));

    let thread = thread::spawn({
        let data = Arc::clone(&data);
        move || {
            let mut node = clh::MutexNode::new();
            while Arc::strong_count(&data) > 1 {
                for _ in 0..1000 {
                    let mut guard = data.lock(&mut node);
                    *guard = guard.wrapping_add(1);
                    drop(guard);
                }
            }
        }
    });

    let mut node = clh::MutexNode::new();
    bencher.iter(|| {
        let mut guard = data.lock(&mut node);
        *guard = guard.wrapping_add(1);
        drop(guard);
    });

    drop(data);
    thread.join().unwrap();
}

fn twa_create(bencher: &mut Bencher) {
    bencher.iter(|| {
        let value = black_box(0_u32);
        twa::spins::Mutex::new(value)
    });
}

fn twa_lock_unlock(bencher: &mut Bencher) {
    let mutex = twa::spins::Mutex::new(0_u32);

    bencher.iter(|| {
        let mut guard = mutex.lock();
        *guard = guard.wrapping_add(1);
        drop(guard);
    });
}

fn twa_lock_unlock_write_contention(bencher: &mut Bencher) {
    let data = Arc::new(twa::spins::Mutex::new(0_u32));

    let thread = thread::spawn({
        let data = Arc::clone(&data);
        move || {
            while Arc::strong_count(&data) > 1 {
                for _ in 0..1000 {
                    let mut guard = data.lock();
                    *guard = guard.wrapping_add(1);
                    drop(guard);
                }
            }
        }
    });

    bencher.iter(|| {
        let mut guard = data.lock();
        *guard = guard.wrapping_add(1);
        drop(guard);
    });

    drop(data);
    thread.join().unwrap();
}

fn reciprocating_create(bencher: &mut Bencher) {
    bencher.iter(|| {
        let value = black_box(0_u32);
        reciprocating::spins::Mutex::new(value)
    });
}

fn reciprocating_lock_unlock(bencher: &mut Bencher) {
    let mutex = reciprocating::spins::Mutex::new(0_u32);
    let mut node = reciprocating::MutexNode::new();

    bencher.iter(|| {
        let mut guard = mutex.lock(&mut node);
        *guard = guard.wrapping_add(1);
        drop(guard);
    });
}

fn reciprocating_lock_unlock_write_contention(bencher: &mut Bencher) {
    let data = Arc::new(reciprocating::spins::Mutex::new(0_u32));

    let thread = thread::spawn({
        let data = Arc::clone(&data);
        move || {
            let mut node = reciprocating::MutexNode::new();
            while Arc::strong_count(&data) > 1 {
                for _ in 0..1000 {
                    let mut guard = data.lock(&mut node);
                    *guard = guard.wrapping_add(1);
                    drop(guard);
                }
            }
        }
    });

    let mut node = reciprocating::MutexNode::new();
    bencher.iter(|| {
        let mut guard = data.lock(&mut node);
        *guard = guard.wrapping_add(1);
        drop(guard);
    });

    drop(data);
    thread.join().unwrap();
}

fn hapax_create(bencher: &mut Bencher) {
    bencher.iter(|| {
        let value = black_box(0_u32);
        hapax::spins::Mutex::new(value)
    });
}

fn hapax_lock_unlock(bencher: &mut Bencher) {
    let mutex = hapax::spins::Mutex::new(0_u32);
    let mut tokens = hapax::Tokens::new();

    bencher.iter(|| {
        let mut guard = mutex.lock(&mut tokens);
        *guard = guard.wrapping_add(1);
        drop(guard);
    });
}

fn hapax_lock_unlock_write_contention(bencher: &mut Bencher) {
    let data = Arc::new(hapax::spins::Mutex::new(0_u32));

    let thread = thread::spawn({
        let data = Arc::clone(&data);
        move || {
            let mut tokens = hapax::Tokens::new();
            while Arc::strong_count(&data) > 1 {
                for _ in 0..1000 {
                    let mut guard = data.lock(&mut tokens);
                    *guard = guard.wrapping_add(1);
                    drop(guard);
                }
            }
        }
    });

    let mut tokens = hapax::Tokens::new();
    bencher.iter(|| {
        let mut guard = data.lock(&mut tokens);
        *guard = guard.wrapping_add(1);
        drop(guard);
    });

    drop(data);
    thread.join().unwrap();
}

fn create(criterion: &mut Criterion) {
    criterion.bench_function("mcs_create", mcs_create);
    criterion.bench_function("clh_create", clh_create);
    criterion.bench_function("twa_create", twa_create);
    criterion.bench_function("reciprocating_create", reciprocating_create);
    criterion.bench_function("hapax_create", hapax_create);
}

fn lock_unlock(criterion: &mut Criterion) {
    criterion.bench_function("mcs_lock_unlock", mcs_lock_unlock);
    criterion.bench_function("clh_lock_unlock", clh_lock_unlock);
    criterion.bench_function("twa_lock_unlock", twa_lock_unlock);
    criterion.bench_function("reciprocating_lock_unlock", reciprocating_lock_unlock);
    criterion.bench_function("hapax_lock_unlock", hapax_lock_unlock);
}

fn lock_unlock_write_contention(criterion: &mut Criterion) {
    criterion.bench_function("mcs_write_contention", mcs_lock_unlock_write_contention);
    criterion.bench_function("clh_write_contention", clh_lock_unlock_write_contention);
    criterion.bench_function("twa_write_contention", twa_lock_unlock_write_contention);
    criterion
        .bench_function("reciprocating_write_contention", reciprocating_lock_unlock_write_contention);
    criterion.bench_function("hapax_write_contention", hapax_lock_unlock_write_contention);
}

criterion_group!(mutex, create, lock_unlock, lock_unlock_write_contention);
criterion_main!(mutex);
