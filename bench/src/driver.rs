//! The measurement loop: spawn workers, warm up, open the window, stop,
//! aggregate.

use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicU64, AtomicU8};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::burn::burn;
use crate::config::Config;
use crate::locks::LockBench;
use crate::tsc;

const WARMUP: u8 = 0;
const MEASURE: u8 = 1;
const STOP: u8 = 2;

/// Cross-thread benchmark state.
#[derive(Default)]
struct Shared {
    phase: AtomicU8,
    /// Threads currently between deciding to acquire and entering the
    /// critical section.
    waiters: AtomicU64,
}

/// Totals flushed by each worker when it stops.
#[derive(Default)]
struct Totals {
    ops: AtomicU64,
    hold_cycles: AtomicU64,
    hold_samples: AtomicU64,
    gap_cycles_w0: AtomicU64,
    gap_samples_w0: AtomicU64,
    gap_cycles_w_gt0: AtomicU64,
    gap_samples_w_gt0: AtomicU64,
    waiters_sum: AtomicU64,
}

/// The aggregated outcome of one benchmark run.
pub struct Report {
    pub total_operations: u64,
    pub protected_counter: u64,
    pub elapsed_seconds: f64,
    pub throughput_ops_per_sec: f64,
    pub avg_lock_hold_ns: f64,
    pub avg_unlock_to_next_lock_ns_w0: f64,
    pub avg_unlock_to_next_lock_ns_w_gt0: f64,
    pub avg_waiters_before_lock: f64,
}

impl Report {
    /// Writes the `key: value` report to standard output.
    pub fn print(&self, config: &Config) {
        println!("lock_kind: {}", config.lock_kind);
        println!("threads: {}", config.threads);
        println!("duration_ms: {}", config.duration_ms);
        println!("warmup_duration_ms: {}", config.warmup_duration_ms);
        println!("critical_iters: {}", config.critical_iters);
        println!("outside_iters: {}", config.outside_iters);
        println!("timing_sample_stride: {}", config.timing_sample_stride);
        println!("total_operations: {}", self.total_operations);
        println!("protected_counter: {}", self.protected_counter);
        println!("elapsed_seconds: {:.6}", self.elapsed_seconds);
        println!("throughput_ops_per_sec: {:.2}", self.throughput_ops_per_sec);
        println!("avg_lock_hold_ns: {:.2}", self.avg_lock_hold_ns);
        println!("avg_unlock_to_next_lock_ns_w0: {:.2}", self.avg_unlock_to_next_lock_ns_w0);
        println!(
            "avg_unlock_to_next_lock_ns_w_gt0: {:.2}",
            self.avg_unlock_to_next_lock_ns_w_gt0
        );
        println!("avg_waiters_before_lock: {:.4}", self.avg_waiters_before_lock);
    }
}

/// Runs the configured contention workload against a fresh instance of `L`.
pub fn run<L: LockBench>(config: &Config) -> Report {
    let lock = L::default();
    let shared = Shared::default();
    let totals = Totals::default();

    let (elapsed, cycles) = thread::scope(|scope| {
        for _ in 0..config.threads {
            scope.spawn(|| worker(&lock, &shared, &totals, config));
        }

        if config.warmup_duration_ms > 0 {
            thread::sleep(Duration::from_millis(config.warmup_duration_ms));
        }
        debug!("warm-up over, opening measurement window");

        let wall_start = Instant::now();
        let cycles_start = tsc::cycles();
        shared.phase.store(MEASURE, Release);

        thread::sleep(Duration::from_millis(config.duration_ms));

        shared.phase.store(STOP, Release);
        let cycles_end = tsc::cycles();
        let elapsed = wall_start.elapsed();
        debug!("measurement window closed, joining workers");

        (elapsed, cycles_end.saturating_sub(cycles_start))
    });

    let elapsed_ns = elapsed.as_nanos() as f64;
    let ns_per_cycle = if cycles > 0 { elapsed_ns / cycles as f64 } else { 0.0 };

    let ops = totals.ops.load(Relaxed);
    let hold_samples = totals.hold_samples.load(Relaxed);
    let gap_samples_w0 = totals.gap_samples_w0.load(Relaxed);
    let gap_samples_w_gt0 = totals.gap_samples_w_gt0.load(Relaxed);

    let average = |cycles: u64, samples: u64| {
        if samples > 0 {
            cycles as f64 / samples as f64 * ns_per_cycle
        } else {
            0.0
        }
    };

    Report {
        total_operations: ops,
        protected_counter: lock.counter(),
        elapsed_seconds: elapsed.as_secs_f64(),
        throughput_ops_per_sec: if elapsed_ns > 0.0 { ops as f64 / elapsed.as_secs_f64() } else { 0.0 },
        avg_lock_hold_ns: average(totals.hold_cycles.load(Relaxed), hold_samples),
        avg_unlock_to_next_lock_ns_w0: average(totals.gap_cycles_w0.load(Relaxed), gap_samples_w0),
        avg_unlock_to_next_lock_ns_w_gt0: average(
            totals.gap_cycles_w_gt0.load(Relaxed),
            gap_samples_w_gt0,
        ),
        avg_waiters_before_lock: if ops > 0 {
            totals.waiters_sum.load(Relaxed) as f64 / ops as f64
        } else {
            0.0
        },
    }
}

/// One worker's cycle loop.
///
/// Timestamps are taken only on sampled iterations (one in
/// `timing_sample_stride`), plus the entry stamp of the iteration right
/// after a sampled one, which closes that sample's unlock-to-next-lock gap.
fn worker<L: LockBench>(lock: &L, shared: &Shared, totals: &Totals, config: &Config) {
    let mut session = L::Session::default();

    let mut ops = 0_u64;
    let mut hold_cycles = 0_u64;
    let mut hold_samples = 0_u64;
    let mut gap_cycles = [0_u64; 2];
    let mut gap_samples = [0_u64; 2];
    let mut waiters_sum = 0_u64;

    let mut tick = 0_u64;
    let mut last_before_unlock = 0_u64;
    let mut last_sampled = false;

    loop {
        let phase = shared.phase.load(Acquire);
        if phase == STOP {
            break;
        }
        let measuring = phase == MEASURE;

        tick = tick.wrapping_add(1);
        let sample_this = measuring && tick % config.timing_sample_stride == 0;
        let entry_stamp = sample_this || last_sampled;

        let waiting = shared.waiters.fetch_add(1, Relaxed);
        let (after_lock, before_unlock) = lock.critical(&mut session, |counter| {
            shared.waiters.fetch_sub(1, Relaxed);
            let after_lock = if entry_stamp { tsc::cycles() } else { 0 };
            burn(config.critical_iters);
            if measuring {
                *counter += 1;
            }
            let before_unlock = if sample_this { tsc::cycles() } else { 0 };
            (after_lock, before_unlock)
        });
        burn(config.outside_iters);

        if measuring {
            ops += 1;
            waiters_sum += waiting;
            if last_sampled {
                let contended = usize::from(waiting > 0);
                gap_cycles[contended] += after_lock.wrapping_sub(last_before_unlock);
                gap_samples[contended] += 1;
            }
            if sample_this {
                hold_cycles += before_unlock.wrapping_sub(after_lock);
                hold_samples += 1;
            }
        }
        last_sampled = sample_this;
        last_before_unlock = before_unlock;
    }

    totals.ops.fetch_add(ops, Relaxed);
    totals.hold_cycles.fetch_add(hold_cycles, Relaxed);
    totals.hold_samples.fetch_add(hold_samples, Relaxed);
    totals.gap_cycles_w0.fetch_add(gap_cycles[0], Relaxed);
    totals.gap_samples_w0.fetch_add(gap_samples[0], Relaxed);
    totals.gap_cycles_w_gt0.fetch_add(gap_cycles[1], Relaxed);
    totals.gap_samples_w_gt0.fetch_add(gap_samples[1], Relaxed);
    totals.waiters_sum.fetch_add(waiters_sum, Relaxed);
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::run;
    use crate::config::Config;
    use crate::locks::{HapaxLockBench, McsLockBench, StdMutexBench};

    fn quick_config() -> Config {
        Config::try_parse_from([
            "mutex-bench",
            "--threads",
            "2",
            "--duration-ms",
            "50",
            "--warmup-duration-ms",
            "10",
            "--critical-iters",
            "5",
            "--outside-iters",
            "5",
        ])
        .unwrap()
    }

    fn smoke<L: crate::locks::LockBench>() {
        let config = quick_config();
        let report = run::<L>(&config);
        assert_eq!(report.total_operations, report.protected_counter);
        assert!(report.total_operations > 0);
        assert!(report.elapsed_seconds > 0.0);
        assert!(report.throughput_ops_per_sec > 0.0);
        assert!(report.avg_waiters_before_lock >= 0.0);
    }

    #[test]
    fn std_mutex_counts_exactly() {
        smoke::<StdMutexBench>();
    }

    #[test]
    fn mcs_counts_exactly() {
        smoke::<McsLockBench>();
    }

    #[test]
    fn hapax_counts_exactly() {
        smoke::<HapaxLockBench>();
    }
}
