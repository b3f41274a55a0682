//! Contention harness for the queuelock mutexes.
//!
//! One process, N workers, one lock. Workers cycle through a critical
//! section (burning `--critical-iters` of work and bumping a protected
//! counter) and an outside section, for a fixed wall-clock window. The
//! report on stdout is machine readable `key: value` lines; diagnostics go
//! to stderr via `env_logger` (`RUST_LOG=debug` to see phase transitions).

use std::process;

use clap::error::ErrorKind;
use clap::Parser;
use log::info;

mod burn;
mod config;
mod driver;
mod kind;
mod locks;
mod tsc;

use config::Config;
use driver::run;
use kind::LockKind;
use locks::{
    ClhLockBench, HapaxLockBench, McsLockBench, ReciprocatingLockBench, StdMutexBench,
    TwaLockBench,
};

fn main() {
    env_logger::init();

    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(err) => {
            let benign = matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion);
            let _ = err.print();
            process::exit(i32::from(!benign));
        }
    };

    info!(
        "driving {} with {} threads for {} ms (warm-up {} ms)",
        config.lock_kind, config.threads, config.duration_ms, config.warmup_duration_ms
    );

    let report = match config.lock_kind {
        LockKind::Mutex => run::<StdMutexBench>(&config),
        LockKind::Reciprocating => run::<ReciprocatingLockBench>(&config),
        LockKind::Hapax => run::<HapaxLockBench>(&config),
        LockKind::Mcs => run::<McsLockBench>(&config),
        LockKind::Twa => run::<TwaLockBench>(&config),
        LockKind::Clh => run::<ClhLockBench>(&config),
    };

    report.print(&config);
}
