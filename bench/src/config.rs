use clap::Parser;

use crate::kind::LockKind;

/// Drives one lock implementation under configurable contention and reports
/// throughput and handoff latencies.
#[derive(Debug, Parser)]
#[command(name = "mutex-bench", version, about)]
pub struct Config {
    /// Number of worker threads.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub threads: u32,

    /// Length of the measurement window, in milliseconds.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub duration_ms: u64,

    /// Length of the uncounted warm-up phase, in milliseconds.
    #[arg(long, default_value_t = 0)]
    pub warmup_duration_ms: u64,

    /// Burn-loop iterations inside the critical section.
    #[arg(long, default_value_t = 100)]
    pub critical_iters: u64,

    /// Burn-loop iterations outside the lock.
    #[arg(long, default_value_t = 100)]
    pub outside_iters: u64,

    /// One in N iterations samples timestamps.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub timing_sample_stride: u64,

    /// The lock implementation to drive.
    #[arg(long, value_enum, default_value_t = LockKind::Mutex)]
    pub lock_kind: LockKind,
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;
    use clap::Parser;

    use super::{Config, LockKind};

    fn parse(args: &[&str]) -> Result<Config, clap::Error> {
        Config::try_parse_from(std::iter::once("mutex-bench").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.threads, 4);
        assert_eq!(config.duration_ms, 1000);
        assert_eq!(config.warmup_duration_ms, 0);
        assert_eq!(config.critical_iters, 100);
        assert_eq!(config.outside_iters, 100);
        assert_eq!(config.timing_sample_stride, 1);
        assert_eq!(config.lock_kind, LockKind::Mutex);
    }

    #[test]
    fn all_flags() {
        let config = parse(&[
            "--threads",
            "8",
            "--duration-ms",
            "250",
            "--warmup-duration-ms",
            "50",
            "--critical-iters",
            "10",
            "--outside-iters",
            "20",
            "--timing-sample-stride",
            "16",
            "--lock-kind",
            "reciprocating",
        ])
        .unwrap();
        assert_eq!(config.threads, 8);
        assert_eq!(config.duration_ms, 250);
        assert_eq!(config.warmup_duration_ms, 50);
        assert_eq!(config.critical_iters, 10);
        assert_eq!(config.outside_iters, 20);
        assert_eq!(config.timing_sample_stride, 16);
        assert_eq!(config.lock_kind, LockKind::Reciprocating);
    }

    #[test]
    fn every_lock_kind_parses() {
        for name in ["mutex", "reciprocating", "hapax", "mcs", "twa", "clh"] {
            let config = parse(&["--lock-kind", name]).unwrap();
            assert_eq!(config.lock_kind.as_str(), name);
        }
    }

    #[test]
    fn rejects_unknown_lock_kind() {
        let err = parse(&["--lock-kind", "ticket"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn rejects_zero_threads() {
        let err = parse(&["--threads", "0"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn rejects_zero_duration() {
        let err = parse(&["--duration-ms", "0"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn rejects_missing_value() {
        let err = parse(&["--threads"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn rejects_non_numeric_value() {
        let err = parse(&["--threads", "many"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn rejects_unknown_flag() {
        let err = parse(&["--spin-harder"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }
}
