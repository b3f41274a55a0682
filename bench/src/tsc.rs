//! Cheap per-sample timestamps.
//!
//! On x86 the time-stamp counter is read directly (fenced, so it cannot drift
//! ahead of the surrounding instructions); the driver converts cycle deltas
//! to nanoseconds by calibrating against the wall clock over the measurement
//! window. Elsewhere a monotonic-clock nanosecond counter stands in, for
//! which the calibration comes out at about one.

#[cfg(target_arch = "x86_64")]
pub fn cycles() -> u64 {
    // SAFETY: `lfence` and `rdtsc` are always available on x86_64.
    unsafe {
        core::arch::x86_64::_mm_lfence();
        core::arch::x86_64::_rdtsc()
    }
}

#[cfg(target_arch = "x86")]
pub fn cycles() -> u64 {
    // SAFETY: `lfence` and `rdtsc` require SSE2, which the target baseline
    // includes.
    unsafe {
        core::arch::x86::_mm_lfence();
        core::arch::x86::_rdtsc()
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
pub fn cycles() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::cycles;

    #[test]
    fn monotone_enough() {
        let a = cycles();
        let b = cycles();
        assert!(b >= a);
    }
}
