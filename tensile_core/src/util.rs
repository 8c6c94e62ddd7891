//! Common time/period helpers for tensile_core.

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;
/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Sampling period in microseconds for a rate in Hz. A zero rate is
/// treated as 1 Hz and the result never rounds below 1 µs.
#[inline]
pub fn period_us(hz: u32) -> u64 {
    (MICROS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Sampling period in milliseconds; same clamping as `period_us`.
#[inline]
pub fn period_ms(hz: u32) -> u64 {
    (MILLIS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Clamp an elapsed-millisecond count into the `i32` timestamp domain used
/// by the capture buffer.
#[inline]
pub fn ms_to_i32(ms: u64) -> i32 {
    ms.min(i32::MAX as u64) as i32
}
