//! # Cyclic Tick Time
//!
//! The system time is a cyclic unsigned counter of timer ticks. Its unit
//! is defined solely by the interrupt source driving it; the kernel never
//! converts it. The width is a compile-time trade-off selected by the
//! `tick-8bit` / `tick-16bit` / `tick-32bit` cargo features:
//!
//! - A narrow counter keeps every timer comparison in the kernel cheap.
//! - The cycle length bounds the ratio between the periods of the slowest
//!   and fastest regular task, and the longest usable timeout.
//! - Overrun recognition degrades with narrow counters: a task that is
//!   late by more than *half* the cycle is seen as early, not late, so
//!   its overrun goes uncounted. With 16 bits this is negligible.
//!
//! "A is later than B" is decided by the signed interpretation of the
//! wrapping difference `A - B`, so ordering is only meaningful while the
//! true distance between the two instants is below half the cycle.

/// The system tick counter type, selected by cargo feature.
#[cfg(all(
    feature = "tick-8bit",
    not(feature = "tick-16bit"),
    not(feature = "tick-32bit")
))]
pub type TickCount = u8;

/// The system tick counter type, selected by cargo feature.
#[cfg(all(feature = "tick-16bit", not(feature = "tick-32bit")))]
pub type TickCount = u16;

/// The system tick counter type, selected by cargo feature.
#[cfg(feature = "tick-32bit")]
pub type TickCount = u32;

/// Cyclic ordering for unsigned tick counters.
///
/// Implemented for the widths the kernel supports so that the core logic
/// and its tests are independent of the configured `TickCount`.
pub trait CyclicTime: Copy + Eq {
    /// The value one tick before zero. Used to initialize the system time
    /// so that the very first tick service observes 0.
    const BEFORE_ZERO: Self;

    /// Advance by one tick, wrapping at the cycle boundary.
    fn next(self) -> Self;

    /// Advance by `delta` ticks, wrapping at the cycle boundary.
    fn forward(self, delta: Self) -> Self;

    /// True iff `self` lies strictly after `other` on the cycle, under
    /// the signed interpretation of the wrapping difference.
    fn is_after(self, other: Self) -> bool;
}

macro_rules! impl_cyclic_time {
    ($unsigned:ty, $signed:ty) => {
        impl CyclicTime for $unsigned {
            const BEFORE_ZERO: Self = <$unsigned>::MAX;

            #[inline]
            fn next(self) -> Self {
                self.wrapping_add(1)
            }

            #[inline]
            fn forward(self, delta: Self) -> Self {
                self.wrapping_add(delta)
            }

            #[inline]
            fn is_after(self, other: Self) -> bool {
                (self.wrapping_sub(other) as $signed) > 0
            }
        }
    };
}

impl_cyclic_time!(u8, i8);
impl_cyclic_time!(u16, i16);
impl_cyclic_time!(u32, i32);
