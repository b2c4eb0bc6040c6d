//! Debug assertion macros for the ring's cursor protocol.
//!
//! Active only in debug builds; release builds pay nothing.

/// Assert that the byte count never exceeds the usable capacity.
///
/// Holds because the producer reserves against `capacity - 1` and the
/// consumer never rewinds.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $usable:expr) => {
        debug_assert!(
            $count <= $usable,
            "ring holds {} bytes, more than the usable {}",
            $count,
            $usable
        )
    };
}

/// Assert that a cursor only moves forward.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} cursor moved backwards: {} -> {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that the consumer never advances past the producer.
macro_rules! debug_assert_head_not_past_tail {
    ($new_head:expr, $tail:expr) => {
        debug_assert!(
            $new_head <= $tail,
            "head {} advanced beyond tail {}",
            $new_head,
            $tail
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_head_not_past_tail;
pub(crate) use debug_assert_monotonic;
