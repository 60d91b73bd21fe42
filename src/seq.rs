//! 16-bit wrapping sequence-number arithmetic.
//!
//! Sequence numbers count **bytes**, not segments, and live in a space of
//! [`SEQ_SPACE`] values.  Every comparison goes through [`distance`], so two
//! numbers are only ever ordered *relative to a reference point* (a window
//! base or the next expected byte), never by native integer ordering.
//!
//! ```text
//!   base                    a              b
//!  ──┼──────────────────────┼──────────────┼──────▶ (wraps at 65536)
//!    │<── distance(base,a) ─▶│
//!    │<──────── distance(base,b) ─────────▶│
//! ```
//!
//! Every other module routes its sequence arithmetic through here.

/// Number of distinct sequence numbers (`u16::MAX + 1`).
pub const SEQ_SPACE: usize = 1 << 16;

/// `(seq + n) mod 65536`.
#[inline]
pub fn advance(seq: u16, n: usize) -> u16 {
    seq.wrapping_add((n % SEQ_SPACE) as u16)
}

/// `(b - a) mod 65536`: how far `b` lies ahead of `a`.
///
/// Always non-negative and direction-sensitive: `distance(a, b)` and
/// `distance(b, a)` sum to 65536 unless the two are equal.
#[inline]
pub fn distance(a: u16, b: u16) -> u16 {
    b.wrapping_sub(a)
}

/// `true` when `seq` falls within `window` bytes at or after `expected`.
#[inline]
pub fn in_receive_window(seq: u16, expected: u16, window: usize) -> bool {
    usize::from(distance(expected, seq)) < window
}

/// `true` when `a` is at or before `b`, measured from `base`.
///
/// Both values must lie within one sequence space of `base` in the forward
/// direction, which holds for anything inside a sender's window.
#[inline]
pub fn not_after(base: u16, a: u16, b: u16) -> bool {
    distance(base, a) <= distance(base, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_wraparound_is_noop() {
        for seq in [0u16, 1, 999, 32_767, 65_535] {
            assert_eq!(advance(advance(seq, SEQ_SPACE), 0), seq);
        }
    }

    #[test]
    fn advance_wraps_at_65536() {
        assert_eq!(advance(65_535, 1), 0);
        assert_eq!(advance(65_000, 1000), 464);
        assert_eq!(advance(10, SEQ_SPACE + 5), 15);
    }

    #[test]
    fn distance_is_direction_sensitive() {
        assert_eq!(distance(10, 15), 5);
        assert_eq!(distance(15, 10), 65_531);
        assert_eq!(distance(65_530, 4), 10);
        assert_eq!(distance(7, 7), 0);
    }

    #[test]
    fn receive_window_across_wrap() {
        assert!(in_receive_window(200, 65_000, 1000));
        assert!(in_receive_window(65_000, 65_000, 1000));
        assert!(!in_receive_window(464, 65_000, 1000));
        // Already-delivered bytes sit "behind" expected and are out of window.
        assert!(!in_receive_window(64_000, 65_000, 1000));
    }

    #[test]
    fn not_after_relative_to_base() {
        let base = 65_000;
        assert!(not_after(base, 65_500, 300));
        assert!(!not_after(base, 300, 65_500));
        assert!(not_after(base, 300, 300));
    }
}
