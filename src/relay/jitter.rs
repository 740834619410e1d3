//! Timestamp jitter detection and correction
//!
//! Ensures a play stream is monotonic whatever the publisher sends:
//! 1. full: start at zero and enforce monotonically increasing output.
//! 2. zero: only rebase to start at zero; jitter passes through.
//! 3. off: disabled, timestamps pass through untouched (ATC-style).

/// Correction algorithm, selected per vhost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Full,
    Zero,
    Off,
}

/// Deltas outside ±250 ms are treated as a discontinuity
const MAX_JITTER_MS: i64 = 250;

/// Replacement delta used across a discontinuity
const FRAME_INTERVAL_MS: i64 = 10;

/// Per-stream jitter state
#[derive(Debug, Default)]
pub struct Jitter {
    /// Timestamp of the previous input packet
    last: Option<i64>,
    /// Previous corrected output (doubles as the rebase origin for Zero)
    last_correct: Option<i64>,
}

impl Jitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Correct one timestamp. Input and output are milliseconds.
    pub fn correct(&mut self, timestamp: u64, algorithm: Algorithm) -> u64 {
        match algorithm {
            Algorithm::Off => timestamp,
            Algorithm::Zero => {
                // the origin is the first unadjusted timestamp, not zero
                let origin = *self.last_correct.get_or_insert(timestamp as i64);
                (timestamp as i64 - origin).max(0) as u64
            }
            Algorithm::Full => self.correct_full(timestamp as i64),
        }
    }

    fn correct_full(&mut self, time: i64) -> u64 {
        let delta = match (self.last, self.last_correct) {
            (Some(last), Some(_)) => {
                let delta = time - last;
                if !(-MAX_JITTER_MS..=MAX_JITTER_MS).contains(&delta) {
                    tracing::trace!(
                        last,
                        pts = time,
                        diff = delta,
                        "jitter detected, clamping delta"
                    );
                    FRAME_INTERVAL_MS
                } else {
                    delta
                }
            }
            // first packet starts the corrected clock at zero
            _ => 0,
        };

        let corrected = (self.last_correct.unwrap_or(0) + delta).max(0);
        self.last = Some(time);
        self.last_correct = Some(corrected);
        corrected as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &[u64], algorithm: Algorithm) -> Vec<u64> {
        let mut jitter = Jitter::new();
        input.iter().map(|t| jitter.correct(*t, algorithm)).collect()
    }

    #[test]
    fn test_off_is_identity() {
        let input = [500, 100, 4000, 0];
        assert_eq!(run(&input, Algorithm::Off), input);
    }

    #[test]
    fn test_zero_rebases_to_first_timestamp() {
        assert_eq!(run(&[1000, 1040, 1080], Algorithm::Zero), [0, 40, 80]);
        // non-monotonic input stays non-monotonic, clamped at zero
        assert_eq!(run(&[1000, 900, 1100], Algorithm::Zero), [0, 0, 100]);
    }

    #[test]
    fn test_full_starts_at_zero() {
        assert_eq!(run(&[5000], Algorithm::Full), [0]);
    }

    #[test]
    fn test_full_preserves_steady_cadence() {
        assert_eq!(
            run(&[1000, 1040, 1080, 1120], Algorithm::Full),
            [0, 40, 80, 120]
        );
    }

    #[test]
    fn test_full_clamps_forward_jump() {
        // 10_000 ms gap collapses to the 10 ms notice delta
        assert_eq!(run(&[0, 40, 10_040, 10_080], Algorithm::Full), [0, 40, 50, 90]);
    }

    #[test]
    fn test_full_clamps_backward_jump() {
        // timestamp reset (e.g. encoder restart) keeps output monotonic
        assert_eq!(run(&[5000, 5040, 0, 40], Algorithm::Full), [0, 40, 50, 90]);
    }

    #[test]
    fn test_full_is_monotonic_on_noise() {
        let input = [0u64, 40, 20, 4_000_000_000, 10, 50, 90, 130];
        let output = run(&input, Algorithm::Full);
        assert_eq!(output[0], 0);
        for pair in output.windows(2) {
            assert!(pair[1] >= pair[0], "output went backward: {:?}", output);
        }
        // and never advances more than max(actual delta, 10ms) on a jump
        for (i, pair) in output.windows(2).enumerate() {
            let in_delta = input[i + 1].saturating_sub(input[i]).max(10);
            assert!(pair[1] - pair[0] <= in_delta);
        }
    }

    #[test]
    fn test_boundary_deltas() {
        // exactly ±250 is still considered sane
        assert_eq!(run(&[0, 250], Algorithm::Full), [0, 250]);
        assert_eq!(run(&[1000, 750, 1000], Algorithm::Full), [0, 0, 250]);
        // 251 is a discontinuity
        assert_eq!(run(&[0, 251], Algorithm::Full), [0, 10]);
    }
}
