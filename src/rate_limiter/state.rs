//! # Persisted Bucket State
//!
//! The record stored in every `.ratelimit` file: a fixed 36-byte
//! little-endian layout so that any process, whatever its word size, reads
//! the same thing.
//!
//! ```text
//!     offset  size  field
//!     ──────  ────  ───────────────────────────────
//!          0     8  tokens          f64
//!          8     8  last_update_ms  i64 (epoch ms)
//!         16     8  rate            f64 (tokens/s)
//!         24     8  burst_size      u64
//!         32     4  version         u32 (= 1)
//! ```

/// Current record layout version.
pub const STATE_VERSION: u32 = 1;

/// Encoded size of a [`BucketState`] in bytes.
pub const STATE_RECORD_LEN: usize = 36;

/// Token bucket snapshot as persisted on disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Tokens currently available, possibly fractional.
    pub tokens: f64,
    /// Wall-clock time of the last refill, in epoch milliseconds.
    pub last_update_ms: i64,
    /// Refill rate recorded by the last writer.
    pub rate: f64,
    /// Capacity recorded by the last writer.
    pub burst_size: u64,
    /// Layout version, always [`STATE_VERSION`] once decoded.
    pub version: u32,
}

impl BucketState {
    /// A full bucket stamped at `now_ms`. Used when no state file exists yet.
    pub fn full(rate: f64, burst_size: u64, now_ms: i64) -> Self {
        Self {
            tokens: burst_size as f64,
            last_update_ms: now_ms,
            rate,
            burst_size,
            version: STATE_VERSION,
        }
    }

    /// Serializes to the fixed little-endian layout.
    pub fn encode(&self) -> [u8; STATE_RECORD_LEN] {
        let mut buf = [0u8; STATE_RECORD_LEN];
        buf[0..8].copy_from_slice(&self.tokens.to_le_bytes());
        buf[8..16].copy_from_slice(&self.last_update_ms.to_le_bytes());
        buf[16..24].copy_from_slice(&self.rate.to_le_bytes());
        buf[24..32].copy_from_slice(&self.burst_size.to_le_bytes());
        buf[32..36].copy_from_slice(&self.version.to_le_bytes());
        buf
    }

    /// Parses and sanity-checks a record.
    ///
    /// The error is a short reason suitable for
    /// [`Error::CorruptState`](crate::Error::CorruptState).
    pub fn decode(bytes: &[u8]) -> Result<Self, &'static str> {
        let bytes: &[u8; STATE_RECORD_LEN] = bytes
            .try_into()
            .map_err(|_| "record has wrong length")?;

        let field8 = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[at..at + 8]);
            b
        };
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[32..36]);

        let state = Self {
            tokens: f64::from_le_bytes(field8(0)),
            last_update_ms: i64::from_le_bytes(field8(8)),
            rate: f64::from_le_bytes(field8(16)),
            burst_size: u64::from_le_bytes(field8(24)),
            version: u32::from_le_bytes(version),
        };

        if state.version != STATE_VERSION {
            return Err("unsupported record version");
        }
        if !state.tokens.is_finite() || state.tokens < 0.0 {
            return Err("token count is not a finite non-negative number");
        }
        if state.tokens > state.burst_size as f64 {
            return Err("token count exceeds recorded burst size");
        }
        if !state.rate.is_finite() || state.rate <= 0.0 {
            return Err("recorded rate is not a positive finite number");
        }
        Ok(state)
    }

    /// Brings the bucket up to `now_ms` under the given parameters.
    ///
    /// `tokens = min(burst_size, tokens + elapsed_s * rate)`. A clock that
    /// reads at or before `last_update_ms` adds nothing and leaves the
    /// timestamp where it was, so it never moves backwards. The supplied
    /// `rate` and `burst_size` replace the recorded ones.
    pub fn refill(&mut self, now_ms: i64, rate: f64, burst_size: u64) {
        let burst = burst_size as f64;
        let elapsed_ms = now_ms.saturating_sub(self.last_update_ms);
        if elapsed_ms > 0 {
            let added = (elapsed_ms as f64 / 1000.0) * rate;
            self.tokens = (self.tokens + added).min(burst);
            self.last_update_ms = now_ms;
        } else {
            self.tokens = self.tokens.min(burst);
        }
        self.rate = rate;
        self.burst_size = burst_size;
    }

    /// Removes `n` tokens if that many are available.
    pub fn try_take(&mut self, n: u64) -> bool {
        let n = n as f64;
        if self.tokens >= n {
            self.tokens = (self.tokens - n).max(0.0);
            true
        } else {
            false
        }
    }

    /// Seconds until `n` tokens will be available at the recorded rate.
    pub fn seconds_until(&self, n: f64) -> f64 {
        ((n - self.tokens) / self.rate).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_layout_is_little_endian() {
        let state = BucketState {
            tokens: 1.5,
            last_update_ms: 0x0102_0304,
            rate: 3.0,
            burst_size: 5,
            version: STATE_VERSION,
        };
        let bytes = state.encode();
        assert_eq!(bytes.len(), 36);
        assert_eq!(&bytes[0..8], &1.5f64.to_le_bytes());
        assert_eq!(&bytes[8..12], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[24..32], &5u64.to_le_bytes());
        assert_eq!(&bytes[32..36], &[1, 0, 0, 0]);
        assert_eq!(BucketState::decode(&bytes).unwrap(), state);
    }

    #[test]
    fn test_decode_rejects_bad_records() {
        let good = BucketState::full(3.0, 5, 1_000).encode();

        assert!(BucketState::decode(&good[..35]).is_err());
        assert!(BucketState::decode(&[good.as_slice(), &[0u8][..]].concat()).is_err());

        let mut wrong_version = good;
        wrong_version[32] = 2;
        assert_eq!(
            BucketState::decode(&wrong_version),
            Err("unsupported record version")
        );

        let mut nan_tokens = good;
        nan_tokens[0..8].copy_from_slice(&f64::NAN.to_le_bytes());
        assert!(BucketState::decode(&nan_tokens).is_err());

        let mut too_many = good;
        too_many[0..8].copy_from_slice(&6.0f64.to_le_bytes());
        assert!(BucketState::decode(&too_many).is_err());

        let mut zero_rate = good;
        zero_rate[16..24].copy_from_slice(&0.0f64.to_le_bytes());
        assert!(BucketState::decode(&zero_rate).is_err());
    }

    #[test]
    fn test_refill_rule() {
        let mut state = BucketState::full(3.0, 5, 0);
        state.tokens = 0.0;

        state.refill(334, 3.0, 5);
        assert!(state.tokens >= 1.0);
        assert!(state.try_take(1));
        assert!(!state.try_take(1));

        state.refill(60_000, 3.0, 5);
        assert_eq!(state.tokens, 5.0);
        assert_eq!(state.last_update_ms, 60_000);
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let mut state = BucketState::full(3.0, 5, 10_000);
        state.tokens = 2.0;

        state.refill(5_000, 3.0, 5);
        assert_eq!(state.tokens, 2.0);
        assert_eq!(state.last_update_ms, 10_000);
    }

    #[test]
    fn test_refill_applies_new_parameters() {
        let mut state = BucketState::full(3.0, 10, 0);
        state.refill(0, 1.0, 4);
        assert_eq!(state.tokens, 4.0);
        assert_eq!(state.rate, 1.0);
        assert_eq!(state.burst_size, 4);
    }

    #[test]
    fn test_seconds_until() {
        let mut state = BucketState::full(2.0, 5, 0);
        assert_eq!(state.seconds_until(1.0), 0.0);
        state.tokens = 0.5;
        assert_eq!(state.seconds_until(1.0), 0.25);
    }

    proptest! {
        #[test]
        fn prop_refill_stays_in_bounds(
            tokens in 0.0f64..=100.0,
            start in 0i64..1_000_000_000,
            steps in prop::collection::vec(-5_000i64..120_000, 1..20),
            rate in 0.001f64..1_000.0,
            burst in 1u64..=100,
            takes in prop::collection::vec(0u64..=10, 1..20),
        ) {
            let mut state = BucketState::full(rate, burst, start);
            state.tokens = tokens.min(burst as f64);
            let mut now = start;

            for (step, take) in steps.iter().zip(takes.iter().cycle()) {
                let before = state.last_update_ms;
                now += step;
                state.refill(now, rate, burst);
                state.try_take(*take);

                prop_assert!(state.tokens >= 0.0);
                prop_assert!(state.tokens <= burst as f64);
                prop_assert!(state.last_update_ms >= before);
            }
            prop_assert!(BucketState::decode(&state.encode()).is_ok());
        }
    }
}
