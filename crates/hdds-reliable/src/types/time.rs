// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS wire timestamp (seconds + 2^-32 fractions since the UNIX epoch).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time {
    pub seconds: i32,
    pub fraction: u32,
}

impl Time {
    pub const ZERO: Time = Time {
        seconds: 0,
        fraction: 0,
    };

    /// TIME_INVALID as carried by an INFO_TS with the invalidate flag.
    pub const INVALID: Time = Time {
        seconds: -1,
        fraction: u32::MAX,
    };

    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| {
                log::debug!("[TIME] system time before UNIX epoch, using timestamp 0");
                Duration::ZERO
            });
        Self::from_duration(since_epoch)
    }

    pub fn from_duration(d: Duration) -> Self {
        let seconds = i32::try_from(d.as_secs()).unwrap_or(i32::MAX);
        // subsec_nanos < 1e9, so the shifted quotient always fits in u32
        let fraction = ((u64::from(d.subsec_nanos()) << 32) / 1_000_000_000) as u32;
        Self { seconds, fraction }
    }

    pub fn as_nanos(&self) -> u64 {
        if self.seconds < 0 {
            return 0;
        }
        let secs = (self.seconds as u64) * 1_000_000_000;
        let frac = (u64::from(self.fraction) * 1_000_000_000) >> 32;
        secs + frac
    }

    pub fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_from_duration() {
        let t = Time::from_duration(Duration::from_millis(1500));
        assert_eq!(t.seconds, 1);
        assert_eq!(t.fraction, 1 << 31);
        // fraction math truncates; allow 1ns slop
        let nanos = t.as_nanos();
        assert!((1_499_999_999..=1_500_000_000).contains(&nanos));
    }

    #[test]
    fn test_time_invalid() {
        assert!(Time::INVALID.is_invalid());
        assert_eq!(Time::INVALID.as_nanos(), 0);
        assert!(!Time::now().is_invalid());
    }
}
