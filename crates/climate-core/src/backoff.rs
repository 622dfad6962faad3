// ── Exponential backoff ──
//
// nominal(n) = min(base * 2^(n-1), ceiling) for the n-th consecutive
// failure. The jittered delay for failure n is drawn from
// [nominal(n-1), nominal(n)], so successive delays never shrink and
// never exceed the ceiling.

use std::time::Duration;

use rand::Rng;

use crate::config::{BackoffConfig, ReconnectConfig};

impl BackoffConfig {
    /// Delay for the `failures`-th consecutive failure, without jitter.
    /// Zero failures is treated as one.
    pub fn nominal(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.ceiling)
    }

    /// Jittered delay for the `failures`-th consecutive failure.
    pub fn jittered<R: Rng>(&self, failures: u32, rng: &mut R) -> Duration {
        let low = self.nominal(failures.saturating_sub(1));
        let high = self.nominal(failures);
        if high <= low {
            return high;
        }
        rng.gen_range(low..=high)
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base: self.initial_delay,
            ceiling: self.max_delay,
        }
    }

    /// Delay before reconnecting after `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        self.backoff().nominal(failures)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn config() -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_secs(2),
            ceiling: Duration::from_secs(60),
        }
    }

    #[test]
    fn nominal_doubles_from_base() {
        let cfg = config();
        assert_eq!(cfg.nominal(1), Duration::from_secs(2));
        assert_eq!(cfg.nominal(2), Duration::from_secs(4));
        assert_eq!(cfg.nominal(3), Duration::from_secs(8));
        assert_eq!(cfg.nominal(0), cfg.nominal(1));
    }

    #[test]
    fn nominal_caps_at_ceiling() {
        let cfg = config();
        assert_eq!(cfg.nominal(6), Duration::from_secs(60));
        assert_eq!(cfg.nominal(40), Duration::from_secs(60));
        assert_eq!(cfg.nominal(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn jittered_is_monotonic_and_bounded() {
        let cfg = config();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let mut previous = Duration::ZERO;
            for failures in 1..20 {
                let delay = cfg.jittered(failures, &mut rng);
                assert!(delay >= previous, "{delay:?} < {previous:?} at {failures}");
                assert!(delay <= cfg.ceiling);
                previous = delay;
            }
        }
    }

    #[test]
    fn first_failure_waits_exactly_base() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(config().jittered(1, &mut rng), Duration::from_secs(2));
    }

    #[test]
    fn reconnect_schedule() {
        let cfg = ReconnectConfig::default();
        let delays: Vec<u64> = (1..=8).map(|n| cfg.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300]);
    }
}
