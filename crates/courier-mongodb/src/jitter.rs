//! Randomized sweep scheduling.

use std::time::Duration;

use rand::Rng;

/// Delay until the next index sweep, drawn uniformly from
/// `[interval - variation, interval + variation]`.
///
/// Jitter is per process so a fleet booting together does not sweep in
/// lockstep.
pub(crate) fn sweep_delay<R: Rng + ?Sized>(
    interval: Duration,
    variation: Duration,
    rng: &mut R,
) -> Duration {
    let earliest = interval.saturating_sub(variation);
    let latest = interval.saturating_add(variation);
    rng.random_range(earliest..=latest)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn delay_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let interval = Duration::from_secs(600);
        let variation = Duration::from_secs(300);
        for _ in 0..1_000 {
            let delay = sweep_delay(interval, variation, &mut rng);
            assert!(delay >= Duration::from_secs(300), "{delay:?} too early");
            assert!(delay <= Duration::from_secs(900), "{delay:?} too late");
        }
    }

    #[test]
    fn zero_variation_is_exact() {
        let mut rng = StdRng::seed_from_u64(7);
        let delay = sweep_delay(Duration::from_secs(10), Duration::ZERO, &mut rng);
        assert_eq!(delay, Duration::from_secs(10));
    }
}
