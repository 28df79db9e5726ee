//! Retry backoff for append proposals.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter.
///
/// Dueling proposers can preempt each other forever; jittered retry delays
/// are what breaks the symmetry.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial backoff duration
    pub initial: Duration,
    /// Maximum backoff duration
    pub max: Duration,
    /// Multiplier for each retry (typically 2.0)
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(25),
            max: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Calculate backoff duration for a given retry count with jitter
    #[must_use]
    pub fn duration(&self, retries: u32, rng: &mut impl Rng) -> Duration {
        let base = self.initial.as_secs_f64() * self.multiplier.powi(retries.cast_signed());
        let capped = base.min(self.max.as_secs_f64());
        // Add jitter: 50% to 150% of the base duration
        let jitter_factor = rng.random_range(0.5..1.5);
        Duration::from_secs_f64(capped * jitter_factor)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn grows_until_capped() {
        let config = BackoffConfig::default();
        let mut rng = StdRng::seed_from_u64(7);

        let early = config.duration(0, &mut rng);
        assert!(early >= config.initial / 2);
        assert!(early < config.initial * 2);

        // Far past the cap: jitter can still add 50%, never more.
        let late = config.duration(20, &mut rng);
        assert!(late <= config.max + config.max / 2);
        assert!(late >= config.max / 2);
    }
}
