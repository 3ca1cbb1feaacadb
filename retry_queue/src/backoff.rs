use std::time::Duration;
use xrc_config::RetrySettings;

/// Delay before the next retry after `attempts_made` attempts.
///
/// `min(initial * multiplier^(attempts_made - 1), max)`; the first retry
/// waits the initial interval.
pub fn backoff_delay(settings: &RetrySettings, attempts_made: u32) -> Duration {
    let exponent = attempts_made.saturating_sub(1);
    let factor = settings.multiplier.powi(exponent as i32);
    let millis = (settings.initial_ms as f64 * factor).min(settings.max_ms as f64);
    Duration::from_millis(millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_series_doubles_from_thirty_seconds() {
        let settings = RetrySettings::default();
        let offsets: Vec<u64> = (1..=5)
            .map(|n| backoff_delay(&settings, n).as_secs())
            .collect();
        assert_eq!(offsets, vec![30, 60, 120, 240, 480]);
    }

    #[test]
    fn computed_delay_is_clamped_to_max() {
        let settings = RetrySettings {
            initial_ms: 30_000,
            multiplier: 2.0,
            max_ms: 3_600_000,
            max_attempts: 20,
        };
        assert_eq!(backoff_delay(&settings, 8).as_secs(), 3600);
        assert_eq!(backoff_delay(&settings, 15).as_secs(), 3600);
    }

    #[test]
    fn multiplier_of_one_keeps_the_interval_constant() {
        let settings = RetrySettings {
            initial_ms: 5_000,
            multiplier: 1.0,
            max_ms: 60_000,
            max_attempts: 3,
        };
        assert_eq!(backoff_delay(&settings, 1).as_secs(), 5);
        assert_eq!(backoff_delay(&settings, 3).as_secs(), 5);
    }
}
