//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Un-jittered delay in milliseconds before the attempt following `attempt`.
///
/// `base * multiplier^(attempt-1)`, capped at `max_delay_ms`.
pub fn base_delay_ms(attempt: u32, config: &RetryConfig) -> f64 {
    if attempt == 0 {
        return 0.0;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let delay = config.base_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    delay.min(config.max_delay_ms as f64)
}

/// Calculate exponential backoff delay with jitter.
///
/// With jitter enabled the delay is perturbed uniformly within
/// `±(delay * jitter_range)`, floored at zero and rounded to whole milliseconds.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let delay = base_delay_ms(attempt, config);
    if delay <= 0.0 {
        return Duration::ZERO;
    }

    // Ranges built in code skip validation; keep the sampled interval finite.
    let range = if config.jitter_range.is_finite() {
        config.jitter_range.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let jittered = if config.jitter_enabled && range > 0.0 {
        let spread = delay * range;
        delay + rand::thread_rng().gen_range(-spread..=spread)
    } else {
        delay
    };

    Duration::from_millis(jittered.max(0.0).round() as u64)
}
