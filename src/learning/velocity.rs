//! Rolling averages for phase and complexity velocity

use crate::tiers::{clamp_confidence, complexity_bucket, round2, ComplexityVelocity, PhaseVelocity, RunResult, Velocity};

/// Fold one value into a rolling average.
///
/// `new_avg = (avg * samples + value) / min(samples + 1, window)`. Once the sample count
/// has saturated at `window` the divisor stops growing with it.
pub fn rolling_average(avg: f64, samples: u32, value: f64, window: u32) -> (f64, u32) {
    let window = window.max(1);
    let new_samples = samples.saturating_add(1).min(window);
    let new_avg = (avg * samples as f64 + value) / new_samples as f64;
    (round2(new_avg), new_samples)
}

/// Record one phase duration
pub fn update_phase(velocity: &mut Velocity, phase: &str, minutes: f64, window: u32) -> PhaseVelocity {
    let entry = velocity.by_phase.entry(phase.to_string()).or_default();
    let (avg_min, samples) = rolling_average(entry.avg_min, entry.samples, minutes, window);
    entry.avg_min = avg_min;
    entry.samples = samples;
    entry.clone()
}

/// Record one finished run in its complexity bucket
pub fn update_complexity(
    velocity: &mut Velocity,
    complexity: u8,
    minutes: f64,
    result: RunResult,
    window: u32,
) -> ComplexityVelocity {
    let hit = if result.is_success() { 1.0 } else { 0.0 };
    let entry = velocity
        .by_complexity
        .entry(complexity_bucket(complexity).to_string())
        .or_default();

    let (avg_min, samples) = rolling_average(entry.avg_min, entry.samples, minutes, window);
    let (success_rate, _) = rolling_average(entry.success_rate, entry.samples, hit, window);
    entry.avg_min = avg_min;
    entry.success_rate = clamp_confidence(success_rate);
    entry.samples = samples;
    entry.clone()
}
