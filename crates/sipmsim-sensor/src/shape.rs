//! Single-cell pulse template.
//!
//! The template is the signal of one photoelectron firing a fully charged
//! cell at t = 0, sampled on the signal grid and normalized to a peak of
//! exactly 1.0. Every hit in an event is a time-shifted, amplitude-scaled
//! copy of this template.

use sipmsim_model::Properties;

/// Compute the peak-normalized pulse template for the given device.
///
/// Two-exponential model:
///
/// ```text
/// s[i] = exp(-i / tf) - exp(-i / tr)
/// ```
///
/// With the slow component enabled, a second falling exponential is mixed
/// in with weight `slowComponentFraction`:
///
/// ```text
/// s[i] = (1 - f) * exp(-i / tf) + f * exp(-i / ts) - exp(-i / tr)
/// ```
///
/// Time constants are expressed in sampling periods, so the template only
/// depends on their ratio to the sampling period.
pub fn signal_shape(properties: &Properties) -> Vec<f64> {
    let n_points = properties.n_signal_points();
    let sampling = properties.sampling();
    let tr = properties.rising_time() / sampling;
    let tf = properties.falling_time_fast() / sampling;

    let mut shape = Vec::with_capacity(n_points);
    if properties.has_slow_component() {
        let ts = properties.falling_time_slow() / sampling;
        let fraction = properties.slow_component_fraction();
        for i in 0..n_points {
            let t = i as f64;
            shape.push(
                (1.0 - fraction) * (-t / tf).exp() + fraction * (-t / ts).exp() - (-t / tr).exp(),
            );
        }
    } else {
        for i in 0..n_points {
            let t = i as f64;
            shape.push((-t / tf).exp() - (-t / tr).exp());
        }
    }

    let peak = shape.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert!(peak > 0.0, "pulse template peak must be positive");
    for value in &mut shape {
        *value /= peak;
    }
    shape
}
