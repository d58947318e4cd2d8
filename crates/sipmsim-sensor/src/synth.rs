//! Pulse deposition onto the sampled baseline.
//!
//! The per-hit inner loop of signal synthesis adds a scaled copy of the
//! pulse template onto the waveform. It runs in four-wide f64 lanes with a
//! fused multiply-add and a scalar tail for the remainder, so the result
//! matches the scalar reference up to floating-point reassociation.

use wide::f64x4;

const LANES: usize = 4;

/// Add `amplitude * shape[i]` to `signal[i]` over the overlapping prefix.
pub fn deposit(signal: &mut [f64], shape: &[f64], amplitude: f64) {
    let len = signal.len().min(shape.len());
    let (signal, shape) = (&mut signal[..len], &shape[..len]);

    let amp = f64x4::splat(amplitude);
    let mut signal_chunks = signal.chunks_exact_mut(LANES);
    let mut shape_chunks = shape.chunks_exact(LANES);
    for (sig, sh) in (&mut signal_chunks).zip(&mut shape_chunks) {
        let acc = f64x4::from([sig[0], sig[1], sig[2], sig[3]]);
        let template = f64x4::from([sh[0], sh[1], sh[2], sh[3]]);
        let out = template.mul_add(amp, acc);
        sig.copy_from_slice(&out.to_array());
    }
    for (sig, &sh) in signal_chunks
        .into_remainder()
        .iter_mut()
        .zip(shape_chunks.remainder())
    {
        *sig += sh * amplitude;
    }
}

/// Scalar reference for [`deposit`].
#[cfg(test)]
fn deposit_scalar(signal: &mut [f64], shape: &[f64], amplitude: f64) {
    for (sig, &sh) in signal.iter_mut().zip(shape) {
        *sig += sh * amplitude;
    }
}
