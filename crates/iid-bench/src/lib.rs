// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Deterministic input generators shared by the detector benchmarks.

fn lcg_next(state: &mut u64) -> u64 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    *state
}

/// Uniform noise in `[0, 1)` from a fixed-seed LCG.
pub fn uniform_series(n: usize, seed: u64) -> Vec<f64> {
    let mut state = seed;
    (0..n)
        .map(|_| (lcg_next(&mut state) >> 11) as f64 / (1u64 << 53) as f64)
        .collect()
}

/// Uniform noise with a linear ramp starting at `n / 2`.
pub fn drifting_series(n: usize, seed: u64, slope: f64) -> Vec<f64> {
    let onset = n / 2;
    let mut values = uniform_series(n, seed);
    for (idx, value) in values.iter_mut().enumerate().skip(onset) {
        *value += slope * (idx - onset + 1) as f64;
    }
    values
}
