pub mod fft;
mod interpolation;
mod smoothing;

pub use fft::FftEngine;
pub use interpolation::{find_nearest_frequencies, interp_log_single, resample_log, Nearest};
pub use smoothing::{smooth_frequency_response, smooth_log};

/// Generate a logarithmically-spaced frequency grid.
pub fn generate_log_freq_grid(n: usize, f_min: f64, f_max: f64) -> Vec<f64> {
    if n < 2 {
        return vec![f_min];
    }
    let log_min = f_min.ln();
    let log_max = f_max.ln();
    (0..n)
        .map(|i| (log_min + (log_max - log_min) * i as f64 / (n - 1) as f64).exp())
        .collect()
}

/// Smallest power of two >= `n` (1 for 0).
pub fn next_power_of_two(n: usize) -> usize {
    n.max(1).next_power_of_two()
}
