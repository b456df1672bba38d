use std::f64::consts::PI;

use crate::error::AppError;
use crate::response::FrequencyResponse;

use super::interpolation::resample_log;

/// Gaussian octave smoothing.
///
/// Every point becomes the weighted mean of all points with weight
/// `exp(-d² / (2σ²))`, `d` the distance in octaves. O(n²), fine for the
/// few hundred points of a response grid. The input representation is
/// preserved. `sigma <= 0` or fewer than 3 points returns the input as is.
pub fn smooth_frequency_response(response: &FrequencyResponse, sigma: f64) -> FrequencyResponse {
    if !(sigma > 0.0) || response.len() < 3 {
        return response.clone();
    }

    let two_sigma_sq = 2.0 * sigma * sigma;
    response.map_magnitude(|_, p| {
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for other in &response.points {
            let d = (other.frequency / p.frequency).log2();
            let w = (-(d * d) / two_sigma_sq).exp();
            weighted_sum += other.magnitude * w;
            weight_sum += w;
        }
        let v = weighted_sum / weight_sum;
        if v.is_finite() {
            v
        } else {
            p.magnitude
        }
    })
}

/// Hann-windowed moving average on a log-spaced grid.
///
/// The curve is resampled onto roughly `bins_per_oct` points per octave,
/// smoothed with a normalized Hann window (odd length, at least 3, reflected
/// at the edges) and interpolated back onto `freq`.
///
/// Input must have at least 3 points, finite values and strictly ascending
/// positive frequencies.
pub fn smooth_log(freq: &[f64], mag: &[f64], bins_per_oct: f64) -> Result<Vec<f64>, AppError> {
    let invalid = |message: &str| AppError::Dsp {
        message: format!("smooth_log: {message}"),
    };

    if freq.len() < 3 || freq.len() != mag.len() {
        return Err(invalid("invalid input data"));
    }
    for (i, &f) in freq.iter().enumerate() {
        if !f.is_finite() || f <= 0.0 {
            return Err(invalid("invalid frequency value"));
        }
        if i > 0 && f <= freq[i - 1] {
            return Err(invalid("frequencies not ascending"));
        }
    }
    if mag.iter().any(|m| !m.is_finite()) {
        return Err(invalid("invalid magnitude value"));
    }

    let min_freq = freq[0].max(1.0);
    let max_freq = freq[freq.len() - 1];
    if max_freq <= min_freq * 1.01 {
        return Err(invalid("frequency range too narrow"));
    }

    let log_min = min_freq.log10();
    let log_max = max_freq.log10();
    let octave_range = (log_max - log_min) / 2.0_f64.log10();
    if !(octave_range > 0.0) || !octave_range.is_finite() {
        return Err(invalid("invalid octave range"));
    }

    let num_bins = ((octave_range * bins_per_oct).ceil() as usize + 1).clamp(5, 1000);
    let log_step = (log_max - log_min) / (num_bins - 1) as f64;
    let grid: Vec<f64> = (0..num_bins)
        .map(|i| 10.0_f64.powf(log_min + i as f64 * log_step))
        .collect();

    let mut grid_mag = resample_log(freq, mag, &grid);
    for i in 0..num_bins {
        if !grid_mag[i].is_finite() {
            grid_mag[i] = if i > 0 { grid_mag[i - 1] } else { 0.0 };
        }
    }

    // Odd Hann window, 3..=num_bins
    let half_bins = (bins_per_oct / 2.0).floor().max(0.0) as usize;
    let window_size = (2 * half_bins + 1).min(num_bins).max(3);
    let window: Vec<f64> = (0..window_size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (window_size - 1) as f64).cos()))
        .collect();
    let window_sum: f64 = window.iter().sum();
    if window_sum.abs() < 1e-10 {
        return Err(invalid("window sum too small"));
    }

    let half = window_size / 2;
    let last = num_bins as isize - 1;
    let smoothed_grid: Vec<f64> = (0..num_bins)
        .map(|i| {
            let mut sum = 0.0;
            for (j, w) in window.iter().enumerate() {
                let mut idx = i as isize - half as isize + j as isize;
                if idx < 0 {
                    idx = -idx;
                }
                if idx > last {
                    idx = 2 * last - idx;
                }
                let idx = idx.clamp(0, last) as usize;
                sum += grid_mag[idx] * w / window_sum;
            }
            if sum.is_finite() {
                sum
            } else {
                grid_mag[i]
            }
        })
        .collect();

    let back = resample_log(&grid, &smoothed_grid, freq);
    Ok(back
        .into_iter()
        .zip(mag)
        .map(|(s, &m)| if s.is_finite() { s } else { m })
        .collect())
}
